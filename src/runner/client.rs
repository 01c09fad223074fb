//! Client side of a run: host metadata plus one load generator task

use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::metadata::{HostMetadata, collect_metadata};
use crate::models::LoadReport;

use super::load::LoadGenerator;
use super::requests::LoadTest;

/// Starts load generator runs against a ready server
#[derive(Clone)]
pub struct ClientController {
    generator: Arc<dyn LoadGenerator>,
}

impl ClientController {
    pub fn new(generator: Arc<dyn LoadGenerator>) -> Self {
        Self { generator }
    }

    /// Start load against `endpoint`. Returns `None` when the run is already cancelled.
    pub async fn start(
        &self,
        test: &LoadTest,
        endpoint: &str,
        token: &CancellationToken,
    ) -> AppResult<Option<ClientHandle>> {
        if token.is_cancelled() {
            tracing::info!("Run cancelled before client start");
            return Ok(None);
        }

        let metadata = tokio::task::spawn_blocking(collect_metadata).await??;
        let stop = token.child_token();

        let generator = Arc::clone(&self.generator);
        let target = endpoint.to_string();
        let requests = test.requests.clone();
        let task_stop = stop.clone();

        tracing::info!(test = %test.name, endpoint = %endpoint, requests = requests.len(), "Starting client");
        let task = tokio::spawn(async move { generator.run(&target, &requests, task_stop).await });

        Ok(Some(ClientHandle {
            metadata,
            stop,
            task: Mutex::new(Some(task)),
            report: OnceCell::new(),
        }))
    }
}

/// Handle to a running load generator
#[derive(Debug)]
pub struct ClientHandle {
    metadata: HostMetadata,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<AppResult<LoadReport>>>>,
    report: OnceCell<LoadReport>,
}

impl ClientHandle {
    /// Host facts of the machine driving the load
    pub fn metadata(&self) -> &HostMetadata {
        &self.metadata
    }

    /// Whether a stop has been requested
    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Wait for the load run to finish. The report is cached after the first call.
    pub async fn results(&self) -> AppResult<LoadReport> {
        let report = self
            .report
            .get_or_try_init(|| async {
                let task = self.task.lock().await.take().ok_or_else(|| {
                    AppError::LoadGenerator("load run already failed".to_string())
                })?;
                task.await?
            })
            .await?;
        Ok(report.clone())
    }

    /// Ask the load generator to stop. Safe to call repeatedly.
    pub fn close(&self) {
        if !self.stop.is_cancelled() {
            tracing::debug!("Stopping client");
            self.stop.cancel();
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
