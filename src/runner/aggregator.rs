//! Result bundle assembly and persistence

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::constants::RESULTS_DIR;
use crate::error::AppResult;
use crate::metadata::HostMetadata;
use crate::models::{LoadReport, ResultBundle, ServerArtifacts, ServerMetadata};

/// Merge both sides of a run into one bundle
pub fn aggregate(
    server_metadata: ServerMetadata,
    client_metadata: HostMetadata,
    server_results: ServerArtifacts,
    client_results: LoadReport,
) -> ResultBundle {
    ResultBundle {
        server_metadata,
        client_metadata,
        server_results,
        client_results,
    }
}

/// Writes bundles as `result-{unix_millis}.json` under a test's results folder
#[derive(Debug, Clone)]
pub struct ResultStore {
    cwd: PathBuf,
}

impl ResultStore {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    /// Results folder for a test directory
    pub fn results_dir(&self, test_dir: &Path) -> PathBuf {
        self.cwd.join(test_dir).join(RESULTS_DIR)
    }

    /// Persist `bundle` and return the written path
    pub async fn persist(&self, bundle: &ResultBundle, test_dir: &Path) -> AppResult<PathBuf> {
        let dir = self.results_dir(test_dir);
        tokio::fs::create_dir_all(&dir).await?;

        let json = serde_json::to_vec_pretty(bundle)?;
        let mut millis = chrono::Utc::now().timestamp_millis();

        loop {
            let path = dir.join(format!("result-{}.json", millis));
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match file {
                Ok(mut file) => {
                    file.write_all(&json).await?;
                    file.flush().await?;
                    tracing::info!(path = %path.display(), "Results written");
                    return Ok(path);
                }
                // Same millisecond as an earlier run
                Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
