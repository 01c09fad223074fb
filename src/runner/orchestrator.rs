//! Benchmark run orchestration
//!
//! A run goes build -> server start -> client load -> harvest -> teardown.
//! Every stage is gated on the previous one and on the run token; once the
//! token fires only teardown runs and the run ends with [`AppError::Aborted`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{ResultBundle, RunSpec};

use super::aggregator::aggregate;
use super::client::ClientController;
use super::container::ContainerBuilder;
use super::load::HttpLoadGenerator;
use super::registry::RunnerConfig;
use super::requests::{LoadTest, TestCatalog};
use super::server::{ServerController, ServerHandle, ServerStatus};
use super::versions::NodeReleaseIndex;

fn ensure_active(token: &CancellationToken) -> AppResult<()> {
    if token.is_cancelled() {
        Err(AppError::Aborted)
    } else {
        Ok(())
    }
}

/// Combine the run outcome with the server teardown result.
///
/// A fatal teardown failure replaces a successful outcome; an earlier
/// failure or abort is kept and the teardown error is only logged.
fn settle<T>(outcome: AppResult<T>, teardown: AppResult<ServerStatus>) -> AppResult<T> {
    match (outcome, teardown) {
        (outcome, Ok(status)) => {
            tracing::debug!(status = ?status, "Server torn down");
            outcome
        }
        (Ok(_), Err(e)) if e.is_fatal() => {
            tracing::error!(error = %e, "Server teardown failed");
            Err(e)
        }
        (outcome, Err(e)) => {
            tracing::warn!(error = %e, "Server teardown failed");
            outcome
        }
    }
}

/// Runs benchmarks for one runner configuration
pub struct Runner {
    runner: RunnerConfig,
    builder: ContainerBuilder,
    server: ServerController,
    client: ClientController,
    tests: TestCatalog,
}

impl Runner {
    pub fn new(
        runner: RunnerConfig,
        builder: ContainerBuilder,
        server: ServerController,
        client: ClientController,
        tests: TestCatalog,
    ) -> Self {
        Self {
            runner,
            builder,
            server,
            client,
            tests,
        }
    }

    /// Runner wired with the release index and the HTTP load generator
    pub fn from_config(config: &Config, runner: RunnerConfig) -> AppResult<Self> {
        let resolver = Arc::new(NodeReleaseIndex::new(config.container.version_index_url.clone()));
        let builder = ContainerBuilder::new(config.container.clone(), resolver)
            .with_echo(config.server.echo_output);
        let server = ServerController::new(config.server.clone(), config.container.scripts_dir.clone());
        let generator = Arc::new(HttpLoadGenerator::new(config.load.clone())?);

        Ok(Self::new(
            runner,
            builder,
            server,
            ClientController::new(generator),
            TestCatalog::builtin(),
        ))
    }

    /// Execute one benchmark run
    pub async fn run(&self, spec: &RunSpec, token: &CancellationToken) -> AppResult<ResultBundle> {
        spec.validate()?;
        ensure_active(token)?;

        let test = self.tests.resolve(&spec.test, &spec.working_directory).await?;

        let image = self
            .builder
            .build(&spec.runtime_version_request, &self.runner)
            .await?;
        ensure_active(token)?;

        let server = self.server.start(spec, &image, &self.runner, token).await?;

        let outcome = self.measure(&test, &server, token).await;
        settle(outcome, server.close().await)
    }

    /// Client phase against a started server, followed by the harvest
    async fn measure(
        &self,
        test: &LoadTest,
        server: &ServerHandle,
        token: &CancellationToken,
    ) -> AppResult<ResultBundle> {
        let Some(client) = self.client.start(test, server.url(), token).await? else {
            return Err(AppError::Aborted);
        };

        let outcome = match client.results().await {
            Ok(report) if !token.is_cancelled() => {
                let server_results = server.results().await;
                Ok(aggregate(
                    server_results.metadata,
                    client.metadata().clone(),
                    server_results.artifacts,
                    report,
                ))
            }
            Ok(_) => Err(AppError::Aborted),
            Err(e) => Err(e),
        };

        client.close();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::{ContainerConfig, ServerConfig};
    use crate::runner::load::LoadGenerator;
    use crate::runner::load::testing::{CancelDuringLoad, CannedLoad};
    use crate::runner::process::testing::write_script;
    use crate::runner::registry::docker;
    use crate::runner::versions::FixedVersions;

    const READY_SERVER: &str = r#"trap 'touch "$1/interrupted"; exit 0' INT
mkdir -p "$1/results"
echo "server output" > "$1/results/output.txt"
echo "Running on port 3000"
while true; do sleep 0.1; done"#;

    fn runner(scripts: &Path, generator: Arc<dyn LoadGenerator>) -> Runner {
        let container = ContainerConfig {
            scripts_dir: scripts.to_path_buf(),
            ..ContainerConfig::default()
        };
        let server = ServerConfig {
            echo_output: false,
            ..ServerConfig::default()
        };
        let resolver = Arc::new(FixedVersions::new().with("lts", &["20.x"]));

        Runner::new(
            docker(),
            ContainerBuilder::new(container, resolver).with_echo(false),
            ServerController::new(server, scripts),
            ClientController::new(generator),
            TestCatalog::builtin(),
        )
    }

    fn spec(cwd: &Path, test: &str) -> RunSpec {
        RunSpec::new(cwd, "https://example.com/app.git", "main", test, "lts")
    }

    #[test]
    fn test_teardown_failure_fails_successful_run() {
        let teardown = Err(AppError::ServerProcessFailure("wait failed".into()));
        let err = settle(Ok(()), teardown).unwrap_err();
        assert!(matches!(err, AppError::ServerProcessFailure(_)));

        assert!(settle(Ok(()), Ok(ServerStatus::Stopped)).is_ok());

        let teardown = Err(AppError::ServerProcessFailure("wait failed".into()));
        let err = settle::<()>(Err(AppError::Aborted), teardown).unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn test_run_produces_bundle() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "build.sh", "exit 0");
        write_script(scripts.path(), "run.sh", READY_SERVER);

        let token = CancellationToken::new();
        let bundle = runner(scripts.path(), Arc::new(CannedLoad))
            .run(&spec(cwd.path(), "simple-query"), &token)
            .await
            .unwrap();

        assert_eq!(bundle.server_metadata.docker_tag, "expf-runner:20.x-bookworm");
        assert_eq!(bundle.server_metadata.node_version, "20.x");
        assert_eq!(bundle.client_results.distinct_paths(), 4);
        assert_eq!(bundle.client_results.url, "http://localhost:3000");

        // No metadata.json: error recorded, other fields intact
        let error = bundle.server_metadata.metadata_error().unwrap();
        assert_eq!(error.code, "ARTIFACT_READ_FAILURE");
        assert_eq!(
            bundle.server_results.output.content().map(|s| s.trim()),
            Some("server output")
        );
        assert!(bundle.server_results.flamegraph.error().is_some());
        assert!(bundle.server_results.raw_perf_data.error().is_some());
        assert!(bundle.server_results.lockfile.error().is_some());
    }

    #[tokio::test]
    async fn test_cancel_before_start_spawns_nothing() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        let marker = cwd.path().join("built");
        write_script(scripts.path(), "build.sh", &format!("touch {}", marker.display()));
        write_script(scripts.path(), "run.sh", READY_SERVER);

        let token = CancellationToken::new();
        token.cancel();
        let err = runner(scripts.path(), Arc::new(CannedLoad))
            .run(&spec(cwd.path(), "example"), &token)
            .await
            .unwrap_err();

        assert!(err.is_aborted());
        assert!(!marker.exists());
        assert!(!cwd.path().join("results").exists());
    }

    #[tokio::test]
    async fn test_cancel_during_load_interrupts_server() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "build.sh", "exit 0");
        write_script(scripts.path(), "run.sh", READY_SERVER);

        let token = CancellationToken::new();
        let generator = Arc::new(CancelDuringLoad {
            trigger: token.clone(),
        });
        let err = runner(scripts.path(), generator)
            .run(&spec(cwd.path(), "example"), &token)
            .await
            .unwrap_err();

        assert!(err.is_aborted());
        assert!(cwd.path().join("interrupted").exists());
    }

    #[tokio::test]
    async fn test_build_failure_stops_run() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "build.sh", "exit 1");
        write_script(scripts.path(), "run.sh", "touch \"$1/spawned\"");

        let token = CancellationToken::new();
        let err = runner(scripts.path(), Arc::new(CannedLoad))
            .run(&spec(cwd.path(), "example"), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BuildFailure(_)));
        assert!(!cwd.path().join("spawned").exists());
    }

    #[tokio::test]
    async fn test_server_failure_stops_run() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "build.sh", "exit 0");
        write_script(scripts.path(), "run.sh", "exit 2");

        let token = CancellationToken::new();
        let err = runner(scripts.path(), Arc::new(CannedLoad))
            .run(&spec(cwd.path(), "example"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServerProcessFailure(_)));
    }

    #[tokio::test]
    async fn test_unknown_test_fails_before_build() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        let marker = cwd.path().join("built");
        write_script(scripts.path(), "build.sh", &format!("touch {}", marker.display()));

        let token = CancellationToken::new();
        let err = runner(scripts.path(), Arc::new(CannedLoad))
            .run(&spec(cwd.path(), "no-such-test"), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UnknownTest(_)));
        assert!(!marker.exists());
    }
}
