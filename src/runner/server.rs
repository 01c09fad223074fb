//! Server subprocess lifecycle
//!
//! The controller launches `run.sh`, which starts the server container,
//! and tracks it through a validated state machine:
//!
//! ```text
//! starting -> started -> closing -> stopped
//! starting | started -> aborted
//! ```
//!
//! Readiness is the first stdout line containing the configured marker.
//! Cancellation and `close()` both interrupt the subprocess with SIGINT;
//! whichever wins the transition decides the terminal status.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::constants::{RESULTS_DIR, RUN_SCRIPT, RUNTIME_TYPE_ENV, result_files};
use crate::error::{AppError, AppResult};
use crate::models::{Artifact, BinaryContent, ImageHandle, RunSpec, ServerArtifacts, ServerMetadata};

use super::process::{Stream, forward_lines, script_command, script_path};
use super::registry::RunnerConfig;

/// Lifecycle status of a server subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Starting,
    Started,
    Closing,
    Stopped,
    Aborted,
}

impl ServerStatus {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition(self, next: ServerStatus) -> bool {
        use ServerStatus::*;
        matches!(
            (self, next),
            (Starting, Started)
                | (Started, Closing)
                | (Closing, Stopped)
                | (Starting, Aborted)
                | (Started, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ServerStatus::Stopped | ServerStatus::Aborted)
    }
}

/// How the subprocess ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exit code, `None` when killed by a signal
    Exited(Option<i32>),
    WaitFailed(String),
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessExit::Exited(Some(code)) => write!(f, "exited with code {}", code),
            ProcessExit::Exited(None) => write!(f, "terminated by signal"),
            ProcessExit::WaitFailed(msg) => write!(f, "wait failed: {}", msg),
        }
    }
}

#[derive(Debug)]
struct StatusLog {
    history: Vec<ServerStatus>,
}

impl StatusLog {
    fn current(&self) -> ServerStatus {
        self.history
            .last()
            .copied()
            .unwrap_or(ServerStatus::Starting)
    }
}

/// Status shared between the handle and its background tasks
#[derive(Debug)]
struct SharedStatus {
    log: Mutex<StatusLog>,
}

impl SharedStatus {
    fn new() -> Self {
        Self {
            log: Mutex::new(StatusLog {
                history: vec![ServerStatus::Starting],
            }),
        }
    }

    fn current(&self) -> ServerStatus {
        match self.log.lock() {
            Ok(log) => log.current(),
            Err(poisoned) => poisoned.into_inner().current(),
        }
    }

    fn history(&self) -> Vec<ServerStatus> {
        match self.log.lock() {
            Ok(log) => log.history.clone(),
            Err(poisoned) => poisoned.into_inner().history.clone(),
        }
    }

    /// Apply `next` if legal; returns whether the transition happened
    fn transition(&self, next: ServerStatus) -> bool {
        let mut log = match self.log.lock() {
            Ok(log) => log,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = log.current();
        if !current.can_transition(next) {
            tracing::trace!(?current, ?next, "Ignoring server status transition");
            return false;
        }
        log.history.push(next);
        tracing::debug!(from = ?current, to = ?next, "Server status changed");
        true
    }
}

/// Send SIGINT to the subprocess
fn interrupt(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGINT) {
        Ok(()) => tracing::debug!(pid, "Sent SIGINT to server process"),
        Err(Errno::ESRCH) => tracing::debug!(pid, "Server process already gone"),
        Err(e) => tracing::warn!(pid, error = %e, "Failed to interrupt server process"),
    }
}

async fn wait_for_exit(mut exit_rx: watch::Receiver<Option<ProcessExit>>) -> ProcessExit {
    match exit_rx.wait_for(|exit| exit.is_some()).await {
        Ok(exit) => exit
            .clone()
            .unwrap_or_else(|| ProcessExit::WaitFailed("no exit status".to_string())),
        Err(_) => ProcessExit::WaitFailed("process supervisor stopped".to_string()),
    }
}

/// Launches server subprocesses
#[derive(Debug, Clone)]
pub struct ServerController {
    config: ServerConfig,
    scripts_dir: PathBuf,
}

impl ServerController {
    pub fn new(config: ServerConfig, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Launch the server and wait until it reports readiness
    pub async fn start(
        &self,
        spec: &RunSpec,
        image: &ImageHandle,
        runner: &RunnerConfig,
        token: &CancellationToken,
    ) -> AppResult<ServerHandle> {
        if token.is_cancelled() {
            return Err(AppError::Aborted);
        }

        let script = script_path(&self.scripts_dir, RUN_SCRIPT)
            .await
            .map_err(|e| {
                AppError::ServerProcessFailure(format!(
                    "scripts directory {}: {}",
                    self.scripts_dir.display(),
                    e
                ))
            })?;

        let mut cmd = script_command(&script);
        cmd.arg(&spec.working_directory)
            .arg(&spec.repository_url)
            .arg(&spec.repository_ref)
            .arg(&spec.test)
            .arg(&image.tag);
        if let Some(overrides) = &spec.dependency_overrides {
            cmd.arg(overrides);
        }
        cmd.envs(&runner.env)
            .env(RUNTIME_TYPE_ENV, runner.type_label());

        tracing::info!(tag = %image.tag, test = %spec.test, "Starting server");

        let mut child = cmd.spawn().map_err(|e| {
            AppError::ServerProcessFailure(format!("failed to spawn {}: {}", script.display(), e))
        })?;
        let pid = child.id();
        let shared = Arc::new(SharedStatus::new());

        let echo = self.config.echo_output;
        let (ready_tx, mut ready_rx) = oneshot::channel::<()>();
        if let Some(stdout) = child.stdout.take() {
            let marker = self.config.ready_marker.clone();
            let mut ready_tx = Some(ready_tx);
            tokio::spawn(async move {
                forward_lines(stdout, Stream::Stdout, echo, |line| {
                    if line.contains(&marker) {
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                })
                .await
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move { forward_lines(stderr, Stream::Stderr, echo, |_| {}).await });
        }

        let (exit_tx, exit_rx) = watch::channel::<Option<ProcessExit>>(None);
        {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let exit = match child.wait().await {
                    Ok(status) => ProcessExit::Exited(status.code()),
                    Err(e) => ProcessExit::WaitFailed(e.to_string()),
                };
                tracing::debug!(pid = ?pid, exit = %exit, "Server process exited");
                exit_tx.send_replace(Some(exit));
                shared.transition(ServerStatus::Stopped);
            });
        }

        let mut stdout_open = true;
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    if shared.transition(ServerStatus::Aborted) {
                        interrupt(pid);
                    }
                    wait_for_exit(exit_rx.clone()).await;
                    tracing::info!("Server start aborted");
                    return Err(AppError::Aborted);
                }

                ready = &mut ready_rx, if stdout_open => match ready {
                    Ok(()) => break,
                    Err(_) => stdout_open = false,
                },

                exit = wait_for_exit(exit_rx.clone()) => {
                    return Err(AppError::ServerProcessFailure(format!(
                        "{} {} before becoming ready",
                        RUN_SCRIPT, exit
                    )));
                }
            }
        }

        shared.transition(ServerStatus::Started);
        tracing::info!(url = %self.config.url, "Server ready");

        let abort_listener = {
            let shared = Arc::clone(&shared);
            let token = token.clone();
            let exit_rx = exit_rx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        if shared.transition(ServerStatus::Aborted) {
                            tracing::info!("Run cancelled, interrupting server");
                            interrupt(pid);
                        }
                    }
                    _ = wait_for_exit(exit_rx) => {}
                }
            })
        };

        let metadata = ServerMetadata {
            url: self.config.url.clone(),
            docker_tag: image.tag.clone(),
            node_version: image.runtime_version.clone(),
            runner_type: image.runner_type.clone(),
            runtime: runner.runtime.clone(),
            apm: runner.apm.clone(),
            capabilities: runner.capabilities.clone(),
            container: Map::new(),
        };

        Ok(ServerHandle {
            metadata,
            results_dir: spec.working_directory.join(RESULTS_DIR),
            pid,
            shared,
            exit_rx,
            token: token.clone(),
            abort_listener,
        })
    }
}

/// Server side of a run: metadata plus the harvested artifacts
#[derive(Debug, Clone)]
pub struct ServerResults {
    pub metadata: ServerMetadata,
    pub artifacts: ServerArtifacts,
}

/// Handle to a started server subprocess
#[derive(Debug)]
pub struct ServerHandle {
    metadata: ServerMetadata,
    results_dir: PathBuf,
    pid: Option<u32>,
    shared: Arc<SharedStatus>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    token: CancellationToken,
    abort_listener: JoinHandle<()>,
}

impl ServerHandle {
    pub fn status(&self) -> ServerStatus {
        self.shared.current()
    }

    /// Every status the server went through, in order
    pub fn history(&self) -> Vec<ServerStatus> {
        self.shared.history()
    }

    pub fn metadata(&self) -> &ServerMetadata {
        &self.metadata
    }

    pub fn url(&self) -> &str {
        &self.metadata.url
    }

    /// Wait for the subprocess to exit
    pub async fn wait_exit(&self) -> ProcessExit {
        wait_for_exit(self.exit_rx.clone()).await
    }

    /// Interrupt the server and wait for it to exit. Safe to call repeatedly.
    ///
    /// A cancelled run token wins over a regular close, even when the abort
    /// listener has not observed it yet.
    pub async fn close(&self) -> AppResult<ServerStatus> {
        match self.status() {
            ServerStatus::Stopped => return Ok(ServerStatus::Stopped),
            ServerStatus::Started => {
                let next = if self.token.is_cancelled() {
                    ServerStatus::Aborted
                } else {
                    ServerStatus::Closing
                };
                if self.shared.transition(next) {
                    interrupt(self.pid);
                }
            }
            ServerStatus::Starting | ServerStatus::Closing | ServerStatus::Aborted => {}
        }

        let exit = self.wait_exit().await;
        self.shared.transition(ServerStatus::Stopped);
        self.abort_listener.abort();

        if let ProcessExit::WaitFailed(msg) = exit {
            return Err(AppError::ServerProcessFailure(msg));
        }

        let status = self.status();
        tracing::info!(status = ?status, "Server closed");
        Ok(status)
    }

    /// Harvest the results folder. Each file is read independently.
    pub async fn results(&self) -> ServerResults {
        let dir = &self.results_dir;
        let output_path = dir.join(result_files::OUTPUT);
        let flamegraph_path = dir.join(result_files::FLAMEGRAPH);
        let perf_path = dir.join(result_files::RAW_PERF_DATA);
        let metadata_path = dir.join(result_files::METADATA);
        let lockfile_path = dir.join(result_files::LOCKFILE);

        let (output, flamegraph, raw_perf_data, container_metadata, lockfile) = tokio::join!(
            read_text(&output_path),
            read_text(&flamegraph_path),
            read_binary(&perf_path),
            read_metadata(&metadata_path),
            read_text(&lockfile_path),
        );

        let mut metadata = self.metadata.clone();
        match container_metadata {
            Ok(fields) => metadata.merge_container(fields),
            Err(err) => {
                tracing::warn!(error = %err, "Server metadata unavailable");
                metadata.record_error(err.capture());
            }
        }

        ServerResults {
            metadata,
            artifacts: ServerArtifacts {
                output,
                flamegraph,
                raw_perf_data,
                lockfile,
            },
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.abort_listener.abort();
    }
}

async fn read_text(path: &Path) -> Artifact<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Artifact::Content(content),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Artifact missing");
            Artifact::Error(AppError::artifact_read(path, &e).capture())
        }
    }
}

async fn read_binary(path: &Path) -> Artifact<BinaryContent> {
    match tokio::fs::read(path).await {
        Ok(content) => Artifact::Content(BinaryContent(content)),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Artifact missing");
            Artifact::Error(AppError::artifact_read(path, &e).capture())
        }
    }
}

async fn read_metadata(path: &Path) -> AppResult<Map<String, Value>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::artifact_read(path, &e))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(AppError::metadata_parse(path, "expected a JSON object")),
        Err(e) => Err(AppError::metadata_parse(path, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::process::testing::write_script;
    use crate::runner::registry::{docker, vanilla};

    const READY_SERVER: &str = r#"trap 'exit 0' INT
echo "booting"
echo "Running on port 3000"
while true; do sleep 0.1; done"#;

    fn controller(scripts: &Path) -> ServerController {
        let config = ServerConfig {
            echo_output: false,
            ..ServerConfig::default()
        };
        ServerController::new(config, scripts)
    }

    fn image() -> ImageHandle {
        ImageHandle {
            tag: "expf-runner:20.x-bookworm".into(),
            runtime_version: "20.x".into(),
            runner_type: None,
            runtime: "node.js".into(),
            apm: "none".into(),
        }
    }

    fn spec(cwd: &Path) -> RunSpec {
        RunSpec::new(cwd, "https://example.com/app.git", "main", "example", "lts")
    }

    #[test]
    fn test_transitions() {
        use ServerStatus::*;
        assert!(Starting.can_transition(Started));
        assert!(Started.can_transition(Aborted));
        assert!(Closing.can_transition(Stopped));
        assert!(!Closing.can_transition(Aborted));
        assert!(!Aborted.can_transition(Stopped));
        assert!(!Started.can_transition(Stopped));
        assert!(!Stopped.can_transition(Starting));
        assert!(Aborted.is_terminal() && Stopped.is_terminal());
    }

    #[tokio::test]
    async fn test_start_and_close() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "run.sh", READY_SERVER);

        let token = CancellationToken::new();
        let handle = controller(scripts.path())
            .start(&spec(cwd.path()), &image(), &docker(), &token)
            .await
            .unwrap();
        assert_eq!(handle.status(), ServerStatus::Started);

        assert_eq!(handle.close().await.unwrap(), ServerStatus::Stopped);
        assert_eq!(handle.close().await.unwrap(), ServerStatus::Stopped);
        assert_eq!(
            handle.history(),
            vec![
                ServerStatus::Starting,
                ServerStatus::Started,
                ServerStatus::Closing,
                ServerStatus::Stopped
            ]
        );
    }

    #[tokio::test]
    async fn test_arguments_and_environment() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(
            scripts.path(),
            "run.sh",
            &format!(
                "echo \"$@\" > \"$1/args.txt\"\necho \"$RUNTIME_TYPE\" > \"$1/type.txt\"\n{}",
                READY_SERVER
            ),
        );

        let run = spec(cwd.path()).with_overrides(r#"{"express":"5"}"#).unwrap();
        let token = CancellationToken::new();
        let handle = controller(scripts.path())
            .start(&run, &image(), &vanilla(), &token)
            .await
            .unwrap();
        handle.close().await.unwrap();

        let args = std::fs::read_to_string(cwd.path().join("args.txt")).unwrap();
        assert!(args.contains("https://example.com/app.git main example expf-runner:20.x-bookworm"));
        assert!(args.trim_end().ends_with(r#"{"express":"5"}"#));
        let kind = std::fs::read_to_string(cwd.path().join("type.txt")).unwrap();
        assert_eq!(kind.trim(), "vanilla");
    }

    #[tokio::test]
    async fn test_exit_before_ready_fails() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "run.sh", "echo \"pulling image\"\nexit 1");

        let token = CancellationToken::new();
        let err = controller(scripts.path())
            .start(&spec(cwd.path()), &image(), &docker(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServerProcessFailure(ref msg) if msg.contains("code 1")));
    }

    #[tokio::test]
    async fn test_cancelled_token_spawns_nothing() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "run.sh", "touch \"$1/spawned\"");

        let token = CancellationToken::new();
        token.cancel();
        let err = controller(scripts.path())
            .start(&spec(cwd.path()), &image(), &docker(), &token)
            .await
            .unwrap_err();
        assert!(err.is_aborted());
        assert!(!cwd.path().join("spawned").exists());
    }

    #[tokio::test]
    async fn test_cancel_while_starting() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "run.sh", "trap 'exit 0' INT\nwhile true; do sleep 0.1; done");

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let err = controller(scripts.path())
            .start(&spec(cwd.path()), &image(), &docker(), &token)
            .await
            .unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn test_cancel_after_started_aborts() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "run.sh", READY_SERVER);

        let token = CancellationToken::new();
        let handle = controller(scripts.path())
            .start(&spec(cwd.path()), &image(), &docker(), &token)
            .await
            .unwrap();

        token.cancel();
        assert_eq!(handle.wait_exit().await, ProcessExit::Exited(Some(0)));
        assert_eq!(handle.status(), ServerStatus::Aborted);

        assert_eq!(handle.close().await.unwrap(), ServerStatus::Aborted);
        assert_eq!(handle.close().await.unwrap(), ServerStatus::Aborted);
        assert_eq!(
            handle.history(),
            vec![ServerStatus::Starting, ServerStatus::Started, ServerStatus::Aborted]
        );
    }

    #[tokio::test]
    async fn test_close_right_after_cancel_aborts() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "run.sh", READY_SERVER);

        let token = CancellationToken::new();
        let handle = controller(scripts.path())
            .start(&spec(cwd.path()), &image(), &docker(), &token)
            .await
            .unwrap();

        // No yield between the two, so the abort listener cannot run first
        token.cancel();
        assert_eq!(handle.close().await.unwrap(), ServerStatus::Aborted);
        assert_eq!(
            handle.history(),
            vec![ServerStatus::Starting, ServerStatus::Started, ServerStatus::Aborted]
        );
    }

    #[tokio::test]
    async fn test_non_utf8_output_keeps_server_alive() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(
            scripts.path(),
            "run.sh",
            r#"trap 'exit 0' INT
printf 'caf\351 latin1 banner\n'
echo "Running on port 3000"
while true; do printf 'tick \351\n'; sleep 0.1; done"#,
        );

        let token = CancellationToken::new();
        let handle = controller(scripts.path())
            .start(&spec(cwd.path()), &image(), &docker(), &token)
            .await
            .unwrap();
        assert_eq!(handle.status(), ServerStatus::Started);

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(handle.status(), ServerStatus::Started);
        assert_eq!(handle.close().await.unwrap(), ServerStatus::Stopped);
        assert_eq!(handle.wait_exit().await, ProcessExit::Exited(Some(0)));
    }

    #[tokio::test]
    async fn test_results_harvest() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(
            scripts.path(),
            "run.sh",
            &format!(
                r#"mkdir -p "$1/results"
echo "autocannon output" > "$1/results/output.txt"
printf 'perf' > "$1/results/perf.data"
echo '{{"arch":"x64","dockerTag":"other"}}' > "$1/results/metadata.json"
echo '{{}}' > "$1/results/package-lock.json"
{}"#,
                READY_SERVER
            ),
        );

        let token = CancellationToken::new();
        let handle = controller(scripts.path())
            .start(&spec(cwd.path()), &image(), &docker(), &token)
            .await
            .unwrap();
        let results = handle.results().await;
        handle.close().await.unwrap();

        let artifacts = &results.artifacts;
        assert_eq!(artifacts.output.content().map(|s| s.trim()), Some("autocannon output"));
        assert_eq!(artifacts.raw_perf_data.content(), Some(&BinaryContent(b"perf".to_vec())));
        assert!(artifacts.lockfile.is_content());
        assert_eq!(artifacts.flamegraph.error().unwrap().code, "ARTIFACT_READ_FAILURE");

        assert_eq!(results.metadata.container["arch"], "x64");
        assert_eq!(results.metadata.docker_tag, "expf-runner:20.x-bookworm");
        assert!(results.metadata.metadata_error().is_none());
    }

    #[tokio::test]
    async fn test_results_with_bad_or_missing_metadata() {
        let scripts = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        write_script(scripts.path(), "run.sh", READY_SERVER);

        let token = CancellationToken::new();
        let handle = controller(scripts.path())
            .start(&spec(cwd.path()), &image(), &docker(), &token)
            .await
            .unwrap();

        let missing = handle.results().await;
        assert_eq!(missing.metadata.metadata_error().unwrap().code, "ARTIFACT_READ_FAILURE");

        let results_dir = cwd.path().join("results");
        std::fs::create_dir_all(&results_dir).unwrap();
        std::fs::write(results_dir.join("metadata.json"), "{not json").unwrap();
        let broken = handle.results().await;
        assert_eq!(broken.metadata.metadata_error().unwrap().code, "METADATA_PARSE_FAILURE");

        handle.close().await.unwrap();
    }
}
