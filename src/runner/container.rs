//! Runner image builds.
//!
//! The builder resolves the requested runtime version, then invokes the
//! external `build.sh` script with `{version} {os} [runner_type]`. Script
//! output is forwarded to the console while it runs. The script decides how
//! the image is produced; the builder only owns the tag.

use std::sync::Arc;

use crate::config::ContainerConfig;
use crate::constants::{BUILD_SCRIPT, FALLBACK_RUNTIME_VERSION};
use crate::error::{AppError, AppResult};
use crate::models::ImageHandle;

use super::process::{Stream, forward_lines, script_command, script_path};
use super::registry::RunnerConfig;
use super::versions::VersionResolver;

/// Builds runner images through the external build script
pub struct ContainerBuilder {
    config: ContainerConfig,
    resolver: Arc<dyn VersionResolver>,
    echo_output: bool,
}

impl ContainerBuilder {
    pub fn new(config: ContainerConfig, resolver: Arc<dyn VersionResolver>) -> Self {
        Self {
            config,
            resolver,
            echo_output: true,
        }
    }

    /// Toggle forwarding of build output to the console
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    /// Image tag for a runner type, version and OS
    pub fn image_tag(&self, runner_type: Option<&str>, version: &str, os: &str) -> String {
        match runner_type {
            Some(kind) => format!("{}-{}:{}-{}", self.config.image_prefix, kind, version, os),
            None => format!("{}:{}-{}", self.config.image_prefix, version, os),
        }
    }

    /// Pick the `(version, os)` pair for a build
    async fn select_version(&self, request: &str, runner: &RunnerConfig) -> (String, String) {
        if let Some((version, os)) = runner.pinned_image() {
            return (version.to_string(), os.to_string());
        }

        let version = match self.resolver.resolve(request, true).await {
            Ok(candidates) => candidates.into_iter().next(),
            Err(e) => {
                tracing::warn!(request = %request, error = %e, "Version resolution failed, using fallback");
                None
            }
        };

        (
            version.unwrap_or_else(|| FALLBACK_RUNTIME_VERSION.to_string()),
            self.config.base_os.clone(),
        )
    }

    /// Build the runner image for `request` and return its handle
    pub async fn build(&self, request: &str, runner: &RunnerConfig) -> AppResult<ImageHandle> {
        let (version, os) = self.select_version(request, runner).await;
        let tag = self.image_tag(runner.runner_type.as_deref(), &version, &os);

        let script = script_path(&self.config.scripts_dir, BUILD_SCRIPT)
            .await
            .map_err(|e| {
                AppError::BuildFailure(format!(
                    "scripts directory {}: {}",
                    self.config.scripts_dir.display(),
                    e
                ))
            })?;

        let mut cmd = script_command(&script);
        cmd.arg(&version).arg(&os);
        if let Some(kind) = &runner.runner_type {
            cmd.arg(kind);
        }

        tracing::info!(tag = %tag, version = %version, os = %os, "Building runner image");

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::BuildFailure(format!("failed to spawn {}: {}", script.display(), e)))?;

        let echo = self.echo_output;
        let stdout = child.stdout.take().map(|out| {
            tokio::spawn(async move { forward_lines(out, Stream::Stdout, echo, |_| {}).await })
        });
        let stderr = child.stderr.take().map(|err| {
            tokio::spawn(async move { forward_lines(err, Stream::Stderr, echo, |_| {}).await })
        });

        let status = child
            .wait()
            .await
            .map_err(|e| AppError::BuildFailure(format!("failed to wait for build: {}", e)))?;

        for task in [stdout, stderr].into_iter().flatten() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Build output forwarder failed");
            }
        }

        if !status.success() {
            return Err(AppError::BuildFailure(match status.code() {
                Some(code) => format!("{} exited with code {}", BUILD_SCRIPT, code),
                None => format!("{} terminated by signal", BUILD_SCRIPT),
            }));
        }

        tracing::info!(tag = %tag, "Runner image ready");

        Ok(ImageHandle {
            tag,
            runtime_version: version,
            runner_type: runner.runner_type.clone(),
            runtime: runner.runtime.clone(),
            apm: runner.apm.clone(),
        })
    }
}
