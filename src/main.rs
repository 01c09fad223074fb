//! expf - Application Entry Point
//!
//! `expf load` runs one benchmark and persists its result bundle.
//! `expf metadata` prints the host record; server images call it too.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use expf::{
    config::{Config, LogConfig},
    metadata::collect_metadata,
    models::RunSpec,
    runner::{ResultStore, Runner, RunnerRegistry, install_cancellation, test_directory},
};

use cli::{Cli, Command};

/// Exit status for a cancelled run, as for SIGINT
const ABORTED_EXIT: u8 = 130;

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log.rust_log.clone().into());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            log.json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!log.json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    init_tracing(&config.log);

    match cli.command {
        Command::Metadata => {
            let metadata = collect_metadata()?;
            println!("{}", serde_json::to_string(&metadata)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Load(args) => {
            args.apply(&mut config);
            load(config, args.overrides).await
        }
    }
}

async fn load(config: Config, overrides: Option<String>) -> anyhow::Result<ExitCode> {
    let registry = RunnerRegistry::builtin();
    let runner_config = registry.get(&config.run.runner)?.clone();
    let runner = Runner::from_config(&config, runner_config)?;

    let run = &config.run;
    let mut spec = RunSpec::new(
        &run.cwd,
        &run.repository_url,
        &run.repository_ref,
        &run.test,
        &run.runtime_version,
    );
    if let Some(overrides) = overrides {
        spec = spec.with_overrides(overrides)?;
    }

    tracing::info!(
        runner = %run.runner,
        test = %spec.test,
        node = %spec.runtime_version_request,
        cwd = %spec.working_directory.display(),
        "Starting load test"
    );

    let token = CancellationToken::new();
    let signals = install_cancellation(&token);
    let outcome = runner.run(&spec, &token).await;
    signals.abort();

    match outcome {
        Ok(bundle) => {
            let store = ResultStore::new(&run.cwd);
            let path = store.persist(&bundle, &test_directory(&spec.test)).await?;
            println!("written to: {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_aborted() => {
            tracing::info!("Run aborted, nothing written");
            Ok(ExitCode::from(ABORTED_EXIT))
        }
        Err(e) => {
            tracing::error!(code = e.error_code(), error = %e, "Run failed");
            Ok(ExitCode::FAILURE)
        }
    }
}
