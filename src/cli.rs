//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use expf::config::Config;

#[derive(Debug, Parser)]
#[command(name = "expf", version, about = "HTTP server performance testing")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test and write its result bundle
    Load(LoadArgs),
    /// Print host metadata as JSON
    Metadata,
}

/// Flags for `expf load`. Unset flags fall back to the environment.
#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Working directory shared with the server container
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Runner configuration name
    #[arg(short = 'u', long)]
    pub runner: Option<String>,

    /// Repository the server is cloned from
    #[arg(long)]
    pub repo: Option<String>,

    #[arg(long = "repo-ref")]
    pub repo_ref: Option<String>,

    /// Load test name
    #[arg(short = 't', long)]
    pub test: Option<String>,

    /// Runtime version or alias, e.g. `lts_latest`, `iron`, `22`
    #[arg(short = 'n', long)]
    pub node: Option<String>,

    /// Dependency overrides as a JSON object, e.g. '{"express":"latest"}'
    #[arg(short = 'o', long)]
    pub overrides: Option<String>,

    /// Concurrent connections
    #[arg(long)]
    pub connections: Option<usize>,

    /// Load duration in seconds
    #[arg(long)]
    pub duration: Option<u64>,

    /// Stop after this many requests
    #[arg(long)]
    pub amount: Option<usize>,
}

impl LoadArgs {
    /// Apply flags on top of the environment configuration
    pub fn apply(&self, config: &mut Config) {
        let run = &mut config.run;
        if let Some(cwd) = &self.cwd {
            run.cwd = cwd.clone();
        }
        if let Some(runner) = &self.runner {
            run.runner = runner.clone();
        }
        if let Some(repo) = &self.repo {
            run.repository_url = repo.clone();
        }
        if let Some(repo_ref) = &self.repo_ref {
            run.repository_ref = repo_ref.clone();
        }
        if let Some(test) = &self.test {
            run.test = test.clone();
        }
        if let Some(node) = &self.node {
            run.runtime_version = node.clone();
        }

        let load = &mut config.load;
        if let Some(connections) = self.connections {
            load.connections = connections;
        }
        if let Some(secs) = self.duration {
            load.duration = std::time::Duration::from_secs(secs);
        }
        if self.amount.is_some() {
            load.amount = self.amount;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_load_flags() {
        let cli = Cli::parse_from([
            "expf",
            "load",
            "-t",
            "simple-query",
            "-n",
            "iron",
            "--repo-ref",
            "v5",
            "-o",
            r#"{"express":"latest"}"#,
        ]);
        let Command::Load(args) = cli.command else {
            panic!("expected load command");
        };
        assert_eq!(args.test.as_deref(), Some("simple-query"));
        assert_eq!(args.node.as_deref(), Some("iron"));
        assert_eq!(args.repo_ref.as_deref(), Some("v5"));
        assert!(args.overrides.is_some());
        assert!(args.runner.is_none());
    }

    #[test]
    fn test_metadata_command() {
        let cli = Cli::parse_from(["expf", "metadata"]);
        assert!(matches!(cli.command, Command::Metadata));
    }
}
