//! Runner configuration registry.
//!
//! A runner bundles a runtime/APM variant with the environment its image is
//! built and launched with. Runners are looked up by name from an explicit
//! registry rather than loaded from module paths.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// One runtime/APM variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Runner type passed to the build script and used in the image tag.
    /// `None` builds the shared, untyped image.
    pub runner_type: Option<String>,
    pub runtime: String,
    pub apm: String,
    pub capabilities: Vec<String>,
    /// Extra environment for the run script
    pub env: BTreeMap<String, String>,
    /// Pinned runtime version, used together with `node_base`
    pub node_version: Option<String>,
    /// Pinned base OS, used together with `node_version`
    pub node_base: Option<String>,
}

impl RunnerConfig {
    /// Label reported as `RUNTIME_TYPE`
    pub fn type_label(&self) -> &str {
        self.runner_type.as_deref().unwrap_or("docker")
    }

    /// Pinned `(version, os)` when the runner fixes both
    pub fn pinned_image(&self) -> Option<(&str, &str)> {
        match (&self.node_version, &self.node_base) {
            (Some(version), Some(base)) => Some((version.as_str(), base.as_str())),
            _ => None,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn env(items: &[(&str, &str)]) -> BTreeMap<String, String> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Plain Node.js image shared by every test
pub fn docker() -> RunnerConfig {
    RunnerConfig {
        runner_type: None,
        runtime: "node.js".to_string(),
        apm: "none".to_string(),
        capabilities: Vec::new(),
        env: BTreeMap::new(),
        node_version: None,
        node_base: None,
    }
}

/// Node.js with profiling tooling
pub fn vanilla() -> RunnerConfig {
    RunnerConfig {
        runner_type: Some("vanilla".to_string()),
        runtime: "node.js".to_string(),
        apm: "none".to_string(),
        capabilities: strings(&["profiling", "flamegraphs", "heap-snapshots", "perf-data"]),
        env: env(&[("RUNTIME_TYPE", "vanilla")]),
        node_version: None,
        node_base: None,
    }
}

/// N|Solid runtime with built-in monitoring
pub fn nsolid() -> RunnerConfig {
    RunnerConfig {
        runner_type: Some("nsolid".to_string()),
        runtime: "N|Solid".to_string(),
        apm: "built-in".to_string(),
        capabilities: strings(&[
            "profiling",
            "flamegraphs",
            "heap-snapshots",
            "perf-data",
            "nsolid-monitoring",
            "cpu-profiling",
            "heap-profiling",
        ]),
        env: env(&[
            ("RUNTIME_TYPE", "nsolid"),
            ("NSOLID_APPNAME", "express-benchmark"),
            ("NSOLID_TAGS", "benchmark,performance"),
            ("NSOLID_SAAS", ""),
        ]),
        node_version: Some("iron".to_string()),
        node_base: Some("latest".to_string()),
    }
}

/// Registry of runner configurations keyed by name
#[derive(Debug, Clone, Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, RunnerConfig>,
}

impl RunnerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// Registry with the bundled runners
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("docker", docker());
        registry.register("vanilla", vanilla());
        registry.register("nsolid", nsolid());
        registry
    }

    /// Register or replace a runner
    pub fn register(&mut self, name: impl Into<String>, config: RunnerConfig) {
        self.runners.insert(name.into(), config);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.runners.contains_key(name)
    }

    /// Registered runner names, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.runners.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Look up a runner by name
    pub fn get(&self, name: &str) -> AppResult<&RunnerConfig> {
        self.runners
            .get(name)
            .ok_or_else(|| AppError::UnknownRunner(name.to_string()))
    }
}
