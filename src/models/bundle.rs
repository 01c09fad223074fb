//! Result bundle models
//!
//! A [`ResultBundle`] is the terminal record of one run. Every server
//! artifact slot is always present, holding either the file content or the
//! error captured while reading it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::CapturedError;
use crate::metadata::HostMetadata;

use super::load_report::LoadReport;

/// File content or the error captured while reading it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Artifact<T> {
    Content(T),
    Error(CapturedError),
}

impl<T> Artifact<T> {
    pub fn is_content(&self) -> bool {
        matches!(self, Artifact::Content(_))
    }

    pub fn content(&self) -> Option<&T> {
        match self {
            Artifact::Content(value) => Some(value),
            Artifact::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CapturedError> {
        match self {
            Artifact::Content(_) => None,
            Artifact::Error(err) => Some(err),
        }
    }
}

/// Binary artifact, serialized as base64
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryContent(pub Vec<u8>);

impl Serialize for BinaryContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for BinaryContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(BinaryContent)
            .map_err(serde::de::Error::custom)
    }
}

/// Files harvested from the server's results folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerArtifacts {
    pub output: Artifact<String>,
    pub flamegraph: Artifact<String>,
    pub raw_perf_data: Artifact<BinaryContent>,
    pub lockfile: Artifact<String>,
}

/// Key under which a failed `metadata.json` harvest is recorded
pub const METADATA_ERROR_KEY: &str = "error";

const RESERVED_METADATA_KEYS: &[&str] = &[
    "url",
    "dockerTag",
    "nodeVersion",
    "runnerType",
    "runtime",
    "apm",
    "capabilities",
];

/// Server-side metadata, extended with the container's own record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetadata {
    pub url: String,
    pub docker_tag: String,
    pub node_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_type: Option<String>,
    pub runtime: String,
    pub apm: String,
    pub capabilities: Vec<String>,
    /// Fields merged from `results/metadata.json`, or its captured error
    #[serde(flatten)]
    pub container: Map<String, Value>,
}

impl ServerMetadata {
    /// Merge the container's metadata object, keeping the controller's own fields
    pub fn merge_container(&mut self, fields: Map<String, Value>) {
        for (key, value) in fields {
            if RESERVED_METADATA_KEYS.contains(&key.as_str()) {
                tracing::debug!(key = %key, "Ignoring container metadata field shadowing a server field");
                continue;
            }
            self.container.insert(key, value);
        }
    }

    /// Record the error that replaced the container metadata
    pub fn record_error(&mut self, err: CapturedError) {
        let value = serde_json::to_value(&err).unwrap_or(Value::String(err.message.clone()));
        self.container.insert(METADATA_ERROR_KEY.to_string(), value);
    }

    /// Captured metadata error, if the harvest failed
    pub fn metadata_error(&self) -> Option<CapturedError> {
        self.container
            .get(METADATA_ERROR_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Terminal merged record of one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBundle {
    pub server_metadata: ServerMetadata,
    pub client_metadata: HostMetadata,
    pub server_results: ServerArtifacts,
    pub client_results: LoadReport,
}
