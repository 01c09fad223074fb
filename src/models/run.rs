//! Run input and image models

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Immutable input to one benchmark run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    /// Working directory shared with the server container
    pub working_directory: PathBuf,
    pub repository_url: String,
    pub repository_ref: String,
    /// Load test name, resolved through the test catalog
    pub test: String,
    /// Version alias or concrete version, e.g. `lts`, `iron`, `20.11.0`
    pub runtime_version_request: String,
    /// JSON object of dependency overrides, forwarded verbatim to the run script
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_overrides: Option<String>,
}

impl RunSpec {
    /// Create a spec without dependency overrides
    pub fn new(
        working_directory: impl Into<PathBuf>,
        repository_url: impl Into<String>,
        repository_ref: impl Into<String>,
        test: impl Into<String>,
        runtime_version_request: impl Into<String>,
    ) -> Self {
        Self {
            working_directory: working_directory.into(),
            repository_url: repository_url.into(),
            repository_ref: repository_ref.into(),
            test: test.into(),
            runtime_version_request: runtime_version_request.into(),
            dependency_overrides: None,
        }
    }

    /// Attach dependency overrides; the payload must be a JSON object
    pub fn with_overrides(mut self, overrides: impl Into<String>) -> AppResult<Self> {
        let overrides = overrides.into();
        let parsed: serde_json::Value = serde_json::from_str(&overrides)
            .map_err(|e| AppError::Validation(format!("overrides are not valid JSON: {}", e)))?;
        if !parsed.is_object() {
            return Err(AppError::Validation(
                "overrides must be a JSON object of dependency -> version".to_string(),
            ));
        }
        self.dependency_overrides = Some(overrides);
        Ok(self)
    }

    /// Check required fields before any stage is entered
    pub fn validate(&self) -> AppResult<()> {
        if self.test.trim().is_empty() {
            return Err(AppError::Validation("test name is empty".to_string()));
        }
        if self.repository_url.trim().is_empty() {
            return Err(AppError::Validation("repository url is empty".to_string()));
        }
        if self.runtime_version_request.trim().is_empty() {
            return Err(AppError::Validation("runtime version is empty".to_string()));
        }
        Ok(())
    }
}

/// Built runner image, produced once per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageHandle {
    pub tag: String,
    pub runtime_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_type: Option<String>,
    pub runtime: String,
    pub apm: String,
}

/// One request in a load test's request list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestSpec {
    /// Plain GET without headers
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RunSpec {
        RunSpec::new("/tmp/work", "https://example.com/repo.git", "main", "example", "lts")
    }

    #[test]
    fn test_overrides_must_be_object() {
        let ok = spec().with_overrides(r#"{"express":"latest"}"#).unwrap();
        assert_eq!(ok.dependency_overrides.as_deref(), Some(r#"{"express":"latest"}"#));

        assert!(matches!(
            spec().with_overrides("[1,2]"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            spec().with_overrides("{not json"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(spec().validate().is_ok());

        let mut blank = spec();
        blank.test = "  ".into();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_request_defaults() {
        let req: RequestSpec = serde_json::from_str(r#"{"path":"/?foo=boo"}"#).unwrap();
        assert_eq!(req, RequestSpec::get("/?foo=boo"));
    }
}
