//! Load test catalog
//!
//! Maps test names to request lists. Built-in tests carry their list inline;
//! any other test is looked up as `perf/load/{name}/requests.json` under the
//! working directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::constants::{REQUESTS_FILE, TESTS_DIR};
use crate::error::{AppError, AppResult};
use crate::models::RequestSpec;

/// Request list that only hits the root path
pub fn basic_paths() -> Vec<RequestSpec> {
    vec![RequestSpec::get("/")]
}

/// Query-string parsing workload
pub fn query_paths() -> Vec<RequestSpec> {
    ["/", "/?foo=boo", "/?foo=boo&bar=far", "/?foz=baz&foz=faz"]
        .into_iter()
        .map(RequestSpec::get)
        .collect()
}

/// Test directory for `name`, relative to the working directory
pub fn test_directory(name: &str) -> PathBuf {
    Path::new(TESTS_DIR).join(name)
}

/// A resolved load test
#[derive(Debug, Clone)]
pub struct LoadTest {
    pub name: String,
    pub requests: Vec<RequestSpec>,
}

/// Registry of load tests keyed by name
#[derive(Debug, Clone, Default)]
pub struct TestCatalog {
    tests: HashMap<String, Vec<RequestSpec>>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self {
            tests: HashMap::new(),
        }
    }

    /// Catalog with the bundled tests
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("example", basic_paths());
        catalog.register("node-http", basic_paths());
        catalog.register("simple-query", query_paths());
        catalog.register("urlsearchparams-query", query_paths());
        catalog
    }

    pub fn register(&mut self, name: impl Into<String>, requests: Vec<RequestSpec>) {
        self.tests.insert(name.into(), requests);
    }

    /// Resolve a test name to its request list
    pub async fn resolve(&self, name: &str, cwd: &Path) -> AppResult<LoadTest> {
        let requests = match self.tests.get(name) {
            Some(requests) => requests.clone(),
            None => {
                let path = cwd.join(test_directory(name)).join(REQUESTS_FILE);
                if !fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(AppError::UnknownTest(name.to_string()));
                }
                load_requests(&path).await?
            }
        };

        if requests.is_empty() {
            return Err(AppError::Validation(format!(
                "test '{}' has an empty request list",
                name
            )));
        }

        Ok(LoadTest {
            name: name.to_string(),
            requests,
        })
    }
}

/// Read a JSON request list
pub async fn load_requests(path: &Path) -> AppResult<Vec<RequestSpec>> {
    let raw = fs::read_to_string(path).await?;
    let requests: Vec<RequestSpec> = serde_json::from_str(&raw)?;
    tracing::debug!(path = %path.display(), count = requests.len(), "Loaded request list");
    Ok(requests)
}
