//! Application-wide constants
//!
//! This module contains all constant values used throughout the runner.
//! Constants are grouped by their purpose for better organization.

// =============================================================================
// RUN DEFAULTS
// =============================================================================

/// Default repository cloned inside the server container
pub const DEFAULT_REPOSITORY_URL: &str = "https://github.com/expressjs/perf-wg.git";

/// Default git ref of the repository
pub const DEFAULT_REPOSITORY_REF: &str = "master";

/// Default runner configuration name
pub const DEFAULT_RUNNER: &str = "docker";

/// Default load test name
pub const DEFAULT_TEST: &str = "example";

/// Default runtime version request
pub const DEFAULT_RUNTIME_VERSION: &str = "lts_latest";

// =============================================================================
// CONTAINER DEFAULTS
// =============================================================================

/// Directory holding `build.sh` and `run.sh`
pub const DEFAULT_SCRIPTS_DIR: &str = "scripts";

/// Base OS of runner images
pub const DEFAULT_BASE_OS: &str = "bookworm";

/// Image repository prefix; typed runners append `-{type}`
pub const DEFAULT_IMAGE_PREFIX: &str = "expf-runner";

/// Version used when the catalog yields no candidate
pub const FALLBACK_RUNTIME_VERSION: &str = "lts";

/// Node.js release index consulted for version aliases
pub const DEFAULT_VERSION_INDEX_URL: &str = "https://nodejs.org/dist/index.json";

/// Name of the image build script
pub const BUILD_SCRIPT: &str = "build.sh";

/// Name of the server launch script
pub const RUN_SCRIPT: &str = "run.sh";

/// Environment variable carrying the runner type into the run script
pub const RUNTIME_TYPE_ENV: &str = "RUNTIME_TYPE";

// =============================================================================
// SERVER DEFAULTS
// =============================================================================

/// Endpoint published by the server container
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Substring the run script prints once the server accepts connections
pub const DEFAULT_READY_MARKER: &str = "Running";

// =============================================================================
// LOAD DEFAULTS
// =============================================================================

/// Concurrent connections held open by the load generator
pub const DEFAULT_CONNECTIONS: usize = 100;

/// Load duration in seconds
pub const DEFAULT_DURATION_SECS: u64 = 60;

/// Per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// RESULT LAYOUT
// =============================================================================

/// Results subfolder of the working directory, also used under test dirs
pub const RESULTS_DIR: &str = "results";

/// Directory holding load test definitions, relative to the working directory
pub const TESTS_DIR: &str = "perf/load";

/// Request list file name inside a test directory
pub const REQUESTS_FILE: &str = "requests.json";

/// Result file names written by the server container
pub mod result_files {
    pub const OUTPUT: &str = "output.txt";
    pub const FLAMEGRAPH: &str = "profile.svg";
    pub const RAW_PERF_DATA: &str = "perf.data";
    pub const METADATA: &str = "metadata.json";
    pub const LOCKFILE: &str = "package-lock.json";
}

// =============================================================================
// LOGGING
// =============================================================================

/// Default tracing filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "expf=info";
