//! Application configuration management
//!
//! This module handles loading and validating configuration from environment variables.
//! Everything is loaded once at startup; CLI flags may override the run defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BASE_OS, DEFAULT_CONNECTIONS, DEFAULT_DURATION_SECS, DEFAULT_IMAGE_PREFIX,
    DEFAULT_LOG_FILTER, DEFAULT_READY_MARKER, DEFAULT_REPOSITORY_REF, DEFAULT_REPOSITORY_URL,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RUNNER, DEFAULT_RUNTIME_VERSION, DEFAULT_SCRIPTS_DIR,
    DEFAULT_SERVER_URL, DEFAULT_TEST, DEFAULT_VERSION_INDEX_URL,
};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub run: RunDefaults,
    pub container: ContainerConfig,
    pub server: ServerConfig,
    pub load: LoadConfig,
    pub log: LogConfig,
}

/// Defaults for a single benchmark run
#[derive(Debug, Clone)]
pub struct RunDefaults {
    pub cwd: PathBuf,
    pub repository_url: String,
    pub repository_ref: String,
    pub runner: String,
    pub test: String,
    pub runtime_version: String,
}

/// Image build configuration
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Directory holding `build.sh` and `run.sh`
    pub scripts_dir: PathBuf,
    pub base_os: String,
    pub image_prefix: String,
    pub version_index_url: String,
}

/// Server controller configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Endpoint the server container publishes
    pub url: String,
    pub ready_marker: String,
    /// Forward subprocess output to the host console
    pub echo_output: bool,
}

/// Load generator configuration
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub connections: usize,
    pub duration: Duration,
    /// Stop after this many requests instead of running for `duration`
    pub amount: Option<usize>,
    pub request_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub rust_log: String,
    pub json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            run: RunDefaults::from_env()?,
            container: ContainerConfig::from_env()?,
            server: ServerConfig::from_env()?,
            load: LoadConfig::from_env()?,
            log: LogConfig::from_env()?,
        })
    }
}

impl RunDefaults {
    fn from_env() -> Result<Self, ConfigError> {
        let cwd = match env::var("EXPF_CWD") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => env::current_dir()
                .map_err(|e| ConfigError::InvalidValue(format!("EXPF_CWD ({})", e)))?,
        };

        Ok(Self {
            cwd,
            repository_url: var_or("EXPF_REPO", DEFAULT_REPOSITORY_URL),
            repository_ref: var_or("EXPF_REPO_REF", DEFAULT_REPOSITORY_REF),
            runner: var_or("EXPF_RUNNER", DEFAULT_RUNNER),
            test: var_or("EXPF_TEST", DEFAULT_TEST),
            runtime_version: var_or("EXPF_NODE", DEFAULT_RUNTIME_VERSION),
        })
    }
}

impl ContainerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            scripts_dir: PathBuf::from(var_or("EXPF_SCRIPTS_DIR", DEFAULT_SCRIPTS_DIR)),
            base_os: var_or("EXPF_BASE_OS", DEFAULT_BASE_OS),
            image_prefix: var_or("EXPF_IMAGE_PREFIX", DEFAULT_IMAGE_PREFIX),
            version_index_url: var_or("EXPF_VERSION_INDEX_URL", DEFAULT_VERSION_INDEX_URL),
        })
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from(DEFAULT_SCRIPTS_DIR),
            base_os: DEFAULT_BASE_OS.to_string(),
            image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
            version_index_url: DEFAULT_VERSION_INDEX_URL.to_string(),
        }
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = var_or("EXPF_SERVER_URL", DEFAULT_SERVER_URL);
        reqwest::Url::parse(&url)
            .map_err(|_| ConfigError::InvalidValue("EXPF_SERVER_URL".to_string()))?;

        let ready_marker = var_or("EXPF_READY_MARKER", DEFAULT_READY_MARKER);
        if ready_marker.is_empty() {
            return Err(ConfigError::InvalidValue("EXPF_READY_MARKER".to_string()));
        }

        Ok(Self {
            url,
            ready_marker,
            echo_output: parse_bool("EXPF_ECHO_OUTPUT", true)?,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            ready_marker: DEFAULT_READY_MARKER.to_string(),
            echo_output: true,
        }
    }
}

impl LoadConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let connections: usize = parse_or("EXPF_CONNECTIONS", DEFAULT_CONNECTIONS)?;
        if connections == 0 {
            return Err(ConfigError::InvalidValue("EXPF_CONNECTIONS".to_string()));
        }

        let amount = match env::var("EXPF_AMOUNT") {
            Ok(v) => Some(
                v.parse()
                    .map_err(|_| ConfigError::InvalidValue("EXPF_AMOUNT".to_string()))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            connections,
            duration: Duration::from_secs(parse_or("EXPF_DURATION_SECS", DEFAULT_DURATION_SECS)?),
            amount,
            request_timeout: Duration::from_secs(parse_or(
                "EXPF_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
        })
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            connections: DEFAULT_CONNECTIONS,
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            amount: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl LogConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            rust_log: var_or("RUST_LOG", DEFAULT_LOG_FILTER),
            json: parse_bool("EXPF_LOG_JSON", false)?,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        crate::error::AppError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.url, "http://localhost:3000");
        assert_eq!(server.ready_marker, "Running");

        let container = ContainerConfig::default();
        assert_eq!(container.base_os, "bookworm");
        assert_eq!(container.image_prefix, "expf-runner");

        let load = LoadConfig::default();
        assert_eq!(load.connections, 100);
        assert_eq!(load.duration, Duration::from_secs(60));
        assert!(load.amount.is_none());
    }

    #[test]
    fn test_missing_keys_fall_back() {
        assert_eq!(var_or("EXPF_TEST_UNSET_KEY", "fallback"), "fallback");
        assert_eq!(parse_or("EXPF_TEST_UNSET_NUMBER", 7u64).unwrap(), 7);
        assert!(parse_bool("EXPF_TEST_UNSET_FLAG", true).unwrap());
    }
}
