//! expf - HTTP server benchmark runner
//!
//! Builds an isolated server image for a runtime version, starts the server,
//! drives HTTP load against it and merges both sides into a result bundle.
//!
//! # Architecture
//!
//! - **Runner**: build, server, client and harvest stages (`runner`)
//! - **Models**: run inputs, load statistics and result bundles
//! - **Metadata**: host facts recorded on both sides of a run

pub mod config;
pub mod constants;
pub mod error;
pub mod metadata;
pub mod models;
pub mod runner;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, AppResult};
pub use runner::{Runner, RunnerRegistry};
