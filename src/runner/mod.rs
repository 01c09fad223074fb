//! Benchmark runner
//!
//! This module contains the run pipeline:
//! - Runner and test registries
//! - Image builds and runtime version resolution
//! - Server and client controllers
//! - Result aggregation and persistence

pub mod aggregator;
pub mod cancel;
pub mod client;
pub mod container;
pub mod load;
pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod requests;
pub mod server;
pub mod versions;

pub use aggregator::{ResultStore, aggregate};
pub use cancel::install_cancellation;
pub use client::{ClientController, ClientHandle};
pub use container::ContainerBuilder;
pub use load::{HttpLoadGenerator, LoadGenerator};
pub use orchestrator::Runner;
pub use registry::{RunnerConfig, RunnerRegistry};
pub use requests::{LoadTest, TestCatalog, test_directory};
pub use server::{ServerController, ServerHandle, ServerResults, ServerStatus};
pub use versions::{FixedVersions, NodeReleaseIndex, VersionResolver};
