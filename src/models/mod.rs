//! Domain models
//!
//! This module contains all domain models used throughout the runner.

pub mod bundle;
pub mod load_report;
pub mod run;

pub use bundle::*;
pub use load_report::*;
pub use run::*;
