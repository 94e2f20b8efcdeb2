//! # accept
//!
//! Evaluation driver for approximate program variants.
//!
//! A benchmark is built and timed once precisely and then once per
//! approximate configuration; every build and every timed replicate is a
//! job that runs in its own sandbox and whose result is memoized by
//! fingerprint, so re-running a sweep only does the work that is missing.
//!
//! ## Modules
//!
//! - [`types`] - Configuration, errors, jobs and outcomes
//! - [`cache`] - Fingerprints and the persistent memo store
//! - [`sandbox`] - Temporary working directories
//! - [`executors`] - Build and run job handlers
//! - [`dispatch`] - Local pool and cluster scheduler backends
//! - [`memo`] - Memoizing submit/get client
//! - [`eval`] - Evaluation workflow and classification
//! - [`report`] - JSON report and text output
//! - [`cli`] - Command-line interface

pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod dispatch;
pub mod eval;
pub mod executors;
pub mod memo;
pub mod report;
pub mod sandbox;
pub mod types;

pub use types::config::{Config, Settings};
pub use types::errors::{AcceptError, AcceptResult};
