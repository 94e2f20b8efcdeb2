//! Shared types.

pub mod config;
pub mod errors;
pub mod evaluation;
pub mod job;

pub use config::{BackendKind, Config, Settings};
pub use errors::{AcceptError, AcceptResult, JobFailure};
pub use evaluation::{BuildOutcome, EvaluationResult, RunOutcome, Status};
pub use job::{Configuration, Job};
