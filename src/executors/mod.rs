//! Job handlers.
//!
//! A job names one of these handlers and carries all of its arguments, so
//! it can execute in-process or in a worker on another machine:
//!
//! - `build`: builds one configuration in a sandbox and persists the tree
//! - `run`: times one replicate from a persisted build tree

mod base;
mod build;
mod demangle;
mod run;

pub use base::{JobHandler, JobRegistry};
pub use build::{benchmark_dir, BuildArgs, BuildHandler, BUILD_JOB};
pub use demangle::{CommandDemangler, Demangler, NoopDemangler};
pub use run::{load_output, Phase, RunArgs, RunHandler, RUN_JOB};
