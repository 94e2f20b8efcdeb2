//! Evaluation of program variants.
//!
//! For each benchmark:
//!
//! 1. build and run the precise baseline; its first successful output is
//!    the reference
//! 2. build every approximate configuration (a failed build is an `error`
//!    result, not an error)
//! 3. run each built configuration `reps` times
//! 4. score each replicate against the reference and classify
//! 5. optionally re-run the `good` ones at `test_reps`

mod classify;
mod evaluator;
mod score;
mod source;

pub use classify::{assess, classify, speedup, Baseline};
pub use evaluator::{BaselineRun, Evaluator};
pub use score::{replicate_deviation, MeanClampedError, Scorer};
pub use source::{ConfigSource, FileConfigSource, StaticConfigSource};
