//! Result reporting: the accumulated JSON report and text dumps.

mod human;
mod results;

pub use human::{dump_approx, dump_precise, dump_results};
pub use results::{benchmark_entry, ResultsFile, RESULTS_JSON, TIME_SECTION};
