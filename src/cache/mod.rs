//! Memo store and job fingerprinting.
//!
//! Results of build and run jobs are kept under the fingerprint of the job
//! that produced them, so repeating an experiment sweep skips work that is
//! already done. Records persist in SQLite with an LRU layer in front.

mod fingerprint;
mod lru;
mod store;

pub use fingerprint::Fingerprint;
pub use lru::{CacheStats, HotCache};
pub use store::MemoStore;
