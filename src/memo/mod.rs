//! Memoizing task dispatch.
//!
//! [`MemoClient`] combines the fingerprinter, the memo store and a dispatch
//! backend behind a two-phase protocol:
//!
//! ```text
//! submit(job)  ── fingerprint ──> store hit? ── yes ──> remember value
//!                                     │
//!                                     no ──> backend.submit (deduplicated)
//!
//! get(job)     ── remembered? ── yes ──> value
//!                     │
//!                     no ──> backend.wait ──> store.insert ──> value
//! ```

mod client;

pub use client::MemoClient;
