//! Job fingerprints.
//!
//! A fingerprint is a SHA256 over the handler name and a canonical JSON
//! rendering of the arguments (object keys sorted at every level), so it
//! is the same on every host and in every process.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::job::Job;
use crate::{AcceptError, AcceptResult};

/// Bumped whenever the canonical encoding changes, so old records stop matching.
const FINGERPRINT_VERSION: &str = "accept-job-v1";

/// Deterministic identity of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprints a job.
    pub fn of(job: &Job) -> AcceptResult<Self> {
        Self::compute(&job.function, &job.args)
    }

    /// Fingerprints a handler name plus arguments.
    pub fn compute(function: &str, args: &Value) -> AcceptResult<Self> {
        if function.is_empty() {
            return Err(AcceptError::UnhashableArgument(
                "job has no handler name".to_string(),
            ));
        }

        let mut canonical = String::new();
        write_canonical(args, &mut canonical)?;

        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());
        hasher.update([0u8]);
        hasher.update(function.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());

        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First few hex digits, for log lines and job names.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    /// Wraps a digest read back from storage.
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Renders `value` as JSON with sorted object keys and no whitespace.
fn write_canonical(value: &Value, out: &mut String) -> AcceptResult<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(AcceptError::UnhashableArgument(format!(
                        "non-finite number {n}"
                    )));
                }
            }
            out.push_str(&n.to_string());
        }
        other => out.push_str(&serde_json::to_string(other)?),
    }
    Ok(())
}
