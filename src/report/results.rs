//! Persistent JSON report.
//!
//! ```json
//! {
//!   "sobel": {
//!     "precise": {"status": "precise", "speedup": 1.0, ...},
//!     "perforate=2": {"status": "good", "deviation": 0.01, "speedup": 1.8},
//!     "time": {"precise": [2.01, 1.98], "perforate=2": [1.1, 1.12]}
//!   }
//! }
//! ```
//!
//! Benchmarks already in the file keep the keys a new run does not touch.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::dispatch::write_atomic;
use crate::types::evaluation::EvaluationResult;
use crate::AcceptResult;

/// Default report file name.
pub const RESULTS_JSON: &str = "results.json";

/// Key of the per-benchmark timing section.
pub const TIME_SECTION: &str = "time";

#[derive(Debug, Serialize)]
struct Metrics<'a> {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    deviation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speedup: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Report entry for one benchmark.
pub fn benchmark_entry(
    baseline: &EvaluationResult,
    results: &[EvaluationResult],
    include_time: bool,
) -> AcceptResult<Map<String, Value>> {
    let mut entry = Map::new();
    let mut times = Map::new();

    for result in std::iter::once(baseline).chain(results) {
        let key = result.config.key();
        let metrics = Metrics {
            status: result.status.to_string(),
            deviation: result.deviation,
            speedup: result.speedup,
            time: result.mean_duration(),
            error: result.error.as_deref(),
        };
        entry.insert(key.clone(), serde_json::to_value(metrics)?);
        times.insert(key, serde_json::to_value(&result.durations)?);
    }

    if include_time {
        entry.insert(TIME_SECTION.to_string(), Value::Object(times));
    }
    Ok(entry)
}

/// The accumulated `results.json`.
#[derive(Debug, Clone)]
pub struct ResultsFile {
    path: PathBuf,
    benchmarks: Map<String, Value>,
}

impl ResultsFile {
    /// Loads `path`; a missing file is an empty report.
    pub fn load(path: impl Into<PathBuf>) -> AcceptResult<Self> {
        let path = path.into();
        let benchmarks = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Value>(&text)? {
                Value::Object(map) => map,
                _ => {
                    tracing::warn!(path = %path.display(), "report is not a JSON object; starting over");
                    Map::new()
                }
            }
        } else {
            Map::new()
        };
        Ok(Self { path, benchmarks })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merges `entry` into the benchmark's existing entry, key by key.
    pub fn merge(&mut self, benchmark: &str, entry: Map<String, Value>) {
        let slot = self
            .benchmarks
            .entry(benchmark.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(existing) = slot {
            existing.extend(entry);
        }
    }

    pub fn get(&self, benchmark: &str) -> Option<&Value> {
        self.benchmarks.get(benchmark)
    }

    /// Writes the report back, pretty-printed with sorted keys.
    pub fn save(&self) -> AcceptResult<()> {
        // serde_json's Map is ordered by key.
        let mut text = serde_json::to_string_pretty(&self.benchmarks)?;
        text.push('\n');
        write_atomic(&self.path, text.as_bytes())
    }
}
