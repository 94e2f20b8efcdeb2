//! Where approximate configurations come from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::job::Configuration;
use crate::{AcceptError, AcceptResult};

/// Supplies the approximate configurations to evaluate for a benchmark.
pub trait ConfigSource: Send + Sync {
    fn configurations(&self, appdir: &Path) -> AcceptResult<Vec<Configuration>>;
}

/// Reads a JSON list of knob maps from a file in the benchmark directory:
///
/// ```json
/// [{"loop-perforate": 2}, {"loop-perforate": 4, "npu": 1}]
/// ```
///
/// A missing file means the benchmark has no approximate configurations.
/// Empty maps (the baseline) are skipped.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    file_name: PathBuf,
}

impl FileConfigSource {
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn configurations(&self, appdir: &Path) -> AcceptResult<Vec<Configuration>> {
        let path = appdir.join(&self.file_name);
        if !path.exists() {
            tracing::warn!(path = %path.display(), "no configuration file; only the baseline will be evaluated");
            return Ok(Vec::new());
        }

        let text = std::fs::read_to_string(&path)?;
        let raw: Vec<BTreeMap<String, i64>> = serde_json::from_str(&text).map_err(|e| {
            AcceptError::user(format!("{} is not a list of knob maps: {}", path.display(), e))
        })?;

        let mut configs: Vec<Configuration> = Vec::with_capacity(raw.len());
        for knobs in raw {
            let config = Configuration::from_knobs(knobs);
            if config.is_precise() || configs.contains(&config) {
                continue;
            }
            configs.push(config);
        }
        tracing::debug!(count = configs.len(), path = %path.display(), "configurations loaded");
        Ok(configs)
    }
}

/// Fixed list of configurations.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource(pub Vec<Configuration>);

impl ConfigSource for StaticConfigSource {
    fn configurations(&self, _appdir: &Path) -> AcceptResult<Vec<Configuration>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_knob_maps_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("accept_configs.json"),
            r#"[{"b": 2}, {}, {"a": 1, "b": 3}, {"b": 2}]"#,
        )
        .unwrap();

        let configs = FileConfigSource::new("accept_configs.json")
            .configurations(dir.path())
            .unwrap();
        let keys: Vec<String> = configs.iter().map(|c| c.key()).collect();
        assert_eq!(keys, vec!["b=2", "a=1,b=3"]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let configs = FileConfigSource::new("accept_configs.json")
            .configurations(dir.path())
            .unwrap();
        assert!(configs.is_empty());
    }

    #[test]
    fn test_malformed_file_is_user_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("c.json"), r#"{"not": "a list"}"#).unwrap();
        let err = FileConfigSource::new("c.json")
            .configurations(dir.path())
            .unwrap_err();
        assert!(err.is_user_facing());
    }
}
