//! Shell-script benchmark used by the integration tests.
//!
//! `build.sh` records each invocation, fails for a `broken` knob and
//! leaves the knob file behind as `variant.txt`. `run.sh` records each
//! invocation, crashes for a `crash` knob, fails the first replicate that
//! claims the `<count file>.flaky` marker for a `flaky` knob and otherwise
//! prints `1 + scale / 100`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use accept::types::config::{BackendKind, Config, Settings};
use tempfile::TempDir;

pub const BUILD_SH: &str = r#"echo built >> "$1"
if [ -f accept_config.txt ] && grep -q '^broken ' accept_config.txt; then
  echo "error: broken knob" >&2
  exit 1
fi
echo "remark: loop perforated" > accept_log.txt
if [ -f accept_config.txt ]; then cp accept_config.txt variant.txt; else : > variant.txt; fi
echo compiled
"#;

pub const RUN_SH: &str = r#"echo ran >> "$1"
if grep -q '^crash ' variant.txt; then
  echo "segfault" >&2
  exit 3
fi
if grep -q '^flaky ' variant.txt && mkdir "$1.flaky" 2>/dev/null; then
  echo "transient failure" >&2
  exit 4
fi
level=$(awk '$1 == "scale" { print $2 }' variant.txt)
[ -z "$level" ] && level=0
awk -v l="$level" 'BEGIN { printf "%.4f\n", 1 + l / 100 }' > my_output.txt
"#;

/// A benchmark directory plus everything the tests need to inspect.
pub struct Bench {
    pub root: TempDir,
    pub appdir: PathBuf,
    pub build_count: PathBuf,
    pub run_count: PathBuf,
}

impl Bench {
    /// Creates `<tmp>/<name>` with the scripts and the given configurations
    /// (raw JSON for accept_configs.json).
    pub fn new(name: &str, configs_json: &str) -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let appdir = root.path().join(name);
        fs::create_dir(&appdir).unwrap();
        fs::write(appdir.join("build.sh"), BUILD_SH).unwrap();
        fs::write(appdir.join("run.sh"), RUN_SH).unwrap();
        fs::write(appdir.join("accept_configs.json"), configs_json).unwrap();

        let build_count = root.path().join("builds.count");
        let run_count = root.path().join("runs.count");
        Self {
            root,
            appdir,
            build_count,
            run_count,
        }
    }

    /// Configuration pointing every path into the temp directory.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.memo.db_path = self.root.path().join("state").join("memo.db");
        config.memo.artifact_dir = self.root.path().join("state").join("builds");
        config.cluster.shared_dir = self.root.path().join("state").join("cluster");
        config.local.workers = 4;
        config.build.command = "sh".to_string();
        config.build.args = vec!["build.sh".to_string(), path_str(&self.build_count)];
        config.run.command = "sh".to_string();
        config.run.args = vec!["run.sh".to_string(), path_str(&self.run_count)];
        config.run.timeout_secs = 30;
        config.eval.tolerance = 0.05;
        config
    }

    pub fn settings(&self, reps: usize, force: bool) -> Settings {
        Settings::new(self.config(), BackendKind::Local, force, reps, None, false)
    }

    pub fn builds(&self) -> usize {
        count_lines(&self.build_count)
    }

    pub fn runs(&self) -> usize {
        count_lines(&self.run_count)
    }

    /// Writes the configuration as accept.toml next to the benchmark.
    pub fn write_toml(&self) -> PathBuf {
        let path = self.root.path().join("accept.toml");
        self.config().save(&path).unwrap();
        path
    }
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn count_lines(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}
