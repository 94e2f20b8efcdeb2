//! Configuration for accept.
//!
//! Two layers: [`Config`] is what lives in `accept.toml`, and [`Settings`]
//! is the frozen per-invocation view (file values plus command-line
//! overrides) that gets handed to the memo client and the evaluator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::AcceptResult;

/// Main configuration for accept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Memo store settings.
    #[serde(default)]
    pub memo: MemoConfig,

    /// Local worker pool settings.
    #[serde(default)]
    pub local: LocalConfig,

    /// Cluster scheduler settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// How benchmarks are built.
    #[serde(default)]
    pub build: BuildConfig,

    /// How benchmarks are executed.
    #[serde(default)]
    pub run: RunConfig,

    /// Classification settings.
    #[serde(default)]
    pub eval: EvalConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level used when no `-v` flag is given (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Memo store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoConfig {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Where successful build trees are kept for later runs.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Capacity of the in-process hot layer (number of records).
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity: usize,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            artifact_dir: default_artifact_dir(),
            hot_capacity: default_hot_capacity(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".accept/memo.db")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".accept/builds")
}

fn default_hot_capacity() -> usize {
    256
}

/// Local worker pool settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Maximum number of jobs executing at once. Zero means "one per CPU".
    #[serde(default)]
    pub workers: usize,
}

impl LocalConfig {
    /// Effective pool size.
    pub fn pool_size(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// Cluster scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Submission program.
    #[serde(default = "default_submit_command")]
    pub submit_command: String,

    /// Extra arguments for the submission program. `{name}` and `{log}`
    /// are replaced with the job name and the scheduler log path; the
    /// script path is appended last.
    #[serde(default = "default_submit_args")]
    pub submit_args: Vec<String>,

    /// Directory visible to both this host and the workers.
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,

    /// How often to look for finished results (in milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Give up on a job whose result has not appeared after this many
    /// seconds (queue time included). 0 waits indefinitely.
    #[serde(default = "default_result_timeout")]
    pub result_timeout_secs: u64,

    /// Worker executable; defaults to the running binary.
    #[serde(default)]
    pub worker_exe: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            submit_command: default_submit_command(),
            submit_args: default_submit_args(),
            shared_dir: default_shared_dir(),
            poll_interval_ms: default_poll_interval(),
            result_timeout_secs: default_result_timeout(),
            worker_exe: None,
        }
    }
}

fn default_submit_command() -> String {
    "sbatch".to_string()
}

fn default_submit_args() -> Vec<String> {
    vec![
        "--parsable".to_string(),
        "--job-name={name}".to_string(),
        "--output={log}".to_string(),
    ]
}

fn default_shared_dir() -> PathBuf {
    PathBuf::from(".accept/cluster")
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_result_timeout() -> u64 {
    48 * 3600
}

impl ClusterConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Result deadline, `None` when disabled.
    pub fn result_timeout(&self) -> Option<Duration> {
        (self.result_timeout_secs > 0).then(|| Duration::from_secs(self.result_timeout_secs))
    }
}

/// Build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build program.
    #[serde(default = "default_build_command")]
    pub command: String,

    /// Build program arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Optimization log written by the compiler during the build.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// File the knob settings are written to before an approximate build.
    #[serde(default = "default_config_file")]
    pub config_file: String,

    /// Build timeout (in seconds).
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            args: Vec::new(),
            log_file: default_log_file(),
            config_file: default_config_file(),
            timeout_secs: default_build_timeout(),
        }
    }
}

fn default_build_command() -> String {
    "make".to_string()
}

fn default_log_file() -> String {
    "accept_log.txt".to_string()
}

fn default_config_file() -> String {
    "accept_config.txt".to_string()
}

fn default_build_timeout() -> u64 {
    3600
}

/// Execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run program.
    #[serde(default = "default_run_command")]
    pub command: String,

    /// Run program arguments.
    #[serde(default = "default_run_args")]
    pub args: Vec<String>,

    /// File the program writes its numeric output to.
    #[serde(default = "default_output_file")]
    pub output_file: String,

    /// Per-replicate timeout (in seconds).
    #[serde(default = "default_run_timeout")]
    pub timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            command: default_run_command(),
            args: default_run_args(),
            output_file: default_output_file(),
            timeout_secs: default_run_timeout(),
        }
    }
}

fn default_run_command() -> String {
    "make".to_string()
}

fn default_run_args() -> Vec<String> {
    vec!["run".to_string()]
}

fn default_output_file() -> String {
    "my_output.txt".to_string()
}

fn default_run_timeout() -> u64 {
    600
}

/// Classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Maximum aggregate deviation still classified as good.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// File in the benchmark directory listing approximate configurations.
    #[serde(default = "default_configs_file")]
    pub configs_file: String,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            configs_file: default_configs_file(),
        }
    }
}

fn default_tolerance() -> f64 {
    0.3
}

fn default_configs_file() -> String {
    "accept_configs.json".to_string()
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> AcceptResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AcceptResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Loads `path` if it exists, then the per-user config file, then
    /// falls back to defaults.
    pub fn load_or_default(path: &Path) -> AcceptResult<Self> {
        if path.exists() {
            return Self::load(path);
        }
        if let Some(user) = Self::user_config_path() {
            if user.exists() {
                return Self::load(user);
            }
        }
        Ok(Self::default())
    }

    /// `<config dir>/accept/accept.toml`, when the platform has one.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("accept").join("accept.toml"))
    }
}

/// Which dispatch backend a client drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Bounded in-process worker pool.
    Local,
    /// External batch scheduler.
    Cluster,
}

/// Immutable settings for one invocation.
///
/// Built once from [`Config`] and the global command-line options, then
/// shared by reference. Nothing downstream mutates it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: Config,
    pub backend: BackendKind,
    /// Ignore memoized results and overwrite them.
    pub force: bool,
    /// Replication factor while exploring configurations.
    pub reps: usize,
    /// Replication factor for the verification pass.
    pub test_reps: usize,
    /// Leave sandbox directories behind for inspection.
    pub keep_sandboxes: bool,
}

impl Settings {
    /// Freezes a configuration with the global overrides.
    ///
    /// `test_reps` falls back to `reps` when not given.
    pub fn new(
        config: Config,
        backend: BackendKind,
        force: bool,
        reps: usize,
        test_reps: Option<usize>,
        keep_sandboxes: bool,
    ) -> Self {
        let reps = reps.max(1);
        Self {
            config,
            backend,
            force,
            reps,
            test_reps: test_reps.filter(|r| *r > 0).unwrap_or(reps),
            keep_sandboxes,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(Config::default(), BackendKind::Local, false, 1, None, false)
    }
}
