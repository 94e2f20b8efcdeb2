//! Command-line interface for accept.

pub mod commands;

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::types::config::{BackendKind, Config, Settings};

/// accept - the ACCEPT approximate compiler driver.
#[derive(Parser, Debug)]
#[command(name = "accept")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "accept.toml")]
    pub config: PathBuf,

    /// Log more output (repeat for more).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Execute on the cluster scheduler.
    #[arg(short = 'c', long)]
    pub cluster: bool,

    /// Ignore and overwrite memoized results.
    #[arg(short, long)]
    pub force: bool,

    /// Replication factor.
    #[arg(short, long, default_value_t = 1)]
    pub reps: usize,

    /// Testing replication factor (defaults to --reps).
    #[arg(short = 'R', long)]
    pub test_reps: Option<usize>,

    /// Do not delete sandbox directories.
    #[arg(short, long)]
    pub keep_sandboxes: bool,

    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Freezes the loaded configuration together with the global options.
    pub fn settings(&self, config: Config) -> Settings {
        let backend = if self.cluster {
            BackendKind::Cluster
        } else {
            BackendKind::Local
        };
        Settings::new(
            config,
            backend,
            self.force,
            self.reps,
            self.test_reps,
            self.keep_sandboxes,
        )
    }

    /// Log level selected by `-v`, or `fallback` without it.
    pub fn log_level<'a>(&self, fallback: &'a str) -> &'a str {
        match self.verbose {
            0 => fallback,
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the workflow for a benchmark and show the good configurations.
    Run {
        /// Benchmark directory.
        #[arg(default_value = ".")]
        appdir: PathBuf,

        /// Show suboptimal results too.
        #[arg(short, long)]
        verbose: bool,

        /// Re-run the good configurations at the testing replication factor.
        #[arg(short, long)]
        test: bool,
    },

    /// Run experiments over several benchmarks.
    Exp {
        /// Benchmark directories.
        #[arg(required = true)]
        appdirs: Vec<PathBuf>,

        /// Accumulate results into results.json.
        #[arg(short, long)]
        json: bool,

        /// Keep per-replicate timings in results.json.
        #[arg(short, long)]
        time: bool,

        /// Only evaluate benchmarks with these names.
        #[arg(short, long)]
        only: Vec<String>,

        /// Show suboptimal results too.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Build a benchmark and show the compiler output.
    Build {
        #[arg(default_value = ".")]
        appdir: PathBuf,
    },

    /// Build a benchmark and show the optimization log.
    Log {
        #[arg(default_value = ".")]
        appdir: PathBuf,
    },

    /// Execute the baseline version of a benchmark.
    Precise {
        #[arg(default_value = ".")]
        appdir: PathBuf,
    },

    /// Execute approximate versions of a benchmark.
    Approx {
        /// Configuration index; -1 runs all of them.
        #[arg(default_value_t = -1, allow_negative_numbers = true)]
        num: i64,

        #[arg(default_value = ".")]
        appdir: PathBuf,
    },

    /// Execute one serialized job (used by cluster submissions).
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        job: PathBuf,

        #[arg(long)]
        result: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_options() {
        let cli = Cli::parse_from(["accept", "-vv", "-c", "-f", "-r", "3", "run", "-t", "bench"]);
        assert_eq!(cli.log_level("warn"), "debug");

        let settings = cli.settings(Config::default());
        assert_eq!(settings.backend, BackendKind::Cluster);
        assert!(settings.force);
        assert_eq!(settings.reps, 3);
        assert_eq!(settings.test_reps, 3);

        match cli.command {
            Commands::Run { appdir, test, verbose } => {
                assert_eq!(appdir, PathBuf::from("bench"));
                assert!(test);
                assert!(!verbose);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_command_surface() {
        use clap::CommandFactory;

        let visible: Vec<String> = Cli::command()
            .get_subcommands()
            .filter(|c| !c.is_hide_set())
            .map(|c| c.get_name().to_string())
            .collect();
        assert_eq!(visible, ["run", "exp", "build", "log", "precise", "approx"]);
        assert!(Cli::try_parse_from(["accept", "worker", "--job", "j", "--result", "r"]).is_ok());
    }

    #[test]
    fn test_approx_accepts_negative_index() {
        let cli = Cli::parse_from(["accept", "approx", "-1", "bench"]);
        match cli.command {
            Commands::Approx { num, appdir } => {
                assert_eq!(num, -1);
                assert_eq!(appdir, PathBuf::from("bench"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_exp_only_repeats() {
        let cli = Cli::parse_from(["accept", "exp", "-j", "-o", "sobel", "-o", "canneal", "a", "b"]);
        match cli.command {
            Commands::Exp { appdirs, json, time, only, .. } => {
                assert_eq!(appdirs.len(), 2);
                assert!(json);
                assert!(!time);
                assert_eq!(only, vec!["sobel".to_string(), "canneal".to_string()]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
