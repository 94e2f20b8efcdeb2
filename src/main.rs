use std::process::ExitCode;

use accept::cli::commands::{self, ExpOptions};
use accept::cli::{Cli, Commands};
use accept::types::config::Config;
use accept::{AcceptError, AcceptResult};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration first (no logging yet)
    let loaded = Config::load_or_default(&cli.config);
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };

    init_logging(&cli, &config);

    let result = match loaded {
        Ok(config) => execute(&cli, config).await,
        Err(e) => Err(AcceptError::user(format!(
            "cannot load {}: {}",
            cli.config.display(),
            e
        ))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_user_facing() => {
            tracing::debug!(error = ?e, "command failed");
            tracing::error!("{}", e);
            ExitCode::from(1)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "unclassified failure");
            tracing::error!("internal error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn init_logging(cli: &Cli, config: &Config) {
    let level = cli.log_level(&config.general.log_level);
    let filter = EnvFilter::from_default_env();
    let filter = match format!("accept={}", level).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter.add_directive(tracing::Level::WARN.into()),
    };

    let json = config.general.log_format.eq_ignore_ascii_case("json");
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(filter)
        .init();
}

async fn execute(cli: &Cli, config: Config) -> AcceptResult<()> {
    tracing::debug!(config = %cli.config.display(), "configuration loaded");
    let settings = cli.settings(config);

    match &cli.command {
        Commands::Run {
            appdir,
            verbose,
            test,
        } => commands::run(&settings, appdir, *verbose, *test).await,
        Commands::Exp {
            appdirs,
            json,
            time,
            only,
            verbose,
        } => {
            let options = ExpOptions {
                as_json: *json,
                include_time: *time,
                only: only.clone(),
                verbose: *verbose,
            };
            commands::exp(&settings, appdirs, &options).await
        }
        Commands::Build { appdir } => commands::build(&settings, appdir).await,
        Commands::Log { appdir } => commands::log(&settings, appdir).await,
        Commands::Precise { appdir } => commands::precise(&settings, appdir).await,
        Commands::Approx { num, appdir } => commands::approx(&settings, *num, appdir).await,
        Commands::Worker { job, result } => commands::worker(job, result).await,
    }
}
