//! annoqueue - shared annotation queues
//!
//! Main entry point for the annoqueue CLI and lease sweeper service.

mod app;
mod cli;
mod cmd_queue;
mod cmd_sweep;
mod cmd_work;

use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use annoqueue_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};

use crate::app::App;
use crate::cli::{Cli, Commands};

/// Initialize tracing with console and optional file output.
///
/// Console logs go to stderr so command output on stdout stays parseable.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let file_layer = match &logging.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("annoqueue")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // The guard flushes buffered lines on drop; keep it for the process lifetime.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = logging
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!logging.json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Load and validate configuration, applying CLI overrides.
fn load_config(cli: &Cli) -> Result<(Config, Vec<String>), Box<dyn std::error::Error>> {
    let mut config = ConfigLoader::load_or_default(&cli.config)?;
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }

    let warnings = ConfigValidator::validate(&config)?
        .into_result()?
        .into_iter()
        .map(|w| format!("{}: {}", w.path, w.message))
        .collect();
    Ok((config, warnings))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, warnings) = load_config(&cli)?;
    init_tracing(&config.logging)?;
    for warning in &warnings {
        warn!("Config warning: {}", warning);
    }

    let app = App::open(config, &cli.format).await?;

    match cli.command {
        Commands::Sweep { once } => cmd_sweep::handle_sweep_command(&app, once).await,
        Commands::Queue { action } => cmd_queue::handle_queue_command(&app, action).await,
        Commands::Item { action } => cmd_work::handle_item_command(&app, action).await,
        Commands::Claim {
            scope,
            worker,
            exclude,
        } => cmd_work::claim(&app, scope, worker, exclude).await,
        Commands::Complete {
            scope,
            item,
            worker,
            scores,
        } => cmd_work::complete(&app, scope, item, worker, scores).await,
        Commands::Skip {
            scope,
            item,
            worker,
            reason,
        } => cmd_work::skip(&app, scope, item, worker, reason).await,
        Commands::Release {
            scope,
            item,
            worker,
        } => cmd_work::release(&app, scope, item, worker).await,
        Commands::Stats { scope } => cmd_work::stats(&app, scope).await,
        Commands::Assign {
            scope,
            worker,
            role,
        } => cmd_queue::assign(&app, scope, worker, role).await,
        Commands::Unassign { scope, worker } => cmd_queue::unassign(&app, scope, worker).await,
    }
}
