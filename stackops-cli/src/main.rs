use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod cli;
mod commands;
mod config;
mod output;

use cli::{Args, Command};
use config::Settings;

/// Initialize tracing with two outputs:
/// 1. stderr - compact live progress (info and above)
/// 2. ~/.stackops/stackops.log - full history of every run
fn initialize_tracing() -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,stackops_cli=debug,stackops_orchestrations=debug".into());

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let log_dir = PathBuf::from(home).join(".stackops");
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::never(&log_dir, "stackops.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes the file writer on drop; it must live until exit.
    std::mem::forget(guard);

    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);
    let stderr_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    initialize_tracing()?;

    let settings = Settings::load()?;
    tracing::debug!(?settings, "Loaded settings");

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id, command = args.command.name());

    async move {
        match args.command {
            Command::Provision { environment, output } => {
                commands::provision::run_provision(&settings, &environment, output).await
            }
            Command::Rotate {
                environment,
                auto_commit,
                only,
                output,
            } => commands::rotate::run_rotate(&settings, &environment, auto_commit, only, output).await,
            Command::Commit { environment, output } => {
                commands::rotate::run_commit(&settings, &environment, output).await
            }
            Command::Status { environment, output } => {
                commands::status::run_status(&settings, &environment, output).await
            }
        }
    }
    .instrument(span)
    .await
}
