//! Shiftguard - a command-line console for the workforce admin API.
//!
//! Every request the console makes goes through the session guard: a
//! rejected or expired token signs the user out and points them back to the
//! login entry point.

mod app;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use shiftguard_core::Config;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::{Command, Console, USAGE};

/// Set to `1` to also write logs to a daily file in the cache dir
const LOG_FILE_ENV: &str = "SHIFTGUARD_LOG_FILE";

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "shiftguard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;

    let log_dir = match std::env::var(LOG_FILE_ENV) {
        Ok(value) if value == "1" => Some(config.cache_dir()?),
        _ => None,
    };
    let log_guard = init_tracing(log_dir);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}\n\n{}", message, USAGE);
            std::process::exit(2);
        }
    };

    info!(?command, "shiftguard starting");
    let console = Console::new(config)?;

    if let Err(e) = console.run(command).await {
        eprintln!("Error: {:#}", e);
        // Flush the log file before exiting
        drop(log_guard);
        std::process::exit(1);
    }

    info!("shiftguard shutting down");
    Ok(())
}
