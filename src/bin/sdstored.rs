use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sdstore::config::DaemonConfig;
use sdstore::daemon::Daemon;
use sdstore::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "sdstored")]
#[command(about = "File transformation daemon with per-filter concurrency budgets")]
struct Args {
    /// Path to the filter budget file
    config: PathBuf,

    /// Directory containing the filter executables
    filter_dir: PathBuf,

    /// Unix socket to listen on (defaults to sdstored.sock in the temp dir)
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match DaemonConfig::load(&args.config, &args.filter_dir, args.socket) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "bad configuration");
            return ExitCode::FAILURE;
        }
    };

    let daemon = match Daemon::new(config) {
        Ok(daemon) => daemon,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = install_shutdown_handler();
    match daemon.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "daemon failed");
            ExitCode::FAILURE
        }
    }
}
