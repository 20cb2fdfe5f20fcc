//! hamon entry point.
//!
//! Resolves configuration, starts the runtime, and serves until Ctrl-C.
//! A fatal error is printed as `<name>: <error>` with exit status 2.

use hamon::config::{Config, DEFAULT_NAME};
use hamon::server::Server;
use hamon::shutdown::ShutdownController;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit status for startup and runtime failures
const FAILURE: u8 = 2;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{DEFAULT_NAME}: {e}");
            return ExitCode::from(FAILURE);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", config.name, e);
            ExitCode::from(FAILURE)
        }
    }
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let workers = config.workers.unwrap_or_else(num_cpus);
    info!(
        name = %config.name,
        socket_dir = %config.socket_dir.display(),
        workers,
        on_write_error = ?config.on_write_error,
        drain_timeout_ms = config.drain_timeout.as_millis() as u64,
        "Starting hamon"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::new(config)?;
        let controller = ShutdownController::new();
        controller.cancel_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(e) => {
                    // Without a signal handler the server can only be killed.
                    error!(error = %e, "Failed to listen for interrupt");
                    std::future::pending::<()>().await;
                }
            }
        });

        server.run(controller.token()).await
    })?;

    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
