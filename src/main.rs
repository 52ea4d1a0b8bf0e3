//! Eventlog server binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use eventlog::EventQueue;
use eventlog::server::{self, CliArgs};

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config_path = args.config.clone();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing; RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    if config_path.exists() {
        tracing::info!("loaded configuration from {}", config_path.display());
    } else {
        tracing::warn!(
            "config file {} not found; using defaults",
            config_path.display()
        );
    }
    tracing::info!(
        "{}: data directory {}, {} worker threads",
        config.server_name,
        config.data_directory.display(),
        config.worker_threads()
    );

    // The thread pool size is configuration, so the runtime is built by
    // hand instead of through the macro.
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("failed to build runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let queue = match EventQueue::open(config.data_directory.clone()) {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            tracing::error!("failed to open event queue: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(server::run(config, queue)) {
        Ok(()) => {
            tracing::info!("shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}
