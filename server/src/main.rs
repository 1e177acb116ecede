//! Logtail Server binary.
//!
//! Tails one log file and streams it to WebSocket clients until SIGINT or
//! SIGTERM. Settings come from the environment; see
//! [`logtail_server::config`].
//!
//! ```bash
//! LOGTAIL_FILE=/var/log/app.log PORT=8080 cargo run --release --bin logtail-server
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use logtail_server::config::Config;
use logtail_server::engine::TailEngine;
use logtail_server::error::ServerError;
use logtail_server::routes::{create_router, AppState};
use logtail_server::watcher::ChangeWatcher;

const ENV_HELP: &str = "\
Optional environment variables:
  LOGTAIL_FILE                 log file to tail (default: logs.txt)
  PORT                         HTTP port (default: 3000)
  LOGTAIL_SNAPSHOT_BYTES       snapshot lookback in bytes (default: 1024)
  LOGTAIL_MAX_LINES            lines per message (default: 10)
  LOGTAIL_SEND_TIMEOUT_MS      per-client send timeout (default: 5000)
  LOGTAIL_QUEUE_CAPACITY       per-client queue size (default: 256)
  LOGTAIL_REWATCH_INTERVAL_MS  retry interval for a lost watch (default: 1000)
  RUST_LOG                     log filter (default: info)";

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Invalid configuration");
            eprintln!("Error: {err}\n\n{ENV_HELP}");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Logtail server stopped with an error");
            eprintln!("Error: {err}");
            ExitCode::from(1)
        }
    }
}

/// Serves the configured log file until a shutdown signal arrives.
async fn run(config: Config) -> Result<(), ServerError> {
    info!(
        port = config.port,
        log_file = %config.log_file.display(),
        snapshot_bytes = config.tail.snapshot_window,
        max_lines = config.tail.max_lines,
        "Logtail server starting"
    );

    let engine = Arc::new(TailEngine::open(&config.log_file, config.tail).await?);
    let watcher = ChangeWatcher::spawn(Arc::clone(&engine), config.rewatch_interval)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let app = create_router(AppState::new(config, engine, watcher.subscribe_state()));

    let served = async {
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|err| ServerError::internal(format!("failed to bind {addr}: {err}")))?;
        info!(address = %addr, "Listening for subscribers");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|err| ServerError::internal(format!("server error: {err}")))
    }
    .await;

    watcher.abort();
    info!("File watch stopped");
    served
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true).with_file(false))
        .init();
}

/// Resolves on SIGINT or, on unix, SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    };
    info!(signal, "Shutdown signal received, draining connections");
}
