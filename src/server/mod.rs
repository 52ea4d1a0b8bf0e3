//! Protocol adapters and process wiring.
//!
//! Three independent listeners translate their wire protocols into
//! [`EventQueue`](crate::EventQueue) calls: a length-prefixed binary
//! protocol over TCP, a REST + SSE surface over HTTP, and a JSON frame
//! protocol over WebSocket. [`run`] starts whichever of them the
//! configuration enables and stops them all on SIGINT/SIGTERM.

pub mod config;
pub mod error;
mod handlers;
pub mod http;
pub mod metrics;
pub mod protocol;
mod request;
mod response;
pub mod tcp;
pub mod ws;

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;

pub use config::{CliArgs, HttpConfig, ServerConfig, TcpConfig, WebSocketConfig};
pub use http::HttpServer;
pub use metrics::Metrics;
pub use tcp::TcpServer;
pub use ws::WsServer;

use crate::error::Result;
use crate::queue::EventQueue;

/// Runs every enabled adapter until shutdown.
///
/// Adapters share one shutdown signal, fed by SIGINT/SIGTERM. An adapter
/// failing (a port that will not bind, for instance) brings the rest down
/// and surfaces the error to the caller.
pub async fn run(config: ServerConfig, queue: Arc<EventQueue>) -> Result<()> {
    let metrics = Arc::new(Metrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let mut adapters: JoinSet<Result<()>> = JoinSet::new();

    if config.tcp_server.enabled {
        let server = TcpServer::new(queue.clone(), metrics.clone(), config.tcp_server.clone());
        let shutdown = shutdown_rx.clone();
        adapters.spawn(async move { server.run(shutdown).await });
    }
    if config.http_server.enabled {
        let server = HttpServer::new(queue.clone(), metrics.clone(), config.http_server.clone());
        let shutdown = shutdown_rx.clone();
        adapters.spawn(async move { server.run(shutdown).await });
    }
    if config.websocket_server.enabled {
        let server = WsServer::new(queue.clone(), metrics.clone(), config.websocket_server.clone());
        let shutdown = shutdown_rx.clone();
        adapters.spawn(async move { server.run(shutdown).await });
    }

    if adapters.is_empty() {
        tracing::warn!("no adapters enabled; nothing to serve");
        return Ok(());
    }
    tracing::info!("{} started. Press Ctrl+C to exit.", config.server_name);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let mut outcome = Ok(());
    while let Some(joined) = adapters.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::error!("adapter task panicked: {e}");
                }
                continue;
            }
        };
        if let Err(e) = result {
            tracing::error!("adapter failed: {e}");
            if outcome.is_ok() {
                outcome = Err(e);
            }
            // Bring down the remaining adapters; serving a partial surface
            // after a failed bind hides the misconfiguration.
            adapters.abort_all();
        }
    }

    tracing::info!("all adapters stopped");
    outcome
}

/// Listen for SIGTERM (pod termination) and SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
