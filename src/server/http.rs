//! HTTP server: REST endpoints plus the SSE stream.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::watch;

use super::config::HttpConfig;
use super::handlers::{
    AppState, handle_consume, handle_create_topic, handle_healthy, handle_list_topics,
    handle_metrics, handle_next_offset, handle_produce, handle_ready, handle_stream,
};
use super::metrics::Metrics;
use crate::error::Result;
use crate::queue::EventQueue;

/// The REST/SSE adapter.
pub struct HttpServer {
    queue: Arc<EventQueue>,
    metrics: Arc<Metrics>,
    config: HttpConfig,
}

impl HttpServer {
    pub fn new(queue: Arc<EventQueue>, metrics: Arc<Metrics>, config: HttpConfig) -> Self {
        Self {
            queue,
            metrics,
            config,
        }
    }

    /// Builds the router. Exposed separately so tests can drive the routes
    /// without a socket.
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/topics", get(handle_list_topics))
            .route("/topics/{name}", post(handle_create_topic))
            .route("/topics/{name}/produce", post(handle_produce))
            .route("/topics/{name}/consume", get(handle_consume))
            .route("/topics/{name}/next_offset", get(handle_next_offset))
            .route("/topics/{name}/stream", get(handle_stream))
            .route("/metrics", get(handle_metrics))
            .route("/-/healthy", get(handle_healthy))
            .route("/-/ready", get(handle_ready))
            .with_state(state)
    }

    /// Binds and serves until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) -> Result<()> {
        if self.config.ssl_cert_path.is_some() || self.config.ssl_key_path.is_some() {
            tracing::warn!(
                "TLS certificate configured for the HTTP listener; terminate TLS in front of the server, serving plain HTTP"
            );
        }

        let state = AppState {
            queue: self.queue,
            metrics: self.metrics,
        };
        let app = Self::router(state);

        let addr = self.config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server listening on {addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}
