//! WebSocket adapter: JSON frames over an upgraded HTTP connection.
//!
//! Each frame is a JSON object tagged by `command`. Requests carry an
//! optional `req_id` that responses echo, so clients can correlate them.
//! Push delivery rides the same connection as `message_batch_notification`
//! frames.
//!
//! A session owns an outbound channel drained by a writer task; that task is
//! the session's delivery executor. Subscriptions registered by the session
//! feed it through a bridge from the subscription registry, and are swept
//! with `unsubscribe_all` when the session ends, however it ends.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use super::config::WebSocketConfig;
use super::metrics::Metrics;
use crate::error::Result;
use crate::model::Record;
use crate::queue::EventQueue;
use crate::subscription::Delivery;

/// Records fetched for the one-shot catch-up after a subscribe.
const CATCH_UP_BATCH: u32 = 100;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Client-to-server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientFrame {
    ProduceRequest {
        req_id: Option<u64>,
        topic: String,
        message_payload: String,
    },
    SubscribeTopicRequest {
        req_id: Option<u64>,
        topic: String,
        subscriber_id: String,
        #[serde(default)]
        start_offset: u64,
    },
    UnsubscribeTopicRequest {
        req_id: Option<u64>,
        topic: String,
        subscriber_id: String,
    },
    CreateTopicRequest {
        req_id: Option<u64>,
        topic: String,
    },
    ListTopicsRequest {
        req_id: Option<u64>,
    },
    GetNextOffsetRequest {
        req_id: Option<u64>,
        topic: String,
    },
}

/// Server-to-client frames.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ServerFrame {
    ProduceResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<u64>,
        topic: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        offset: Option<u64>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    SubscribeTopicResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<u64>,
        topic: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    UnsubscribeTopicResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<u64>,
        topic: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    CreateTopicResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<u64>,
        topic: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    ListTopicsResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<u64>,
        topics: Vec<String>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    GetNextOffsetResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<u64>,
        topic: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_offset: Option<u64>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    MessageBatchNotification {
        topic: String,
        messages: Vec<Record>,
    },
    ErrorResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<u64>,
        error_message: String,
    },
}

#[derive(Clone)]
struct WsState {
    queue: Arc<EventQueue>,
    metrics: Arc<Metrics>,
}

/// The WebSocket adapter.
pub struct WsServer {
    queue: Arc<EventQueue>,
    metrics: Arc<Metrics>,
    config: WebSocketConfig,
}

impl WsServer {
    pub fn new(queue: Arc<EventQueue>, metrics: Arc<Metrics>, config: WebSocketConfig) -> Self {
        Self {
            queue,
            metrics,
            config,
        }
    }

    /// Binds and serves until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) -> Result<()> {
        let state = WsState {
            queue: self.queue,
            metrics: self.metrics,
        };
        let app = Router::new().route("/", any(handle_upgrade)).with_state(state);

        let addr = self.config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("WebSocket server listening on {addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        tracing::info!("WebSocket server shut down");
        Ok(())
    }
}

async fn handle_upgrade(State(state): State<WsState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

async fn handle_session(socket: WebSocket, state: WsState) {
    let session_id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    state.metrics.websocket_sessions.inc();
    tracing::info!("WebSocket session {session_id} started");

    let (mut socket_sink, mut socket_stream) = socket.split();

    // Outbound frames, drained by the writer task. This channel is the
    // session's delivery executor: everything the session sends, responses
    // and pushed batches alike, goes through it.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("failed to serialize outgoing frame: {e}");
                    continue;
                }
            };
            if socket_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Bridge from the subscription registry into the outbound channel.
    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<Delivery>();
    let bridge_out = out_tx.clone();
    let bridge = tokio::spawn(async move {
        while let Some(delivery) = delivery_rx.recv().await {
            let _ = bridge_out.send(ServerFrame::MessageBatchNotification {
                topic: delivery.topic,
                messages: delivery.records,
            });
        }
    });

    let mut session = Session {
        state: state.clone(),
        out: out_tx,
        deliveries: delivery_tx,
        subscriber_ids: HashSet::new(),
    };

    while let Some(message) = socket_stream.next().await {
        match message {
            Ok(Message::Text(text)) => session.handle_frame(text.as_str()).await,
            Ok(Message::Binary(_)) => {
                tracing::warn!(
                    "WebSocket session {session_id}: binary frame received, closing"
                );
                let _ = session.out.send(ServerFrame::ErrorResponse {
                    req_id: None,
                    error_message: "binary frames not supported, send JSON text".to_string(),
                });
                break;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong handled by the stack
            Err(e) => {
                tracing::debug!("WebSocket session {session_id}: read error: {e}");
                break;
            }
        }
    }

    // Sweep every subscription this session registered, then let the
    // writer drain.
    let subscriptions = state.queue.subscriptions();
    for subscriber_id in &session.subscriber_ids {
        subscriptions.unsubscribe_all(subscriber_id);
    }
    drop(session);
    let _ = bridge.await;
    let _ = writer.await;

    state.metrics.websocket_sessions.dec();
    tracing::info!("WebSocket session {session_id} closed");
}

/// Per-session request handling.
struct Session {
    state: WsState,
    out: mpsc::UnboundedSender<ServerFrame>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    subscriber_ids: HashSet<String>,
}

impl Session {
    async fn handle_frame(&mut self, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.send(ServerFrame::ErrorResponse {
                    req_id: extract_req_id(text),
                    error_message: format!("invalid frame: {e}"),
                });
                return;
            }
        };

        match frame {
            ClientFrame::ProduceRequest {
                req_id,
                topic,
                message_payload,
            } => self.handle_produce(req_id, topic, message_payload).await,
            ClientFrame::SubscribeTopicRequest {
                req_id,
                topic,
                subscriber_id,
                start_offset,
            } => {
                self.handle_subscribe(req_id, topic, subscriber_id, start_offset)
                    .await
            }
            ClientFrame::UnsubscribeTopicRequest {
                req_id,
                topic,
                subscriber_id,
            } => self.handle_unsubscribe(req_id, topic, subscriber_id),
            ClientFrame::CreateTopicRequest { req_id, topic } => {
                self.handle_create_topic(req_id, topic).await
            }
            ClientFrame::ListTopicsRequest { req_id } => self.handle_list_topics(req_id).await,
            ClientFrame::GetNextOffsetRequest { req_id, topic } => {
                self.handle_next_offset(req_id, topic).await
            }
        }
    }

    async fn handle_produce(&self, req_id: Option<u64>, topic: String, message_payload: String) {
        let payload_len = message_payload.len() as u64;
        let frame = match self
            .state
            .queue
            .produce(&topic, Bytes::from(message_payload))
            .await
        {
            Ok(offset) => {
                self.state.metrics.records_produced_total.inc();
                self.state.metrics.bytes_produced_total.inc_by(payload_len);
                ServerFrame::ProduceResponse {
                    req_id,
                    topic,
                    offset: Some(offset),
                    success: true,
                    error_message: None,
                }
            }
            Err(e) => ServerFrame::ProduceResponse {
                req_id,
                topic,
                offset: None,
                success: false,
                error_message: Some(e.to_string()),
            },
        };
        self.send(frame);
    }

    async fn handle_subscribe(
        &mut self,
        req_id: Option<u64>,
        topic: String,
        subscriber_id: String,
        start_offset: u64,
    ) {
        self.state.queue.subscriptions().subscribe(
            &topic,
            &subscriber_id,
            start_offset,
            self.deliveries.clone(),
        );
        self.subscriber_ids.insert(subscriber_id);
        self.send(ServerFrame::SubscribeTopicResponse {
            req_id,
            topic: topic.clone(),
            success: true,
            error_message: None,
        });

        // One-shot catch-up for records produced before the subscription.
        // The first pushed record may overlap the tail of this batch;
        // clients deduplicate by offset.
        match self.state.queue.consume(&topic, start_offset, CATCH_UP_BATCH).await {
            Ok(records) if !records.is_empty() => {
                self.send(ServerFrame::MessageBatchNotification {
                    topic,
                    messages: records,
                });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("catch-up consume on topic {topic} failed: {e}");
            }
        }
    }

    fn handle_unsubscribe(&self, req_id: Option<u64>, topic: String, subscriber_id: String) {
        let removed = self
            .state
            .queue
            .subscriptions()
            .unsubscribe(&topic, &subscriber_id);
        let frame = if removed {
            ServerFrame::UnsubscribeTopicResponse {
                req_id,
                topic,
                success: true,
                error_message: None,
            }
        } else {
            ServerFrame::UnsubscribeTopicResponse {
                req_id,
                topic,
                success: false,
                error_message: Some("not subscribed".to_string()),
            }
        };
        self.send(frame);
    }

    async fn handle_create_topic(&self, req_id: Option<u64>, topic: String) {
        let frame = match self.state.queue.create_topic(&topic).await {
            Ok(_) => ServerFrame::CreateTopicResponse {
                req_id,
                topic,
                success: true,
                error_message: None,
            },
            Err(e) => ServerFrame::CreateTopicResponse {
                req_id,
                topic,
                success: false,
                error_message: Some(e.to_string()),
            },
        };
        self.send(frame);
    }

    async fn handle_list_topics(&self, req_id: Option<u64>) {
        self.send(ServerFrame::ListTopicsResponse {
            req_id,
            topics: self.state.queue.list_topics().await,
            success: true,
            error_message: None,
        });
    }

    async fn handle_next_offset(&self, req_id: Option<u64>, topic: String) {
        let next_offset = self.state.queue.next_offset(&topic).await;
        self.send(ServerFrame::GetNextOffsetResponse {
            req_id,
            topic,
            next_offset: Some(next_offset),
            success: true,
            error_message: None,
        });
    }

    fn send(&self, frame: ServerFrame) {
        let _ = self.out.send(frame);
    }
}

/// Best-effort recovery of `req_id` from a frame that failed to parse, so
/// the error can still be correlated.
fn extract_req_id(text: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("req_id").and_then(|id| id.as_u64()))
}
