//! HTTP route handlers for the REST and SSE surface.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use bytes::Bytes;
use futures::Stream;

use super::error::ApiError;
use super::metrics::Metrics;
use super::request::{ConsumeParams, ProduceBody, StreamParams};
use super::response::{CreateTopicResponse, NextOffsetResponse, ProduceResponse};
use crate::model::Record;
use crate::queue::EventQueue;

/// Records fetched per poll of an SSE stream.
const STREAM_POLL_BATCH: u32 = 10;

/// Delay between polls when a stream has caught up with the topic.
const STREAM_POLL_DELAY: Duration = Duration::from_millis(200);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<EventQueue>,
    pub metrics: Arc<Metrics>,
}

/// Handle `POST /topics/{name}/produce`.
pub async fn handle_produce(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(body): Json<ProduceBody>,
) -> Result<(StatusCode, Json<ProduceResponse>), ApiError> {
    let payload_len = body.payload.len() as u64;
    let offset = state.queue.produce(&topic, Bytes::from(body.payload)).await?;

    state.metrics.records_produced_total.inc();
    state.metrics.bytes_produced_total.inc_by(payload_len);

    Ok((StatusCode::CREATED, Json(ProduceResponse { topic, offset })))
}

/// Handle `GET /topics/{name}/consume`.
pub async fn handle_consume(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(params): Query<ConsumeParams>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let records = state
        .queue
        .consume(&topic, params.offset(), params.max_messages())
        .await?;

    state.metrics.records_consumed_total.inc_by(records.len() as u64);

    Ok(Json(records))
}

/// Handle `POST /topics/{name}`.
pub async fn handle_create_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<(StatusCode, Json<CreateTopicResponse>), ApiError> {
    state.queue.create_topic(&topic).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTopicResponse::created_or_exists(topic)),
    ))
}

/// Handle `GET /topics`.
pub async fn handle_list_topics(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.queue.list_topics().await)
}

/// Handle `GET /topics/{name}/next_offset`.
pub async fn handle_next_offset(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Json<NextOffsetResponse> {
    let next_offset = state.queue.next_offset(&topic).await;
    Json(NextOffsetResponse { topic, next_offset })
}

/// Handle `GET /topics/{name}/stream`.
///
/// Streams records as server-sent events by polling `consume`. The handler
/// is stateless: it never registers with the subscription registry, so a
/// dropped connection leaves nothing behind. The initial cursor comes from
/// `?offset=`, falling back to `Last-Event-ID + 1` on reconnects.
pub async fn handle_stream(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let offset = params
        .offset
        .or_else(|| last_event_id(&headers).map(|id| id + 1))
        .unwrap_or(0);
    tracing::debug!("SSE stream on topic {topic} starting at offset {offset}");

    struct Cursor {
        state: AppState,
        topic: String,
        offset: u64,
        pending: VecDeque<Record>,
    }

    let stream = futures::stream::unfold(
        Cursor {
            state,
            topic,
            offset,
            pending: VecDeque::new(),
        },
        |mut cursor| async move {
            loop {
                if let Some(record) = cursor.pending.pop_front() {
                    let data = match serde_json::to_string(&record) {
                        Ok(data) => data,
                        Err(e) => {
                            tracing::error!("failed to serialize SSE record: {e}");
                            return None;
                        }
                    };
                    let event = Event::default()
                        .id(record.offset.to_string())
                        .event("message")
                        .data(data);
                    return Some((Ok(event), cursor));
                }

                match cursor
                    .state
                    .queue
                    .consume(&cursor.topic, cursor.offset, STREAM_POLL_BATCH)
                    .await
                {
                    Ok(records) if records.is_empty() => {
                        tokio::time::sleep(STREAM_POLL_DELAY).await;
                    }
                    Ok(records) => {
                        cursor.offset = records.last().map(|r| r.offset + 1).unwrap_or(cursor.offset);
                        cursor
                            .state
                            .metrics
                            .records_consumed_total
                            .inc_by(records.len() as u64);
                        cursor.pending.extend(records);
                    }
                    Err(e) => {
                        tracing::warn!("SSE stream on topic {} ended: {e}", cursor.topic);
                        return None;
                    }
                }
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Handle `GET /metrics`.
pub async fn handle_metrics(State(state): State<AppState>) -> String {
    state.metrics.encode()
}

/// Handle `GET /-/healthy`.
pub async fn handle_healthy() -> StatusCode {
    StatusCode::OK
}

/// Handle `GET /-/ready`.
pub async fn handle_ready() -> StatusCode {
    StatusCode::OK
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}
