//! Binary protocol listener and per-session request loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::config::TcpConfig;
use super::metrics::Metrics;
use super::protocol::{
    Command, ConsumeRequest, ConsumeResponse, ErrorResponse, ListTopicsResponse,
    MAX_PAYLOAD_SIZE, NextOffsetResponse, ProduceRequest, ProduceResponse, REQUEST_HEADER_LEN,
    Status, TopicRequest, encode_response_frame,
};
use crate::error::{Error, Result};
use crate::queue::EventQueue;

/// The length-prefixed binary protocol adapter.
pub struct TcpServer {
    queue: Arc<EventQueue>,
    metrics: Arc<Metrics>,
    config: TcpConfig,
}

impl TcpServer {
    pub fn new(queue: Arc<EventQueue>, metrics: Arc<Metrics>, config: TcpConfig) -> Self {
        Self {
            queue,
            metrics,
            config,
        }
    }

    /// Binds and accepts sessions until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("binary protocol server listening on {addr}");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let queue = self.queue.clone();
                            let metrics = self.metrics.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                handle_session(stream, peer, queue, metrics, shutdown).await;
                            });
                        }
                        Err(e) => tracing::warn!("failed to accept binary connection: {e}"),
                    }
                }
            }
        }

        tracing::info!("binary protocol server shut down");
        Ok(())
    }
}

async fn handle_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    queue: Arc<EventQueue>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<()>,
) {
    tracing::debug!("binary session started with {peer}");

    loop {
        let mut header = [0u8; REQUEST_HEADER_LEN];
        tokio::select! {
            _ = shutdown.changed() => break,
            read = stream.read_exact(&mut header) => {
                match read {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        tracing::debug!("binary session {peer}: client closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("binary session {peer}: header read error: {e}");
                        break;
                    }
                }
            }
        }

        let command = header[0];
        let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

        if payload_len > MAX_PAYLOAD_SIZE {
            tracing::warn!(
                "binary session {peer}: payload of {payload_len} bytes exceeds limit; dropping session"
            );
            let error = ErrorResponse::new("request payload too large").encode();
            let frame = encode_response_frame(command, Status::PayloadTooLarge, &error);
            let _ = stream.write_all(&frame).await;
            break;
        }

        let mut payload = vec![0u8; payload_len as usize];
        if payload_len > 0 {
            if let Err(e) = stream.read_exact(&mut payload).await {
                tracing::warn!("binary session {peer}: payload read error: {e}");
                break;
            }
        }

        let (status, response_payload) =
            dispatch(&queue, &metrics, command, Bytes::from(payload)).await;
        let frame = encode_response_frame(command, status, &response_payload);
        if let Err(e) = stream.write_all(&frame).await {
            tracing::warn!("binary session {peer}: write error: {e}");
            break;
        }
    }
}

/// Executes one request, returning the response status and payload. The
/// response frame always echoes the request's command byte.
async fn dispatch(
    queue: &EventQueue,
    metrics: &Metrics,
    command: u8,
    payload: Bytes,
) -> (Status, Bytes) {
    let Some(parsed) = Command::from_u8(command) else {
        tracing::warn!("unknown binary command: 0x{command:02x}");
        return error_reply(Status::UnknownCommand, "unknown command type");
    };

    let result = match parsed {
        Command::Produce => handle_produce(queue, metrics, payload).await,
        Command::Consume => handle_consume(queue, metrics, payload).await,
        Command::GetNextOffset => handle_next_offset(queue, payload).await,
        Command::CreateTopic => handle_create_topic(queue, payload).await,
        Command::ListTopics => handle_list_topics(queue).await,
    };

    match result {
        Ok(response_payload) => (Status::Success, response_payload),
        Err(e) => {
            let status = status_for(parsed, &e);
            tracing::debug!("binary command 0x{command:02x} failed: {e}");
            error_reply(status, &e.to_string())
        }
    }
}

async fn handle_produce(queue: &EventQueue, metrics: &Metrics, payload: Bytes) -> Result<Bytes> {
    let request = ProduceRequest::decode(payload)?;
    let payload_len = request.payload.len() as u64;
    let offset = queue.produce(&request.topic, request.payload).await?;

    metrics.records_produced_total.inc();
    metrics.bytes_produced_total.inc_by(payload_len);

    Ok(ProduceResponse { offset }.encode())
}

async fn handle_consume(queue: &EventQueue, metrics: &Metrics, payload: Bytes) -> Result<Bytes> {
    let request = ConsumeRequest::decode(payload)?;
    let records = queue
        .consume(&request.topic, request.start_offset, request.max_messages)
        .await?;

    metrics.records_consumed_total.inc_by(records.len() as u64);

    let response = ConsumeResponse {
        messages: records.into_iter().map(|r| (r.offset, r.payload)).collect(),
    };
    response.encode()
}

async fn handle_next_offset(queue: &EventQueue, payload: Bytes) -> Result<Bytes> {
    let request = TopicRequest::decode(payload)?;
    let next_offset = queue.next_offset(&request.topic).await;
    Ok(NextOffsetResponse { next_offset }.encode())
}

async fn handle_create_topic(queue: &EventQueue, payload: Bytes) -> Result<Bytes> {
    let request = TopicRequest::decode(payload)?;
    queue.create_topic(&request.topic).await?;
    Ok(Bytes::new())
}

async fn handle_list_topics(queue: &EventQueue) -> Result<Bytes> {
    let response = ListTopicsResponse {
        topics: queue.list_topics().await,
    };
    response.encode()
}

fn status_for(command: Command, error: &Error) -> Status {
    match error {
        Error::Decode(_) => Status::Serialization,
        Error::InvalidInput(_) => Status::InvalidRequest,
        Error::Io(_) if command == Command::Produce => Status::ProduceFailed,
        Error::Io(_) => Status::InternalServer,
    }
}

fn error_reply(status: Status, message: &str) -> (Status, Bytes) {
    (status, ErrorResponse::new(message).encode())
}
