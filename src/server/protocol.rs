//! Frame and payload definitions for the length-prefixed binary protocol.
//!
//! # Framing
//!
//! ```text
//! request:  | command (u8) | payload_len (u32 BE) | payload |
//! response: | command (u8) | status (u8) | payload_len (u32 BE) | payload |
//! ```
//!
//! The response echoes the request's command byte; errors are carried in the
//! status byte with a u32-length-prefixed UTF-8 message as the payload.
//! Topic names are u16-length-prefixed, message payloads u32-length-prefixed
//! (see [`crate::codec`]). All integers are big-endian on the wire.

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{get_blob, get_name, get_u32, get_u64, put_blob, put_name};
use crate::error::{Error, Result};
use crate::model::Offset;

/// Maximum payload bytes in a single frame (64 MiB). An oversized request is
/// answered with [`Status::PayloadTooLarge`] and the session is dropped.
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Size of a request header on the wire.
pub const REQUEST_HEADER_LEN: usize = 5;

/// Size of a response header on the wire.
pub const RESPONSE_HEADER_LEN: usize = 6;

/// Request command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Produce = 0x01,
    Consume = 0x02,
    GetNextOffset = 0x03,
    CreateTopic = 0x04,
    ListTopics = 0x05,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Command::Produce),
            0x02 => Some(Command::Consume),
            0x03 => Some(Command::GetNextOffset),
            0x04 => Some(Command::CreateTopic),
            0x05 => Some(Command::ListTopics),
            _ => None,
        }
    }
}

/// Response status bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    TopicNotFound = 0x01,
    InvalidOffset = 0x02,
    Serialization = 0x03,
    ProduceFailed = 0x04,
    InternalServer = 0x05,
    InvalidRequest = 0x06,
    PayloadTooLarge = 0x07,
    UnknownCommand = 0x08,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Status::Success),
            0x01 => Some(Status::TopicNotFound),
            0x02 => Some(Status::InvalidOffset),
            0x03 => Some(Status::Serialization),
            0x04 => Some(Status::ProduceFailed),
            0x05 => Some(Status::InternalServer),
            0x06 => Some(Status::InvalidRequest),
            0x07 => Some(Status::PayloadTooLarge),
            0x08 => Some(Status::UnknownCommand),
            _ => None,
        }
    }
}

/// Encodes a complete response frame.
pub fn encode_response_frame(command: u8, status: Status, payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(RESPONSE_HEADER_LEN + payload.len());
    frame.extend_from_slice(&[command, status as u8]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// A payload must be consumed exactly; trailing bytes mean the frame was
/// built against a different schema.
fn expect_consumed<B: Buf>(buf: &B, what: &str) -> Result<()> {
    if buf.has_remaining() {
        return Err(Error::Decode(format!(
            "{what}: {} trailing bytes after payload",
            buf.remaining()
        )));
    }
    Ok(())
}

/// PRODUCE request payload: topic name, message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRequest {
    pub topic: String,
    pub payload: Bytes,
}

impl ProduceRequest {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_name(&mut buf, &self.topic)?;
        put_blob(&mut buf, &self.payload)?;
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let topic = get_name(&mut buf)?;
        let payload = get_blob(&mut buf)?;
        expect_consumed(&buf, "ProduceRequest")?;
        Ok(Self { topic, payload })
    }
}

/// PRODUCE success payload: the assigned offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProduceResponse {
    pub offset: Offset,
}

impl ProduceResponse {
    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.offset.to_be_bytes())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let offset = get_u64(&mut buf)?;
        expect_consumed(&buf, "ProduceResponse")?;
        Ok(Self { offset })
    }
}

/// CONSUME request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeRequest {
    pub topic: String,
    pub start_offset: Offset,
    pub max_messages: u32,
}

impl ConsumeRequest {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_name(&mut buf, &self.topic)?;
        buf.extend_from_slice(&self.start_offset.to_be_bytes());
        buf.extend_from_slice(&self.max_messages.to_be_bytes());
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let topic = get_name(&mut buf)?;
        let start_offset = get_u64(&mut buf)?;
        let max_messages = get_u32(&mut buf)?;
        expect_consumed(&buf, "ConsumeRequest")?;
        Ok(Self {
            topic,
            start_offset,
            max_messages,
        })
    }
}

/// CONSUME success payload: a count followed by `(offset, payload)` pairs.
/// The topic is request context and not repeated per record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumeResponse {
    pub messages: Vec<(Offset, Bytes)>,
}

impl ConsumeResponse {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(self.messages.len() as u32).to_be_bytes());
        for (offset, payload) in &self.messages {
            buf.extend_from_slice(&offset.to_be_bytes());
            put_blob(&mut buf, payload)?;
        }
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let count = get_u32(&mut buf)?;
        let mut messages = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = get_u64(&mut buf)?;
            let payload = get_blob(&mut buf)?;
            messages.push((offset, payload));
        }
        expect_consumed(&buf, "ConsumeResponse")?;
        Ok(Self { messages })
    }
}

/// Request payload carrying just a topic name (GET_NEXT_OFFSET and
/// CREATE_TOPIC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRequest {
    pub topic: String,
}

impl TopicRequest {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_name(&mut buf, &self.topic)?;
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let topic = get_name(&mut buf)?;
        expect_consumed(&buf, "TopicRequest")?;
        Ok(Self { topic })
    }
}

/// GET_NEXT_OFFSET success payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextOffsetResponse {
    pub next_offset: Offset,
}

impl NextOffsetResponse {
    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.next_offset.to_be_bytes())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let next_offset = get_u64(&mut buf)?;
        expect_consumed(&buf, "NextOffsetResponse")?;
        Ok(Self { next_offset })
    }
}

/// LIST_TOPICS success payload: a count followed by topic names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListTopicsResponse {
    pub topics: Vec<String>,
}

impl ListTopicsResponse {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(self.topics.len() as u32).to_be_bytes());
        for topic in &self.topics {
            put_name(&mut buf, topic)?;
        }
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let count = get_u32(&mut buf)?;
        let mut topics = Vec::with_capacity(count as usize);
        for _ in 0..count {
            topics.push(get_name(&mut buf)?);
        }
        expect_consumed(&buf, "ListTopicsResponse")?;
        Ok(Self { topics })
    }
}

/// Error payload: a u32-length-prefixed UTF-8 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(self.message.len() as u32).to_be_bytes());
        buf.extend_from_slice(self.message.as_bytes());
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let raw = get_blob(&mut buf)?;
        expect_consumed(&buf, "ErrorResponse")?;
        let message = String::from_utf8(raw.to_vec())
            .map_err(|_| Error::Decode("error message is not valid UTF-8".to_string()))?;
        Ok(Self { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_produce_request() {
        // given
        let request = ProduceRequest {
            topic: "orders".to_string(),
            payload: Bytes::from("order-1"),
        };

        // when
        let encoded = request.encode().unwrap();
        let decoded = ProduceRequest::decode(encoded).unwrap();

        // then
        assert_eq!(decoded, request);
    }

    #[test]
    fn should_round_trip_consume_request() {
        // given
        let request = ConsumeRequest {
            topic: "orders".to_string(),
            start_offset: 42,
            max_messages: 100,
        };

        // when
        let decoded = ConsumeRequest::decode(request.encode().unwrap()).unwrap();

        // then
        assert_eq!(decoded, request);
    }

    #[test]
    fn should_round_trip_consume_response() {
        // given
        let response = ConsumeResponse {
            messages: vec![(0, Bytes::from("a")), (1, Bytes::from("bb"))],
        };

        // when
        let decoded = ConsumeResponse::decode(response.encode().unwrap()).unwrap();

        // then
        assert_eq!(decoded, response);
    }

    #[test]
    fn should_round_trip_an_empty_consume_response() {
        // given
        let response = ConsumeResponse::default();

        // when
        let encoded = response.encode().unwrap();
        let decoded = ConsumeResponse::decode(encoded.clone()).unwrap();

        // then - just the zero count on the wire
        assert_eq!(encoded.len(), 4);
        assert_eq!(decoded, response);
    }

    #[test]
    fn should_round_trip_topic_request() {
        // given
        let request = TopicRequest {
            topic: "billing".to_string(),
        };

        // when
        let decoded = TopicRequest::decode(request.encode().unwrap()).unwrap();

        // then
        assert_eq!(decoded, request);
    }

    #[test]
    fn should_round_trip_offset_responses() {
        // given
        let produce = ProduceResponse { offset: 7 };
        let next = NextOffsetResponse { next_offset: 8 };

        // when/then
        assert_eq!(ProduceResponse::decode(produce.encode()).unwrap(), produce);
        assert_eq!(NextOffsetResponse::decode(next.encode()).unwrap(), next);
    }

    #[test]
    fn should_round_trip_list_topics_response() {
        // given
        let response = ListTopicsResponse {
            topics: vec!["a".to_string(), "b".to_string()],
        };

        // when
        let decoded = ListTopicsResponse::decode(response.encode().unwrap()).unwrap();

        // then
        assert_eq!(decoded, response);
    }

    #[test]
    fn should_round_trip_error_response() {
        // given
        let response = ErrorResponse::new("topic not found");

        // when
        let decoded = ErrorResponse::decode(response.encode()).unwrap();

        // then
        assert_eq!(decoded, response);
    }

    #[test]
    fn should_reject_trailing_bytes() {
        // given - a valid topic request with one stray byte appended
        let mut encoded = BytesMut::from(
            TopicRequest {
                topic: "orders".to_string(),
            }
            .encode()
            .unwrap()
            .as_ref(),
        );
        encoded.extend_from_slice(&[0x00]);

        // when
        let result = TopicRequest::decode(encoded.freeze());

        // then
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn should_encode_response_frame_header() {
        // given
        let payload = ProduceResponse { offset: 1 }.encode();

        // when
        let frame = encode_response_frame(Command::Produce as u8, Status::Success, &payload);

        // then
        assert_eq!(frame.len(), RESPONSE_HEADER_LEN + 8);
        assert_eq!(frame[0], 0x01);
        assert_eq!(frame[1], 0x00);
        assert_eq!(&frame[2..6], &8u32.to_be_bytes());
    }

    #[test]
    fn should_map_command_bytes() {
        // given/when/then
        assert_eq!(Command::from_u8(0x01), Some(Command::Produce));
        assert_eq!(Command::from_u8(0x05), Some(Command::ListTopics));
        assert_eq!(Command::from_u8(0x06), None);
        assert_eq!(Status::from_u8(0x08), Some(Status::UnknownCommand));
        assert_eq!(Status::from_u8(0xFF), None);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn should_round_trip_any_produce_request(
                topic in "[a-zA-Z0-9_-]{1,64}",
                payload in prop::collection::vec(any::<u8>(), 1..512),
            ) {
                let request = ProduceRequest {
                    topic,
                    payload: Bytes::from(payload),
                };

                let decoded = ProduceRequest::decode(request.encode().unwrap()).unwrap();

                prop_assert_eq!(decoded, request);
            }

            #[test]
            fn should_round_trip_any_consume_response(
                entries in prop::collection::vec((any::<u64>(), prop::collection::vec(any::<u8>(), 0..64)), 0..16),
            ) {
                let response = ConsumeResponse {
                    messages: entries.into_iter().map(|(o, p)| (o, Bytes::from(p))).collect(),
                };

                let decoded = ConsumeResponse::decode(response.encode().unwrap()).unwrap();

                prop_assert_eq!(decoded, response);
            }
        }
    }
}
