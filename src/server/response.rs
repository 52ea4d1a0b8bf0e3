//! HTTP response types for the REST surface.

use serde::Serialize;

/// Response for `POST /topics/{name}/produce`.
#[derive(Debug, Serialize)]
pub struct ProduceResponse {
    pub topic: String,
    pub offset: u64,
}

/// Response for `POST /topics/{name}`.
#[derive(Debug, Serialize)]
pub struct CreateTopicResponse {
    pub topic: String,
    pub status: &'static str,
}

impl CreateTopicResponse {
    pub fn created_or_exists(topic: String) -> Self {
        Self {
            topic,
            status: "created_or_exists",
        }
    }
}

/// Response for `GET /topics/{name}/next_offset`.
#[derive(Debug, Serialize)]
pub struct NextOffsetResponse {
    pub topic: String,
    pub next_offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_serialize_produce_response() {
        // given
        let response = ProduceResponse {
            topic: "orders".to_string(),
            offset: 12,
        };

        // when
        let json = serde_json::to_string(&response).unwrap();

        // then
        assert_eq!(json, r#"{"topic":"orders","offset":12}"#);
    }

    #[test]
    fn should_serialize_create_topic_response() {
        // given
        let response = CreateTopicResponse::created_or_exists("orders".to_string());

        // when
        let json = serde_json::to_string(&response).unwrap();

        // then
        assert_eq!(json, r#"{"topic":"orders","status":"created_or_exists"}"#);
    }

    #[test]
    fn should_serialize_next_offset_response() {
        // given
        let response = NextOffsetResponse {
            topic: "orders".to_string(),
            next_offset: 3,
        };

        // when
        let json = serde_json::to_string(&response).unwrap();

        // then
        assert_eq!(json, r#"{"topic":"orders","next_offset":3}"#);
    }
}
