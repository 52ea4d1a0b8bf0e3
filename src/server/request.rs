//! HTTP request types for the REST surface.

use serde::Deserialize;

/// Largest number of records a single consume call hands out.
pub const MAX_CONSUME_BATCH: u32 = 1000;

/// Default when the client does not say how many records it wants.
pub const DEFAULT_CONSUME_BATCH: u32 = 100;

/// Body of `POST /topics/{name}/produce`.
#[derive(Debug, Deserialize)]
pub struct ProduceBody {
    /// The record payload, carried as text.
    pub payload: String,
}

/// Query parameters for `GET /topics/{name}/consume`.
#[derive(Debug, Default, Deserialize)]
pub struct ConsumeParams {
    /// Start offset (inclusive). Defaults to 0.
    pub offset: Option<u64>,
    /// Maximum records to return; capped at [`MAX_CONSUME_BATCH`].
    pub max_messages: Option<u32>,
}

impl ConsumeParams {
    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }

    pub fn max_messages(&self) -> u32 {
        self.max_messages
            .unwrap_or(DEFAULT_CONSUME_BATCH)
            .min(MAX_CONSUME_BATCH)
    }
}

/// Query parameters for `GET /topics/{name}/stream`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Explicit start offset; takes precedence over `Last-Event-ID`.
    pub offset: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_consume_params() {
        // given
        let params = ConsumeParams::default();

        // when/then
        assert_eq!(params.offset(), 0);
        assert_eq!(params.max_messages(), DEFAULT_CONSUME_BATCH);
    }

    #[test]
    fn should_cap_max_messages() {
        // given
        let params = ConsumeParams {
            offset: Some(5),
            max_messages: Some(10_000),
        };

        // when/then
        assert_eq!(params.offset(), 5);
        assert_eq!(params.max_messages(), MAX_CONSUME_BATCH);
    }

    #[test]
    fn should_parse_consume_params_from_query() {
        // given
        let query = r#"{"offset": 7, "max_messages": 3}"#;

        // when
        let params: ConsumeParams = serde_json::from_str(query).unwrap();

        // then
        assert_eq!(params.offset(), 7);
        assert_eq!(params.max_messages(), 3);
    }
}
