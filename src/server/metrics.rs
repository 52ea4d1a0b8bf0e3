//! Prometheus metrics for the server.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Container for all Prometheus metrics, shared across the adapters.
pub struct Metrics {
    registry: Registry,

    /// Counter of records successfully produced.
    pub records_produced_total: Counter,

    /// Counter of payload bytes successfully produced.
    pub bytes_produced_total: Counter,

    /// Counter of records handed out by consume calls.
    pub records_consumed_total: Counter,

    /// Gauge of currently connected WebSocket sessions.
    pub websocket_sessions: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics registry with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Counter names are registered without the `_total` suffix; the
        // OpenMetrics encoder appends it.
        let records_produced_total = Counter::default();
        registry.register(
            "eventlog_records_produced",
            "Total number of records appended to topic logs",
            records_produced_total.clone(),
        );

        let bytes_produced_total = Counter::default();
        registry.register(
            "eventlog_bytes_produced",
            "Total payload bytes appended to topic logs",
            bytes_produced_total.clone(),
        );

        let records_consumed_total = Counter::default();
        registry.register(
            "eventlog_records_consumed",
            "Total number of records returned to consumers",
            records_consumed_total.clone(),
        );

        let websocket_sessions = Gauge::default();
        registry.register(
            "eventlog_websocket_sessions",
            "Number of WebSocket sessions currently connected",
            websocket_sessions.clone(),
        );

        Self {
            registry,
            records_produced_total,
            bytes_produced_total,
            records_consumed_total,
            websocket_sessions,
        }
    }

    /// Encode all metrics to Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .expect("encoding metrics should not fail");
        buffer
    }
}
