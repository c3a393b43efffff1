//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to create spans for unit activation.
    pub unit_spans: bool,
    /// Whether to create spans for connector traffic.
    pub connector_spans: bool,
    /// Whether to create spans for per-packet delivery.
    pub packet_spans: bool,
    /// Default span level.
    pub level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            unit_spans: true,
            connector_spans: true,
            packet_spans: false, // Can be expensive
            level: Level::INFO,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing config with all spans enabled.
    pub fn all() -> Self {
        Self {
            unit_spans: true,
            connector_spans: true,
            packet_spans: true,
            level: Level::DEBUG,
        }
    }

    /// Create a minimal config (unit spans only).
    pub fn minimal() -> Self {
        Self {
            unit_spans: true,
            connector_spans: false,
            packet_spans: false,
            level: Level::INFO,
        }
    }

    /// Disable all spans.
    pub fn none() -> Self {
        Self {
            unit_spans: false,
            connector_spans: false,
            packet_spans: false,
            level: Level::INFO,
        }
    }
}

/// Create a span for unit activation.
///
/// # Example
///
/// ```rust,ignore
/// use strand::observability::span_unit;
///
/// let span = span_unit("audio-decoder");
/// let _guard = span.enter();
/// // Activation protocol here...
/// ```
#[inline]
pub fn span_unit(name: &str) -> Span {
    span!(Level::INFO, "unit", name = %name)
}

/// Create a span for connector traffic.
#[inline]
pub fn span_connector(unit: &str, connector: &str) -> Span {
    span!(
        Level::DEBUG,
        "connector",
        unit = %unit,
        connector = %connector
    )
}

/// Instrument a unit activation with tracing.
///
/// This is a convenience wrapper that enters a span and returns a guard.
pub fn instrument_unit(name: &str) -> tracing::span::EnteredSpan {
    span_unit(name).entered()
}

/// Instrument a connector with tracing.
///
/// This is a convenience wrapper that enters a span and returns a guard.
pub fn instrument_connector(unit: &str, connector: &str) -> tracing::span::EnteredSpan {
    span_connector(unit, connector).entered()
}

/// Log a failed recovery step during activation rollback.
///
/// Recovery failures are severe: the rollback continues past them, so
/// the unit may be left half-restored.
#[inline]
pub fn trace_recovery_failed(unit: &str, client: u64, error: &dyn std::fmt::Display) {
    tracing::error!(
        unit = %unit,
        client = client,
        error = %error,
        "compensation step failed during rollback"
    );
}

/// Log a packet bounce.
#[inline]
pub fn trace_packet_bounced(connector: &str, sequence: u64) {
    tracing::debug!(
        connector = %connector,
        sequence = sequence,
        "packet bounced"
    );
}

/// Log a packet discarded while flushing.
#[inline]
pub fn trace_packet_discarded(connector: &str, sequence: u64) {
    tracing::debug!(
        connector = %connector,
        sequence = sequence,
        "packet discarded while flushing"
    );
}

/// Log a streaming state change.
#[inline]
pub fn trace_state_change(unit: &str, from: &str, to: &str) {
    tracing::info!(
        unit = %unit,
        from = %from,
        to = %to,
        "streaming state changed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert!(config.unit_spans);
        assert!(config.connector_spans);
        assert!(!config.packet_spans);
    }

    #[test]
    fn test_tracing_config_all() {
        let config = TracingConfig::all();
        assert!(config.unit_spans);
        assert!(config.connector_spans);
        assert!(config.packet_spans);
    }

    #[test]
    fn test_tracing_config_minimal() {
        let config = TracingConfig::minimal();
        assert!(config.unit_spans);
        assert!(!config.connector_spans);
        assert!(!config.packet_spans);
    }

    #[test]
    fn test_tracing_config_none() {
        let config = TracingConfig::none();
        assert!(!config.unit_spans);
        assert!(!config.connector_spans);
        assert!(!config.packet_spans);
    }

    #[test]
    fn test_span_creation() {
        // These should not panic
        let _span = span_unit("audio-decoder");
        let _span = span_connector("audio-decoder", "out0");
    }

    #[test]
    fn test_instrumentation() {
        // These should not panic
        let _guard = instrument_unit("audio-decoder");
        let _guard = instrument_connector("audio-decoder", "out0");
    }

    #[test]
    fn test_trace_functions() {
        // These should not panic even without a subscriber
        trace_recovery_failed("decoder", 1, &"start refused");
        trace_packet_bounced("out0", 7);
        trace_packet_discarded("out0", 8);
        trace_state_change("decoder", "Idle", "Preparing");
    }
}
