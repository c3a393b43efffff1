//! Observability features: metrics and tracing.
//!
//! This module provides instrumentation for monitoring and debugging the
//! unit runtime:
//!
//! - **Metrics**: Counters and gauges via `metrics-rs`
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! Strand exposes the following metrics:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `strand_activations_granted` | Counter | Activations completed and locked |
//! | `strand_activations_pending` | Counter | Activations deferred into a wait queue |
//! | `strand_activations_preempted` | Counter | Current clients stopped for a new activation |
//! | `strand_activation_rollbacks` | Counter | Failed activations unwound by compensation |
//! | `strand_pool_blocks_available` | Gauge | Free blocks in a memory pool |
//! | `strand_pool_waits` | Counter | Allocations that blocked on the pool |
//! | `strand_packets_sent` | Counter | Packets delivered downstream |
//! | `strand_packets_bounced` | Counter | Packets refused by a connector |
//! | `strand_packets_discarded` | Counter | Packets dropped while flushing |
//! | `strand_envelopes_free` | Gauge | Free envelopes in an output connector |
//!
//! ## Tracing
//!
//! Strand emits spans for:
//! - Unit activation / arbitration
//! - Connector traffic
//!
//! No subscriber or recorder is installed by the crate; wire up an
//! exporter (prometheus, statsd, ...) in the embedding application.

mod metrics;
mod tracing_support;

pub use metrics::{
    ConnectorMetrics, init_metrics, record_activation_granted, record_activation_pending,
    record_activation_preempted, record_envelopes_free, record_packet_bounced,
    record_packet_discarded, record_packet_sent, record_pool_available, record_pool_wait,
    record_rollback,
};
pub use tracing_support::{
    TracingConfig, instrument_connector, instrument_unit, span_connector, span_unit,
    trace_packet_bounced, trace_packet_discarded, trace_recovery_failed, trace_state_change,
};
