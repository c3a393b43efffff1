//! Metrics collection using metrics-rs.

use metrics::{Counter, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const ACTIVATIONS_GRANTED: &str = "strand_activations_granted";
const ACTIVATIONS_PENDING: &str = "strand_activations_pending";
const ACTIVATIONS_PREEMPTED: &str = "strand_activations_preempted";
const ACTIVATION_ROLLBACKS: &str = "strand_activation_rollbacks";
const POOL_BLOCKS_AVAILABLE: &str = "strand_pool_blocks_available";
const POOL_WAITS: &str = "strand_pool_waits";
const PACKETS_SENT: &str = "strand_packets_sent";
const PACKETS_BOUNCED: &str = "strand_packets_bounced";
const PACKETS_DISCARDED: &str = "strand_packets_discarded";
const ENVELOPES_FREE: &str = "strand_envelopes_free";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Describe all metrics
    metrics::describe_counter!(
        ACTIVATIONS_GRANTED,
        Unit::Count,
        "Activations that completed and locked a unit"
    );
    metrics::describe_counter!(
        ACTIVATIONS_PENDING,
        Unit::Count,
        "Activations deferred into a unit's wait queue"
    );
    metrics::describe_counter!(
        ACTIVATIONS_PREEMPTED,
        Unit::Count,
        "Current clients stopped to make way for a new activation"
    );
    metrics::describe_counter!(
        ACTIVATION_ROLLBACKS,
        Unit::Count,
        "Failed activations unwound by the compensation sequence"
    );
    metrics::describe_gauge!(
        POOL_BLOCKS_AVAILABLE,
        Unit::Count,
        "Free blocks in a memory pool"
    );
    metrics::describe_counter!(
        POOL_WAITS,
        Unit::Count,
        "Allocations that blocked waiting for pool blocks"
    );
    metrics::describe_counter!(PACKETS_SENT, Unit::Count, "Packets delivered downstream");
    metrics::describe_counter!(
        PACKETS_BOUNCED,
        Unit::Count,
        "Packets refused by a connector and returned upstream"
    );
    metrics::describe_counter!(
        PACKETS_DISCARDED,
        Unit::Count,
        "Packets drained and dropped while flushing"
    );
    metrics::describe_gauge!(
        ENVELOPES_FREE,
        Unit::Count,
        "Free packet envelopes in an output connector"
    );
}

/// Record a completed activation.
#[inline]
pub fn record_activation_granted(unit: &str) {
    counter!(ACTIVATIONS_GRANTED, "unit" => unit.to_string()).increment(1);
}

/// Record an activation deferred into the wait queue.
#[inline]
pub fn record_activation_pending(unit: &str) {
    counter!(ACTIVATIONS_PENDING, "unit" => unit.to_string()).increment(1);
}

/// Record a preemption of the current client.
#[inline]
pub fn record_activation_preempted(unit: &str) {
    counter!(ACTIVATIONS_PREEMPTED, "unit" => unit.to_string()).increment(1);
}

/// Record a compensation rollback.
#[inline]
pub fn record_rollback(unit: &str) {
    counter!(ACTIVATION_ROLLBACKS, "unit" => unit.to_string()).increment(1);
}

/// Record available pool blocks.
#[inline]
pub fn record_pool_available(pool: &str, available: usize) {
    gauge!(POOL_BLOCKS_AVAILABLE, "pool" => pool.to_string()).set(available as f64);
}

/// Record an allocation that had to wait.
#[inline]
pub fn record_pool_wait(pool: &str) {
    counter!(POOL_WAITS, "pool" => pool.to_string()).increment(1);
}

/// Record a packet delivered downstream.
#[inline]
pub fn record_packet_sent(connector: &str) {
    counter!(PACKETS_SENT, "connector" => connector.to_string()).increment(1);
}

/// Record a bounced packet.
#[inline]
pub fn record_packet_bounced(connector: &str) {
    counter!(PACKETS_BOUNCED, "connector" => connector.to_string()).increment(1);
}

/// Record a packet discarded while flushing.
#[inline]
pub fn record_packet_discarded(connector: &str) {
    counter!(PACKETS_DISCARDED, "connector" => connector.to_string()).increment(1);
}

/// Record the free-envelope depth of an output connector.
#[inline]
pub fn record_envelopes_free(connector: &str, free: usize) {
    gauge!(ENVELOPES_FREE, "connector" => connector.to_string()).set(free as f64);
}

/// Metrics collector for a specific connector.
///
/// Provides a convenient way to record metrics with pre-configured labels.
#[derive(Clone)]
pub struct ConnectorMetrics {
    connector: String,
    sent: Counter,
    bounced: Counter,
    discarded: Counter,
}

impl ConnectorMetrics {
    /// Create a new connector metrics collector.
    pub fn new(connector: &str) -> Self {
        Self {
            connector: connector.to_string(),
            sent: counter!(PACKETS_SENT, "connector" => connector.to_string()),
            bounced: counter!(PACKETS_BOUNCED, "connector" => connector.to_string()),
            discarded: counter!(PACKETS_DISCARDED, "connector" => connector.to_string()),
        }
    }

    /// Record a packet delivered downstream.
    #[inline]
    pub fn record_sent(&self) {
        self.sent.increment(1);
    }

    /// Record a bounced packet.
    #[inline]
    pub fn record_bounced(&self) {
        self.bounced.increment(1);
    }

    /// Record a packet discarded while flushing.
    #[inline]
    pub fn record_discarded(&self) {
        self.discarded.increment(1);
    }

    /// Get the connector name.
    pub fn connector(&self) -> &str {
        &self.connector
    }
}
