//! Input connectors: queued and unqueued receiving endpoints.

use super::packet::StreamPacket;
use super::state::{StreamState, StreamStateCell};
use super::traits::{PacketHandler, PacketReceiver, ReceiveOutcome, UpstreamNotice, UpstreamNotify};
use crate::error::{Error, Result};
use crate::observability::{ConnectorMetrics, trace_packet_bounced, trace_packet_discarded};
use crate::pool::BlockPool;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// The consuming endpoint of a streaming edge, with a fixed-capacity
/// ring plus one current slot.
///
/// Deliveries land in the ring; the consumer's own execution context
/// pulls them out with [`request_packets`](Self::request_packets) or
/// [`pop_packet`](Self::pop_packet). A refused delivery latches a
/// bounce flag; draining later re-issues exactly one upstream packet
/// request per bounce, and only once the ring is empty or room has
/// reopened. That asymmetry is the backpressure mechanism: no permanent
/// stall, no redundant upstream chatter.
pub struct QueuedInputConnector {
    name: String,
    state: Arc<StreamStateCell>,
    capacity: usize,
    ring: Mutex<VecDeque<StreamPacket>>,
    /// A partially consumed packet parked by the consumer.
    current: Mutex<Option<StreamPacket>>,
    bounced: AtomicBool,
    source: Mutex<Option<Arc<dyn UpstreamNotify>>>,
    allocator: Mutex<Option<Arc<BlockPool>>>,
    metrics: ConnectorMetrics,
}

impl QueuedInputConnector {
    /// Create a connector holding at most `capacity` queued packets.
    pub fn new(name: impl Into<String>, capacity: usize, state: Arc<StreamStateCell>) -> Self {
        let name = name.into();
        Self {
            metrics: ConnectorMetrics::new(&name),
            state,
            capacity,
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            current: Mutex::new(None),
            bounced: AtomicBool::new(false),
            source: Mutex::new(None),
            allocator: Mutex::new(None),
            name,
        }
    }

    /// The connector's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plug the upstream source. Legal only while the owning unit is
    /// Idle and the connector is unplugged.
    pub fn plug(&self, source: Arc<dyn UpstreamNotify>) -> Result<()> {
        if !self.state.is_idle() {
            return Err(Error::IllegalState {
                operation: "plug",
                required: "Idle",
                actual: self.state.get().name(),
            });
        }
        let mut slot = self.source.lock().unwrap();
        if slot.is_some() {
            return Err(Error::IllegalState {
                operation: "plug",
                required: "unplugged",
                actual: "plugged",
            });
        }
        *slot = Some(source);
        Ok(())
    }

    /// Unplug the upstream source, dropping any leftover packets.
    pub fn unplug(&self) -> Result<()> {
        if !self.state.is_idle() {
            return Err(Error::IllegalState {
                operation: "unplug",
                required: "Idle",
                actual: self.state.get().name(),
            });
        }
        *self.source.lock().unwrap() = None;
        self.ring.lock().unwrap().clear();
        *self.current.lock().unwrap() = None;
        self.bounced.store(false, Ordering::Release);
        Ok(())
    }

    /// Whether a source is plugged.
    pub fn is_plugged(&self) -> bool {
        self.source.lock().unwrap().is_some()
    }

    /// Number of queued packets (excluding the current slot).
    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.ring.lock().unwrap().is_empty()
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drain every queued packet, relieving backpressure if due.
    pub fn request_packets(&self) -> SmallVec<[StreamPacket; 4]> {
        let drained: SmallVec<[StreamPacket; 4]> = {
            let mut ring = self.ring.lock().unwrap();
            ring.drain(..).collect()
        };
        self.maybe_rerequest();
        drained
    }

    /// Pull one packet: the parked current packet first, then the ring.
    pub fn pop_packet(&self) -> Option<StreamPacket> {
        if let Some(parked) = self.current.lock().unwrap().take() {
            return Some(parked);
        }
        let popped = self.ring.lock().unwrap().pop_front();
        if popped.is_some() {
            self.maybe_rerequest();
        }
        popped
    }

    /// Park a partially consumed packet; the next pop returns it first.
    pub fn park_current(&self, packet: StreamPacket) {
        *self.current.lock().unwrap() = Some(packet);
    }

    /// Re-issue one upstream packet request iff a prior delivery
    /// bounced and the ring is now empty or has room again.
    fn maybe_rerequest(&self) {
        let len = self.ring.lock().unwrap().len();
        if len != 0 && len >= self.capacity {
            return;
        }
        if self.bounced.swap(false, Ordering::AcqRel) {
            let source = self.source.lock().unwrap().clone();
            if let Some(source) = source {
                source.upstream_notification(UpstreamNotice::PacketRequest);
            }
        }
    }

    fn bounce(&self, packet: StreamPacket) -> ReceiveOutcome {
        self.bounced.store(true, Ordering::Release);
        self.metrics.record_bounced();
        trace_packet_bounced(&self.name, packet.sequence());
        ReceiveOutcome::Full(packet)
    }

    fn discard(&self, packet: StreamPacket) -> ReceiveOutcome {
        self.metrics.record_discarded();
        trace_packet_discarded(&self.name, packet.sequence());
        // Dropping releases the ranges and returns the envelope
        drop(packet);
        ReceiveOutcome::Accepted
    }
}

impl PacketReceiver for QueuedInputConnector {
    fn receive_packet(&self, packet: StreamPacket) -> ReceiveOutcome {
        match self.state.get() {
            StreamState::Idle => ReceiveOutcome::Rejected(packet),
            StreamState::Preparing | StreamState::Stopping => self.bounce(packet),
            StreamState::Flushing => self.discard(packet),
            StreamState::Running => {
                let mut ring = self.ring.lock().unwrap();
                if ring.len() >= self.capacity {
                    drop(ring);
                    self.bounce(packet)
                } else {
                    ring.push_back(packet);
                    ReceiveOutcome::Accepted
                }
            }
        }
    }

    fn receive_allocator(&self, pool: Arc<BlockPool>) {
        *self.allocator.lock().unwrap() = Some(pool);
    }
}

impl std::fmt::Debug for QueuedInputConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedInputConnector")
            .field("name", &self.name)
            .field("queued", &self.len())
            .field("capacity", &self.capacity)
            .field("bounced", &self.bounced.load(Ordering::Acquire))
            .finish()
    }
}

/// The consuming endpoint without a ring: packets go straight to the
/// unit's handler in the delivering thread.
pub struct UnqueuedInputConnector {
    name: String,
    state: Arc<StreamStateCell>,
    handler: Mutex<Option<Arc<dyn PacketHandler>>>,
    source: Mutex<Option<Arc<dyn UpstreamNotify>>>,
    allocator: Mutex<Option<Arc<BlockPool>>>,
    metrics: ConnectorMetrics,
}

impl UnqueuedInputConnector {
    /// Create a connector delivering into `handler`.
    pub fn new(
        name: impl Into<String>,
        state: Arc<StreamStateCell>,
        handler: Arc<dyn PacketHandler>,
    ) -> Self {
        let name = name.into();
        Self {
            metrics: ConnectorMetrics::new(&name),
            state,
            handler: Mutex::new(Some(handler)),
            source: Mutex::new(None),
            allocator: Mutex::new(None),
            name,
        }
    }

    /// The connector's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plug the upstream source. Legal only while Idle.
    pub fn plug(&self, source: Arc<dyn UpstreamNotify>) -> Result<()> {
        if !self.state.is_idle() {
            return Err(Error::IllegalState {
                operation: "plug",
                required: "Idle",
                actual: self.state.get().name(),
            });
        }
        *self.source.lock().unwrap() = Some(source);
        Ok(())
    }

    /// Unplug the upstream source. Legal only while Idle.
    pub fn unplug(&self) -> Result<()> {
        if !self.state.is_idle() {
            return Err(Error::IllegalState {
                operation: "unplug",
                required: "Idle",
                actual: self.state.get().name(),
            });
        }
        *self.source.lock().unwrap() = None;
        Ok(())
    }
}

impl PacketReceiver for UnqueuedInputConnector {
    fn receive_packet(&self, packet: StreamPacket) -> ReceiveOutcome {
        match self.state.get() {
            StreamState::Idle => ReceiveOutcome::Rejected(packet),
            StreamState::Preparing | StreamState::Stopping => {
                self.metrics.record_bounced();
                trace_packet_bounced(&self.name, packet.sequence());
                ReceiveOutcome::Full(packet)
            }
            StreamState::Flushing => {
                self.metrics.record_discarded();
                trace_packet_discarded(&self.name, packet.sequence());
                drop(packet);
                ReceiveOutcome::Accepted
            }
            StreamState::Running => {
                let handler = self.handler.lock().unwrap().clone();
                let Some(handler) = handler else {
                    return ReceiveOutcome::Rejected(packet);
                };
                // The handler owns the packet from here; its errors do
                // not travel back across the edge.
                if let Err(err) = handler.handle_packet(packet) {
                    tracing::warn!(connector = %self.name, %err, "packet handler failed");
                }
                ReceiveOutcome::Accepted
            }
        }
    }

    fn receive_allocator(&self, pool: Arc<BlockPool>) {
        *self.allocator.lock().unwrap() = Some(pool);
    }
}

impl std::fmt::Debug for UnqueuedInputConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnqueuedInputConnector")
            .field("name", &self.name)
            .field("state", &self.state.get().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BlockPool, DataRange, PoolConfig};
    use crate::stream::OutputConnector;
    use std::sync::atomic::AtomicUsize;

    fn state_in(state: StreamState) -> Arc<StreamStateCell> {
        let cell = Arc::new(StreamStateCell::new("unit"));
        match state {
            StreamState::Idle => {}
            StreamState::Preparing => {
                cell.transition(StreamState::Preparing).unwrap();
            }
            StreamState::Running => {
                cell.transition(StreamState::Preparing).unwrap();
                cell.transition(StreamState::Running).unwrap();
            }
            StreamState::Flushing => {
                cell.transition(StreamState::Preparing).unwrap();
                cell.transition(StreamState::Running).unwrap();
                cell.transition(StreamState::Flushing).unwrap();
            }
            StreamState::Stopping => {
                cell.transition(StreamState::Preparing).unwrap();
                cell.transition(StreamState::Running).unwrap();
                cell.transition(StreamState::Stopping).unwrap();
            }
        }
        cell
    }

    fn producer(capacity: usize) -> OutputConnector {
        OutputConnector::new("out0", capacity, Arc::new(StreamStateCell::new("producer")))
    }

    struct CountingSource {
        requests: AtomicUsize,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: AtomicUsize::new(0),
            })
        }

        fn requests(&self) -> usize {
            self.requests.load(Ordering::Acquire)
        }
    }

    impl UpstreamNotify for CountingSource {
        fn upstream_notification(&self, notice: UpstreamNotice) {
            if notice == UpstreamNotice::PacketRequest {
                self.requests.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    #[test]
    fn test_receive_by_state() {
        let out = producer(8);

        let idle = QueuedInputConnector::new("in0", 2, state_in(StreamState::Idle));
        assert!(matches!(
            idle.receive_packet(out.borrow_packet().unwrap()),
            ReceiveOutcome::Rejected(_)
        ));

        let preparing = QueuedInputConnector::new("in1", 2, state_in(StreamState::Preparing));
        assert!(matches!(
            preparing.receive_packet(out.borrow_packet().unwrap()),
            ReceiveOutcome::Full(_)
        ));

        let running = QueuedInputConnector::new("in2", 2, state_in(StreamState::Running));
        assert!(matches!(
            running.receive_packet(out.borrow_packet().unwrap()),
            ReceiveOutcome::Accepted
        ));
        assert_eq!(running.len(), 1);
    }

    #[test]
    fn test_flushing_discards_and_releases() {
        let pool = BlockPool::new("data", PoolConfig::new(64, 2)).unwrap();
        let out = producer(1);

        let mut packet = out.borrow_packet().unwrap();
        let mut blocks = pool.get_blocks(1, 1, None).unwrap();
        packet.add_range(DataRange::whole(blocks.pop().unwrap()));

        let flushing = QueuedInputConnector::new("in0", 2, state_in(StreamState::Flushing));
        assert!(matches!(
            flushing.receive_packet(packet),
            ReceiveOutcome::Accepted
        ));

        // Ranges released and the envelope back at its origin
        assert_eq!(pool.free_blocks(), 2);
        assert_eq!(out.free_envelopes(), 1);
        assert!(flushing.is_empty());
    }

    #[test]
    fn test_full_ring_bounces() {
        let out = producer(4);
        let input = QueuedInputConnector::new("in0", 2, state_in(StreamState::Running));

        assert!(matches!(
            input.receive_packet(out.borrow_packet().unwrap()),
            ReceiveOutcome::Accepted
        ));
        assert!(matches!(
            input.receive_packet(out.borrow_packet().unwrap()),
            ReceiveOutcome::Accepted
        ));
        assert!(matches!(
            input.receive_packet(out.borrow_packet().unwrap()),
            ReceiveOutcome::Full(_)
        ));
    }

    #[test]
    fn test_bounce_then_drain_rerequests_exactly_once() {
        let out = producer(4);
        let state = state_in(StreamState::Idle);
        let input = QueuedInputConnector::new("in0", 1, Arc::clone(&state));
        let source = CountingSource::new();
        input.plug(Arc::clone(&source) as Arc<dyn UpstreamNotify>).unwrap();

        state.transition(StreamState::Preparing).unwrap();
        state.transition(StreamState::Running).unwrap();

        // Fill the ring, then bounce one delivery
        assert!(matches!(
            input.receive_packet(out.borrow_packet().unwrap()),
            ReceiveOutcome::Accepted
        ));
        assert!(matches!(
            input.receive_packet(out.borrow_packet().unwrap()),
            ReceiveOutcome::Full(_)
        ));

        // Drain relieves the bounce with exactly one upstream request
        let drained = input.request_packets();
        assert_eq!(drained.len(), 1);
        assert_eq!(source.requests(), 1);

        // Draining again without a new bounce stays silent
        let drained = input.request_packets();
        assert!(drained.is_empty());
        assert_eq!(source.requests(), 1);
    }

    #[test]
    fn test_no_rerequest_without_bounce() {
        let out = producer(2);
        let state = state_in(StreamState::Idle);
        let input = QueuedInputConnector::new("in0", 2, Arc::clone(&state));
        let source = CountingSource::new();
        input.plug(Arc::clone(&source) as Arc<dyn UpstreamNotify>).unwrap();

        state.transition(StreamState::Preparing).unwrap();
        state.transition(StreamState::Running).unwrap();

        input.receive_packet(out.borrow_packet().unwrap());
        let _ = input.request_packets();
        assert_eq!(source.requests(), 0);
    }

    #[test]
    fn test_park_current_pops_first() {
        let out = producer(4);
        let input = QueuedInputConnector::new("in0", 4, state_in(StreamState::Running));

        input.receive_packet(out.borrow_packet().unwrap());
        input.receive_packet(out.borrow_packet().unwrap());

        let first = input.pop_packet().unwrap();
        let first_seq = first.sequence();
        input.park_current(first);

        // Parked packet comes back before the ring
        assert_eq!(input.pop_packet().unwrap().sequence(), first_seq);
        assert!(input.pop_packet().is_some());
        assert!(input.pop_packet().is_none());
    }

    #[test]
    fn test_unqueued_delivers_to_handler() {
        struct Collector {
            seen: AtomicUsize,
        }
        impl PacketHandler for Collector {
            fn handle_packet(&self, packet: StreamPacket) -> crate::error::Result<()> {
                self.seen.fetch_add(1, Ordering::AcqRel);
                drop(packet);
                Ok(())
            }
        }

        let out = producer(2);
        let collector = Arc::new(Collector {
            seen: AtomicUsize::new(0),
        });
        let input = UnqueuedInputConnector::new(
            "in0",
            state_in(StreamState::Running),
            Arc::clone(&collector) as Arc<dyn PacketHandler>,
        );

        assert!(matches!(
            input.receive_packet(out.borrow_packet().unwrap()),
            ReceiveOutcome::Accepted
        ));
        assert_eq!(collector.seen.load(Ordering::Acquire), 1);
        assert_eq!(out.free_envelopes(), 2);
    }

    #[test]
    fn test_plug_requires_idle() {
        let input = QueuedInputConnector::new("in0", 2, state_in(StreamState::Running));
        let source = CountingSource::new();
        assert!(input.plug(source as Arc<dyn UpstreamNotify>).is_err());
    }
}
