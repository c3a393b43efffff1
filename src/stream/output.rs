//! Output connectors and their envelope free-lists.

use super::packet::StreamPacket;
use super::state::StreamStateCell;
use super::traits::{PacketReceiver, ReceiveOutcome, UpstreamNotice, UpstreamNotify};
use crate::error::{Error, Result};
use crate::observability::{ConnectorMetrics, record_envelopes_free, trace_packet_bounced};
use crate::pool::BlockPool;
use crate::sync::Event;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Lock-free free-list of packet envelope slots.
///
/// One bit per envelope in a word array; borrow clears a bit, return
/// sets it back. A return into a previously empty list is the
/// "packet available" edge: it latches the available event and forwards
/// an upstream notification so a stalled producer wakes exactly once
/// per exhaustion.
pub(super) struct EnvelopePool {
    name: String,
    capacity: usize,
    words: Vec<AtomicU64>,
    free_count: AtomicUsize,
    next_sequence: AtomicU64,
    available: Event,
    notify: Mutex<Option<Arc<dyn UpstreamNotify>>>,
}

impl EnvelopePool {
    fn new(name: String, capacity: usize) -> Arc<Self> {
        let word_count = capacity.div_ceil(64);
        let words: Vec<AtomicU64> = (0..word_count)
            .map(|w| {
                let bits_here = (capacity - w * 64).min(64);
                let mask = if bits_here == 64 {
                    u64::MAX
                } else {
                    (1u64 << bits_here) - 1
                };
                AtomicU64::new(mask)
            })
            .collect();
        Arc::new(Self {
            name,
            capacity,
            words,
            free_count: AtomicUsize::new(capacity),
            next_sequence: AtomicU64::new(0),
            available: Event::new(),
            notify: Mutex::new(None),
        })
    }

    /// Claim one free slot, or `None` when exhausted.
    fn try_take(&self) -> Option<usize> {
        for (w, word) in self.words.iter().enumerate() {
            let mut bits = word.load(Ordering::Acquire);
            while bits != 0 {
                let bit = bits.trailing_zeros() as u64;
                match word.compare_exchange_weak(
                    bits,
                    bits & !(1 << bit),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.free_count.fetch_sub(1, Ordering::AcqRel);
                        return Some(w * 64 + bit as usize);
                    }
                    Err(actual) => bits = actual,
                }
            }
        }
        None
    }

    /// Return a slot; fires the packet-available signal on the
    /// empty-to-nonempty edge.
    pub(super) fn return_slot(&self, slot: usize) {
        debug_assert!(slot < self.capacity);
        let prev = self.words[slot / 64].fetch_or(1 << (slot % 64), Ordering::AcqRel);
        debug_assert_eq!(prev & (1 << (slot % 64)), 0, "envelope returned twice");

        let was_empty = self.free_count.fetch_add(1, Ordering::AcqRel) == 0;
        record_envelopes_free(&self.name, self.free_count.load(Ordering::Acquire));
        if was_empty {
            self.available.set();
            let notify = self.notify.lock().unwrap().clone();
            if let Some(notify) = notify {
                notify.upstream_notification(UpstreamNotice::PacketAvailable);
            }
        }
    }

    fn free(&self) -> usize {
        self.free_count.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for EnvelopePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopePool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("free", &self.free())
            .finish()
    }
}

/// What became of a packet handed to [`OutputConnector::send_packet`].
#[derive(Debug)]
pub enum SendOutcome {
    /// Delivered; the receiver owns the packet now.
    Sent,
    /// Bounced; the producer keeps the packet and retries after a
    /// PacketRequest notice.
    Full(StreamPacket),
}

/// The producing endpoint of a streaming edge.
///
/// Owns a private free-list of packet envelopes sized at construction.
/// The owning unit borrows envelopes, fills them and sends them to the
/// plugged target; envelopes come back automatically when the packet is
/// dropped anywhere downstream.
pub struct OutputConnector {
    name: String,
    state: Arc<StreamStateCell>,
    envelopes: Arc<EnvelopePool>,
    target: Mutex<Option<Arc<dyn PacketReceiver>>>,
    allocator: Mutex<Option<Arc<BlockPool>>>,
    metrics: ConnectorMetrics,
}

impl OutputConnector {
    /// Create a connector with `capacity` preallocated envelopes.
    ///
    /// `state` is the owning unit's streaming state cell; plug and
    /// unplug are legal only while it is Idle.
    pub fn new(name: impl Into<String>, capacity: usize, state: Arc<StreamStateCell>) -> Self {
        let name = name.into();
        Self {
            envelopes: EnvelopePool::new(name.clone(), capacity),
            metrics: ConnectorMetrics::new(&name),
            target: Mutex::new(None),
            allocator: Mutex::new(None),
            state,
            name,
        }
    }

    /// The connector's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plug the downstream target. Legal only while the owning unit is
    /// Idle and the connector is unplugged.
    pub fn plug(&self, target: Arc<dyn PacketReceiver>) -> Result<()> {
        if !self.state.is_idle() {
            return Err(Error::IllegalState {
                operation: "plug",
                required: "Idle",
                actual: self.state.get().name(),
            });
        }
        let mut slot = self.target.lock().unwrap();
        if slot.is_some() {
            return Err(Error::IllegalState {
                operation: "plug",
                required: "unplugged",
                actual: "plugged",
            });
        }
        *slot = Some(target);
        Ok(())
    }

    /// Unplug the downstream target. Legal only while Idle.
    pub fn unplug(&self) -> Result<()> {
        if !self.state.is_idle() {
            return Err(Error::IllegalState {
                operation: "unplug",
                required: "Idle",
                actual: self.state.get().name(),
            });
        }
        *self.target.lock().unwrap() = None;
        Ok(())
    }

    /// Whether a target is plugged.
    pub fn is_plugged(&self) -> bool {
        self.target.lock().unwrap().is_some()
    }

    /// Borrow one envelope from the free-list.
    ///
    /// An exhausted free-list is backpressure, not failure: wait for the
    /// packet-available signal and borrow again.
    pub fn borrow_packet(&self) -> Result<StreamPacket> {
        let slot = self
            .envelopes
            .try_take()
            .ok_or_else(|| Error::Empty(self.name.clone()))?;
        let sequence = self.envelopes.next_sequence.fetch_add(1, Ordering::AcqRel);
        record_envelopes_free(&self.name, self.envelopes.free());
        Ok(StreamPacket::new(slot, Arc::clone(&self.envelopes), sequence))
    }

    /// Free envelopes remaining (snapshot).
    pub fn free_envelopes(&self) -> usize {
        self.envelopes.free()
    }

    /// The latched packet-available signal.
    pub fn packet_available(&self) -> &Event {
        &self.envelopes.available
    }

    /// Hook upstream notification delivery (nested forwarding, or the
    /// owning unit's wakeup path).
    pub fn set_upstream(&self, notify: Arc<dyn UpstreamNotify>) {
        *self.envelopes.notify.lock().unwrap() = Some(notify);
    }

    /// Deliver a packet to the plugged target.
    ///
    /// A Full outcome hands the packet back for retry; a Rejected
    /// outcome (target idle) releases it and surfaces a protocol error.
    pub fn send_packet(&self, packet: StreamPacket) -> Result<SendOutcome> {
        let target = self.target.lock().unwrap().clone();
        let Some(target) = target else {
            // Dropping the packet returns the envelope
            return Err(Error::NotFound(format!("{}: no target plugged", self.name)));
        };

        let sequence = packet.sequence();
        match target.receive_packet(packet) {
            ReceiveOutcome::Accepted => {
                self.metrics.record_sent();
                Ok(SendOutcome::Sent)
            }
            ReceiveOutcome::Full(packet) => {
                self.metrics.record_bounced();
                trace_packet_bounced(&self.name, sequence);
                Ok(SendOutcome::Full(packet))
            }
            ReceiveOutcome::Rejected(packet) => {
                drop(packet);
                Err(Error::IllegalState {
                    operation: "send_packet",
                    required: "a streaming target",
                    actual: "Idle",
                })
            }
        }
    }

    /// Adopt the downstream consumer's pool for producer-side
    /// allocation.
    pub fn receive_allocator(&self, pool: Arc<BlockPool>) {
        *self.allocator.lock().unwrap() = Some(pool);
    }

    /// The adopted downstream pool, if any.
    pub fn allocator(&self) -> Option<Arc<BlockPool>> {
        self.allocator.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for OutputConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputConnector")
            .field("name", &self.name)
            .field("free_envelopes", &self.free_envelopes())
            .field("plugged", &self.is_plugged())
            .finish()
    }
}
