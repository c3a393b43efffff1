//! Reusable streaming packet envelopes.

use super::output::EnvelopePool;
use crate::clock::ClockTime;
use crate::pool::DataRange;
use smallvec::SmallVec;
use std::sync::Arc;

/// Flow metadata bits carried by a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(pub u32);

impl PacketFlags {
    /// No metadata bits set.
    pub const NONE: Self = Self(0);
    /// First packet of a segment.
    pub const SEGMENT_START: Self = Self(1 << 0);
    /// Last packet of a segment.
    pub const SEGMENT_END: Self = Self(1 << 1);
    /// First packet of a group.
    pub const GROUP_START: Self = Self(1 << 2);
    /// Last packet of a group.
    pub const GROUP_END: Self = Self(1 << 3);
    /// The stream is discontinuous at this packet.
    pub const DISCONTINUITY: Self = Self(1 << 4);

    /// Check whether all bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// A reusable envelope carrying data-range views plus flow metadata.
///
/// Packets are borrowed from an output connector's envelope free-list,
/// filled, handed downstream, and eventually returned to their origin.
/// Dropping a packet anywhere releases its ranges and returns the
/// envelope, so an unaccepted or discarded packet can never leak.
pub struct StreamPacket {
    slot: usize,
    origin: Arc<EnvelopePool>,
    ranges: SmallVec<[DataRange; 4]>,
    flags: PacketFlags,
    timestamp: ClockTime,
    sequence: u64,
}

impl StreamPacket {
    pub(super) fn new(slot: usize, origin: Arc<EnvelopePool>, sequence: u64) -> Self {
        Self {
            slot,
            origin,
            ranges: SmallVec::new(),
            flags: PacketFlags::NONE,
            timestamp: ClockTime::NONE,
            sequence,
        }
    }

    /// Monotonic sequence number assigned at borrow time.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The packet's flow metadata.
    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    /// Add flow metadata bits.
    pub fn mark(&mut self, flags: PacketFlags) {
        self.flags = self.flags.with(flags);
    }

    /// The packet's presentation timestamp.
    pub fn timestamp(&self) -> ClockTime {
        self.timestamp
    }

    /// Set the presentation timestamp.
    pub fn set_timestamp(&mut self, timestamp: ClockTime) {
        self.timestamp = timestamp;
    }

    /// Append a data range.
    pub fn add_range(&mut self, range: DataRange) {
        self.ranges.push(range);
    }

    /// The carried ranges.
    pub fn ranges(&self) -> &[DataRange] {
        &self.ranges
    }

    /// Move the ranges out, leaving the packet empty.
    pub fn take_ranges(&mut self) -> SmallVec<[DataRange; 4]> {
        std::mem::take(&mut self.ranges)
    }

    /// Release every carried range.
    pub fn clear_ranges(&mut self) {
        self.ranges.clear();
    }

    /// Total payload bytes across all ranges.
    pub fn payload_len(&self) -> usize {
        self.ranges.iter().map(DataRange::len).sum()
    }

    /// Whether the packet carries no ranges.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl Drop for StreamPacket {
    fn drop(&mut self) {
        // Ranges first, then the envelope back to its free-list.
        self.ranges.clear();
        self.flags = PacketFlags::NONE;
        self.timestamp = ClockTime::NONE;
        let origin = Arc::clone(&self.origin);
        origin.return_slot(self.slot);
    }
}

impl std::fmt::Debug for StreamPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPacket")
            .field("sequence", &self.sequence)
            .field("ranges", &self.ranges.len())
            .field("payload_len", &self.payload_len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
