//! Capability traits shared by the connector types.
//!
//! Connectors are capability-polymorphic rather than a deep hierarchy:
//! anything that can take a packet implements [`PacketReceiver`],
//! anything that can be poked from downstream implements
//! [`UpstreamNotify`], and a streaming unit's packet entry point is a
//! [`PacketHandler`].

use super::packet::StreamPacket;
use crate::error::Result;
use crate::pool::BlockPool;
use std::sync::Arc;

/// What became of a packet offered to a receiver.
///
/// A refused packet travels back in the outcome, never stays with the
/// receiver: by the time `receive_packet` returns, the packet is either
/// fully owned by the receiver or back in the caller's hands.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// The receiver took ownership (delivered, queued, or discarded
    /// while flushing).
    Accepted,
    /// No room, or the receiver is preparing/stopping; retry after an
    /// upstream notification.
    Full(StreamPacket),
    /// The receiver is idle; delivering now is a protocol error.
    Rejected(StreamPacket),
}

/// A connector or unit that accepts packets.
pub trait PacketReceiver: Send + Sync {
    /// Offer a packet. See [`ReceiveOutcome`] for the contract.
    fn receive_packet(&self, packet: StreamPacket) -> ReceiveOutcome;

    /// Adopt a downstream unit's block pool so producers allocate from
    /// the consumer's memory. Default: not supported, ignored.
    fn receive_allocator(&self, pool: Arc<BlockPool>) {
        let _ = pool;
    }
}

/// Flow-control notices travelling against the data direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamNotice {
    /// A previously exhausted envelope free-list has room again; a
    /// stalled producer may borrow and resume.
    PacketAvailable,
    /// A downstream consumer relieved its backpressure and wants data
    /// re-sent.
    PacketRequest,
}

/// The upstream end of a flow-control edge.
pub trait UpstreamNotify: Send + Sync {
    /// Deliver one flow-control notice.
    fn upstream_notification(&self, notice: UpstreamNotice);
}

/// A streaming unit's packet entry point, called by its connectors for
/// packets that passed the state checks.
pub trait PacketHandler: Send + Sync {
    /// Process one packet. The handler owns it from here.
    fn handle_packet(&self, packet: StreamPacket) -> Result<()>;
}
