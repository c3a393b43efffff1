//! Streaming connectors, packets and flow control.
//!
//! Data moves between units as [`StreamPacket`] envelopes carrying
//! [`DataRange`](crate::pool::DataRange) views into pool memory. An
//! [`OutputConnector`] owns a free-list of envelopes and delivers to a
//! plugged [`PacketReceiver`]; input connectors gate delivery on the
//! owning unit's [`StreamState`] and push back with bounce/re-request
//! and packet-available signalling instead of blocking the producer's
//! thread.

mod input;
mod nested;
mod output;
mod packet;
pub(crate) mod state;
mod traits;

pub use input::{QueuedInputConnector, UnqueuedInputConnector};
pub use nested::{NestedInputConnector, NestedUpstreamLink};
pub use output::{OutputConnector, SendOutcome};
pub use packet::{PacketFlags, StreamPacket};
pub use state::{StreamState, StreamStateCell};
pub use traits::{PacketHandler, PacketReceiver, ReceiveOutcome, UpstreamNotice, UpstreamNotify};
