//! # Strand
//!
//! An embedded multimedia device-driver runtime: a component framework
//! that models shared hardware resources as units, arbitrates concurrent
//! access to them, and moves data through them as flow-controlled
//! pipelines.
//!
//! ## Features
//!
//! - **Unit arbitration**: multi-phase activate/lock/preempt protocol
//!   with rollback-safe compensation and priority wait queues
//! - **Ordered multi-resource locking**: collections lock every touched
//!   unit in one fixed global order, so they cannot deadlock each other
//! - **Streaming connectors**: pluggable packet edges with explicit
//!   backpressure (bounce/re-request, packet-available signalling)
//! - **Block pools**: reference-counted, optionally clustered buffers
//!   with an allocation-free release path safe from interrupt context
//!
//! ## Quick Start
//!
//! ```rust
//! use strand::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> strand::Result<()> {
//! // One physical unit per resource; clients act through proxies.
//! let decoder = PhysicalUnit::exclusive(UnitId(1), "audio-decoder");
//! let client = decoder.create_virtual("player");
//! client.connect()?;
//! client.initialize()?;
//!
//! // Arbitrate, stream, release.
//! client.activate_and_lock(&ActivationRequest::new(Priority(10)))?;
//! let pool = BlockPool::new("audio", PoolConfig::new(4096, 32))?;
//! let blocks = pool.get_blocks(4, 1, Some("player"))?;
//! drop(blocks);
//! client.unlock()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod clock;
pub mod error;
pub mod observability;
pub mod pool;
pub mod stream;
pub mod sync;
pub mod tag;
pub mod unit;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::clock::{ClockTime, TimeWindow};
    pub use crate::error::{Error, Result};
    pub use crate::pool::{BlockPool, BlockRef, DataRange, PoolConfig, RangeKind};
    pub use crate::stream::{
        OutputConnector, PacketReceiver, QueuedInputConnector, ReceiveOutcome, StreamPacket,
        StreamState, StreamStateCell,
    };
    pub use crate::tag::{ConfigVerb, Configurable, TagList, TagTypeId, TagValue};
    pub use crate::unit::{
        ActivationOutcome, ActivationRequest, PhysicalUnit, Priority, UnitId, VirtualUnit,
        VirtualUnitCollection,
    };
}

pub use error::{Error, Result};
