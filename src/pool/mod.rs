//! Interrupt-safe block pool allocation.
//!
//! Streaming units move data in fixed-size blocks drawn from a
//! [`BlockPool`]. The pool hands out reference-counted [`BlockRef`]
//! handles (single blocks or aligned clusters); packets reference block
//! contents through [`DataRange`] views. Callers that cannot be
//! satisfied block and retry after every release, and a `min_wait` of
//! zero turns the allocator into a non-blocking probe whose empty result
//! is the pushback signal.

mod block;
#[allow(clippy::module_inception)]
mod pool;
mod range;

pub use pool::{BlockPool, BlockRef, PoolConfig};
pub use range::{DataRange, RangeKind};
