//! Error types for Strand.

use thiserror::Error;

/// Result type alias using Strand's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Strand operations.
///
/// Deferred success (a pending activation, a bounced packet) is expressed
/// in return types, never as an `Error` variant: only genuinely failed
/// operations surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource is in use and the caller did not request registration.
    #[error("unit {0} is in use")]
    Contention(u32),

    /// Memory pool has no free blocks and the caller declined to wait.
    #[error("memory pool exhausted: {wanted} blocks wanted, {free} free")]
    PoolExhausted {
        /// Blocks requested.
        wanted: usize,
        /// Blocks currently free.
        free: usize,
    },

    /// Connector queue or free-list is full.
    #[error("connector full: {0}")]
    Full(String),

    /// Connector free-list has no envelopes to borrow.
    #[error("connector empty: {0}")]
    Empty(String),

    /// Operation is illegal in the current streaming state.
    #[error("illegal streaming state: {operation} requires {required}, state is {actual}")]
    IllegalState {
        /// The attempted operation.
        operation: &'static str,
        /// The state the operation requires.
        required: &'static str,
        /// The observed state.
        actual: &'static str,
    },

    /// A parameter failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A named unit, tag, or link was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A blocking wait exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Activation recovery itself failed; the unit may be inconsistent.
    #[error("activation recovery failed on unit {unit}: {reason}")]
    RecoveryFailed {
        /// The unit whose rollback failed.
        unit: u32,
        /// Driver-reported reason.
        reason: String,
    },
}
