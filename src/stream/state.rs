//! The streaming state machine consumed by connectors.

use crate::error::{Error, Result};
use crate::observability::trace_state_change;
use std::sync::atomic::{AtomicU8, Ordering};

/// Streaming states of a unit.
///
/// Idle → Preparing → Running → Flushing → Idle is the normal cycle;
/// Stopping tears down from Running without draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// No streaming; plug/unplug are legal only here.
    Idle = 0,
    /// Resources being set up; deliveries bounce.
    Preparing = 1,
    /// Steady state; packets flow.
    Running = 2,
    /// Draining; deliveries are accepted and discarded.
    Flushing = 3,
    /// Tearing down; deliveries bounce.
    Stopping = 4,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => StreamState::Preparing,
            2 => StreamState::Running,
            3 => StreamState::Flushing,
            4 => StreamState::Stopping,
            _ => StreamState::Idle,
        }
    }

    /// The state's display name.
    pub fn name(self) -> &'static str {
        match self {
            StreamState::Idle => "Idle",
            StreamState::Preparing => "Preparing",
            StreamState::Running => "Running",
            StreamState::Flushing => "Flushing",
            StreamState::Stopping => "Stopping",
        }
    }

    fn can_transition_to(self, to: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, to),
            (Idle, Preparing)
                | (Preparing, Running)
                | (Preparing, Stopping)
                | (Running, Flushing)
                | (Running, Stopping)
                | (Flushing, Idle)
                | (Stopping, Idle)
        )
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lock-free cell holding a unit's streaming state.
///
/// Shared between a unit and its connectors; connectors only read it,
/// the owning unit drives transitions.
#[derive(Debug)]
pub struct StreamStateCell {
    name: String,
    state: AtomicU8,
}

impl StreamStateCell {
    /// Create a cell in the Idle state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(StreamState::Idle as u8),
        }
    }

    /// The owning unit's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the current state.
    pub fn get(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to`, validating the transition.
    pub fn transition(&self, to: StreamState) -> Result<()> {
        let from = self.get();
        if !from.can_transition_to(to) {
            return Err(Error::IllegalState {
                operation: "stream transition",
                required: "a legal predecessor state",
                actual: from.name(),
            });
        }
        self.state.store(to as u8, Ordering::Release);
        trace_state_change(&self.name, from.name(), to.name());
        Ok(())
    }

    /// Whether plug/unplug are currently legal.
    pub fn is_idle(&self) -> bool {
        self.get() == StreamState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_cycle() {
        let cell = StreamStateCell::new("unit");
        assert_eq!(cell.get(), StreamState::Idle);

        cell.transition(StreamState::Preparing).unwrap();
        cell.transition(StreamState::Running).unwrap();
        cell.transition(StreamState::Flushing).unwrap();
        cell.transition(StreamState::Idle).unwrap();
        assert!(cell.is_idle());
    }

    #[test]
    fn test_stopping_path() {
        let cell = StreamStateCell::new("unit");
        cell.transition(StreamState::Preparing).unwrap();
        cell.transition(StreamState::Running).unwrap();
        cell.transition(StreamState::Stopping).unwrap();
        cell.transition(StreamState::Idle).unwrap();
    }

    #[test]
    fn test_illegal_transitions_refused() {
        let cell = StreamStateCell::new("unit");
        assert!(cell.transition(StreamState::Running).is_err());
        assert!(cell.transition(StreamState::Flushing).is_err());

        cell.transition(StreamState::Preparing).unwrap();
        assert!(cell.transition(StreamState::Idle).is_err());
        assert!(cell.transition(StreamState::Flushing).is_err());
    }
}
