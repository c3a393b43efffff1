//! Per-unit arbitration state.
//!
//! Everything in this module lives behind a physical unit's activation
//! mutex. The exclusive policy keeps at most one current client and a
//! wait array that is re-sorted on every insertion so index 0 is always
//! the next client to notify; the shared policy keeps an independent
//! lock count per concurrently current client.

use super::physical::{ClientId, Priority, ResourcePolicy};
use crate::clock::TimeWindow;
use crate::sync::Event;
use std::cmp::Reverse;
use std::sync::Arc;

/// Where one client stands in the activation saga.
///
/// Tracked explicitly per client so a failed activation can resume its
/// compensation exactly where the forward pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseState {
    /// Not using the resource.
    #[default]
    Idle,
    /// STOP_PREVIOUS issued against this client.
    Stopping,
    /// CHANGE issued: parameters being swapped in.
    Changing,
    /// START_NEW issued: resource starting.
    Starting,
    /// COMPLETE committed: client is current.
    Active,
}

/// One current (or mid-activation) client of a unit.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// The client this record belongs to.
    pub client: ClientId,
    /// Priority the client activated with.
    pub priority: Priority,
    /// Time window the client requested.
    pub window: TimeWindow,
    /// Outstanding locks held by the client.
    pub lock_count: u32,
    /// Where the client stands in the activation saga.
    pub phase: PhaseState,
}

impl ClientRecord {
    fn new(client: ClientId, priority: Priority, window: TimeWindow) -> Self {
        Self {
            client,
            priority,
            window,
            lock_count: 0,
            phase: PhaseState::Idle,
        }
    }
}

/// A wait-queue entry for a client whose CHECK was infeasible.
#[derive(Debug)]
pub struct RegisteredUnit {
    /// The waiting client.
    pub client: ClientId,
    /// Priority of the deferred request.
    pub priority: Priority,
    /// Time window of the deferred request.
    pub window: TimeWindow,
    /// Insertion-order age, the FIFO tiebreak.
    pub age: u64,
    /// Latched grant signal the waiter blocks on.
    pub grant: Arc<Event>,
}

impl RegisteredUnit {
    /// Comparator key: descending priority, then earlier requested
    /// window start, then smaller insertion age.
    fn sort_key(&self) -> (Reverse<Priority>, u64, u64) {
        (Reverse(self.priority), self.window.start_key(), self.age)
    }
}

/// Outcome of the CHECK phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// The request can proceed.
    Feasible {
        /// The unlocked current client that must be stopped first, if any.
        preempt: Option<ClientId>,
    },
    /// The resource is locked by another client.
    Infeasible,
}

/// Arbitration state for one physical unit.
#[derive(Debug)]
pub enum Arbiter {
    /// At most one current client.
    Exclusive(ExclusiveState),
    /// Independent lock counts per client.
    Shared(SharedState),
}

impl Arbiter {
    /// Create an arbiter for the given sharing policy.
    pub fn new(policy: ResourcePolicy) -> Self {
        match policy {
            ResourcePolicy::Exclusive => Arbiter::Exclusive(ExclusiveState::default()),
            ResourcePolicy::Shared => Arbiter::Shared(SharedState::default()),
        }
    }

    /// The sharing policy this arbiter enforces.
    pub fn policy(&self) -> ResourcePolicy {
        match self {
            Arbiter::Exclusive(_) => ResourcePolicy::Exclusive,
            Arbiter::Shared(_) => ResourcePolicy::Shared,
        }
    }

    /// Decide feasibility for `client` without mutating anything.
    pub fn check(&self, client: ClientId) -> CheckResult {
        match self {
            Arbiter::Exclusive(state) => match &state.current {
                None => CheckResult::Feasible { preempt: None },
                Some(rec) if rec.client == client => CheckResult::Feasible { preempt: None },
                // An unlocked current client can be preempted
                Some(rec) if rec.lock_count == 0 => CheckResult::Feasible {
                    preempt: Some(rec.client),
                },
                Some(_) => CheckResult::Infeasible,
            },
            // Shared resources admit every client
            Arbiter::Shared(_) => CheckResult::Feasible { preempt: None },
        }
    }

    /// The record for `client`, creating it if absent.
    pub fn record_mut(
        &mut self,
        client: ClientId,
        priority: Priority,
        window: TimeWindow,
    ) -> &mut ClientRecord {
        match self {
            Arbiter::Exclusive(state) => {
                let replace = !matches!(&state.current, Some(rec) if rec.client == client);
                if replace {
                    state.current = Some(ClientRecord::new(client, priority, window));
                }
                state.current.as_mut().unwrap_or_else(|| unreachable!())
            }
            Arbiter::Shared(state) => {
                if let Some(i) = state.records.iter().position(|r| r.client == client) {
                    &mut state.records[i]
                } else {
                    state.records.push(ClientRecord::new(client, priority, window));
                    state.records.last_mut().unwrap_or_else(|| unreachable!())
                }
            }
        }
    }

    /// The existing record for `client`, if any.
    pub fn find_record_mut(&mut self, client: ClientId) -> Option<&mut ClientRecord> {
        match self {
            Arbiter::Exclusive(state) => state
                .current
                .as_mut()
                .filter(|rec| rec.client == client),
            Arbiter::Shared(state) => state.records.iter_mut().find(|r| r.client == client),
        }
    }

    /// Drop the record for `client` (shared: remove; exclusive: clear
    /// current if it is this client).
    pub fn remove_record(&mut self, client: ClientId) {
        match self {
            Arbiter::Exclusive(state) => {
                if matches!(&state.current, Some(rec) if rec.client == client) {
                    state.current = None;
                }
            }
            Arbiter::Shared(state) => state.records.retain(|r| r.client != client),
        }
    }

    /// Register `client` in the wait array, keeping it sorted.
    ///
    /// Re-registering an already waiting client replaces its entry (the
    /// request parameters may have changed) but keeps its original age.
    pub fn register_waiter(
        &mut self,
        client: ClientId,
        priority: Priority,
        window: TimeWindow,
        grant: Arc<Event>,
    ) {
        let Arbiter::Exclusive(state) = self else {
            return;
        };
        let age = match state.remove_waiter(client) {
            Some(prev) => prev.age,
            None => {
                let age = state.next_age;
                state.next_age += 1;
                age
            }
        };
        let entry = RegisteredUnit {
            client,
            priority,
            window,
            age,
            grant,
        };
        let pos = state
            .waiters
            .partition_point(|w| w.sort_key() <= entry.sort_key());
        state.waiters.insert(pos, entry);
    }

    /// Cancel a registration. Returns true if the client was waiting.
    pub fn cancel_registration(&mut self, client: ClientId) -> bool {
        match self {
            Arbiter::Exclusive(state) => state.remove_waiter(client).is_some(),
            Arbiter::Shared(_) => false,
        }
    }

    /// Whether `client` currently has a wait-queue registration.
    pub fn is_registered(&self, client: ClientId) -> bool {
        match self {
            Arbiter::Exclusive(state) => state.waiters.iter().any(|w| w.client == client),
            Arbiter::Shared(_) => false,
        }
    }

    /// Fire the grant signal of the waiter at index 0, if any.
    ///
    /// The entry stays queued; it is removed when the waiter's retried
    /// CHECK succeeds or its registration is cancelled.
    pub fn notify_next_waiter(&self) {
        if let Arbiter::Exclusive(state) = self {
            if let Some(next) = state.waiters.first() {
                next.grant.set();
            }
        }
    }

    /// The current client of an exclusive unit.
    pub fn current(&self) -> Option<&ClientRecord> {
        match self {
            Arbiter::Exclusive(state) => state.current.as_ref(),
            Arbiter::Shared(_) => None,
        }
    }

    /// Number of clients considered current: lock count above zero or
    /// mid-activation.
    pub fn current_count(&self) -> usize {
        let is_current =
            |r: &ClientRecord| r.lock_count > 0 || r.phase != PhaseState::Idle;
        match self {
            Arbiter::Exclusive(state) => {
                usize::from(state.current.as_ref().is_some_and(|r| is_current(r)))
            }
            Arbiter::Shared(state) => state.records.iter().filter(|r| is_current(r)).count(),
        }
    }

    /// Snapshot of the wait queue, in notify order (tests, diagnostics).
    pub fn waiters(&self) -> &[RegisteredUnit] {
        match self {
            Arbiter::Exclusive(state) => &state.waiters,
            Arbiter::Shared(_) => &[],
        }
    }
}

/// Exclusive policy: at most one current client.
#[derive(Debug, Default)]
pub struct ExclusiveState {
    current: Option<ClientRecord>,
    /// Always sorted by the arbitration comparator; index 0 is next.
    waiters: Vec<RegisteredUnit>,
    next_age: u64,
}

impl ExclusiveState {
    fn remove_waiter(&mut self, client: ClientId) -> Option<RegisteredUnit> {
        let pos = self.waiters.iter().position(|w| w.client == client)?;
        Some(self.waiters.remove(pos))
    }
}

/// Shared policy: independent lock counts per client.
#[derive(Debug, Default)]
pub struct SharedState {
    records: Vec<ClientRecord>,
}
