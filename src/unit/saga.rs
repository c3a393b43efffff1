//! The multi-phase activation saga.
//!
//! `activate_and_lock` runs CHECK, STOP_PREVIOUS, CHANGE, START_NEW and
//! COMPLETE in order, one flag bit per phase. Every phase that succeeds
//! past CHECK pushes a typed compensating action; on failure the stack
//! is unwound in reverse (STOP_NEW, RESTORE, RESTART_PREVIOUS), then an
//! unconditional failed pass cancels any wait-queue registration and
//! notifies the next waiter. The original phase error is surfaced only
//! after recovery has completed.
//!
//! All functions here are called with the unit's activation mutex held;
//! the caller (virtual unit or collection) owns lock acquisition order.

use super::arbiter::{Arbiter, CheckResult, PhaseState};
use super::physical::{ClientId, PhysicalUnit, Priority, ResourcePolicy};
use crate::clock::{ClockTime, TimeWindow};
use crate::error::{Error, Result};
use crate::observability::{
    record_activation_granted, record_activation_pending, record_activation_preempted,
    record_rollback,
};
use crate::sync::Event;
use smallvec::SmallVec;
use std::sync::Arc;

/// Phase-selection flags for an activation request.
///
/// One bit per forward phase, one per compensating phase, plus REGISTER
/// which turns an infeasible CHECK into a wait-queue registration
/// instead of a contention error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationFlags(pub u32);

impl ActivationFlags {
    /// Decide feasibility.
    pub const CHECK: Self = Self(1 << 0);
    /// Stop the currently active client if it differs.
    pub const STOP_PREVIOUS: Self = Self(1 << 1);
    /// Swap in the new client's parameters.
    pub const CHANGE: Self = Self(1 << 2);
    /// Start the new client.
    pub const START_NEW: Self = Self(1 << 3);
    /// Commit: mark current, take the lock.
    pub const COMPLETE: Self = Self(1 << 4);
    /// Compensation: undo START_NEW.
    pub const STOP_NEW: Self = Self(1 << 5);
    /// Compensation: undo CHANGE.
    pub const RESTORE: Self = Self(1 << 6);
    /// Compensation: undo STOP_PREVIOUS.
    pub const RESTART_PREVIOUS: Self = Self(1 << 7);
    /// Queue on contention instead of failing.
    pub const REGISTER: Self = Self(1 << 8);

    /// All forward phases plus all compensating phases.
    pub const ACTIVATE: Self = Self(0xff);

    /// Check whether all bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Parameters of one activation attempt.
#[derive(Debug, Clone, Copy)]
pub struct ActivationRequest {
    /// Phase-selection flags.
    pub flags: ActivationFlags,
    /// Arbitration priority; higher wins.
    pub priority: Priority,
    /// The time span the client intends to use the resource for.
    pub window: TimeWindow,
    /// Monotonic time the request was issued at.
    pub system_time: ClockTime,
}

impl ActivationRequest {
    /// A full activation (all phases, no registration) at `priority`.
    pub fn new(priority: Priority) -> Self {
        Self {
            flags: ActivationFlags::ACTIVATE,
            priority,
            window: TimeWindow::ASAP,
            system_time: ClockTime::ZERO,
        }
    }

    /// Enqueue on contention instead of failing.
    pub fn registered(mut self) -> Self {
        self.flags = self.flags.with(ActivationFlags::REGISTER);
        self
    }

    /// Set the requested time window.
    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    /// Set the issue time.
    pub fn at(mut self, system_time: ClockTime) -> Self {
        self.system_time = system_time;
        self
    }
}

/// Result of a successful activation attempt.
///
/// `Pending` is deferred success, not an error: the client is queued and
/// its grant event will fire when it should retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The client is current and holds one more lock.
    Granted,
    /// The client is registered in the wait queue.
    Pending,
}

/// A compensating action recorded by a forward phase.
#[derive(Debug, Clone, Copy)]
enum Compensation {
    /// Undo START_NEW: stop the new client.
    StopNew(ClientId),
    /// Undo CHANGE: restore the previous parameters.
    Restore(ClientId),
    /// Undo STOP_PREVIOUS: restart the preempted client.
    RestartPrevious(ClientId),
}

/// Run the activation saga for one client of one unit.
///
/// Caller holds the unit's activation mutex and passes its state in.
pub(super) fn activate_and_lock(
    unit: &PhysicalUnit,
    arbiter: &mut Arbiter,
    client: ClientId,
    request: &ActivationRequest,
    grant: &Arc<Event>,
) -> Result<ActivationOutcome> {
    let flags = request.flags;

    // CHECK
    let preempt = if flags.contains(ActivationFlags::CHECK) {
        match arbiter.check(client) {
            CheckResult::Feasible { preempt } => preempt,
            CheckResult::Infeasible => {
                if flags.contains(ActivationFlags::REGISTER) {
                    arbiter.register_waiter(
                        client,
                        request.priority,
                        request.window,
                        Arc::clone(grant),
                    );
                    record_activation_pending(unit.name());
                    tracing::debug!(
                        unit = unit.name(),
                        client = client.0,
                        "activation pending, client registered"
                    );
                    return Ok(ActivationOutcome::Pending);
                }
                return Err(Error::Contention(unit.id().0));
            }
        }
    } else {
        None
    };

    // Proceeding: a stale registration from an earlier pending attempt
    // is consumed here.
    arbiter.cancel_registration(client);

    let mut compensations: SmallVec<[Compensation; 3]> = SmallVec::new();
    let driver = unit.driver();

    let result: Result<()> = (|| {
        // STOP_PREVIOUS
        if let Some(prev) = preempt {
            if !flags.contains(ActivationFlags::STOP_PREVIOUS) {
                return Err(Error::Contention(unit.id().0));
            }
            driver.stop(prev)?;
            if let Some(rec) = arbiter.find_record_mut(prev) {
                rec.phase = PhaseState::Stopping;
            }
            if flags.contains(ActivationFlags::RESTART_PREVIOUS) {
                compensations.push(Compensation::RestartPrevious(prev));
            }
            record_activation_preempted(unit.name());
        }

        // CHANGE
        if flags.contains(ActivationFlags::CHANGE) {
            driver.change(client)?;
            if flags.contains(ActivationFlags::RESTORE) {
                compensations.push(Compensation::Restore(client));
            }
        }

        // START_NEW
        if flags.contains(ActivationFlags::START_NEW) {
            driver.start(client)?;
            if flags.contains(ActivationFlags::STOP_NEW) {
                compensations.push(Compensation::StopNew(client));
            }
        }

        Ok(())
    })();

    if let Err(err) = result {
        rollback(unit, arbiter, client, &mut compensations);
        return Err(err);
    }

    // COMPLETE
    if flags.contains(ActivationFlags::COMPLETE) {
        if let Some(prev) = preempt {
            arbiter.remove_record(prev);
        }
        let rec = arbiter.record_mut(client, request.priority, request.window);
        rec.phase = PhaseState::Active;
        rec.lock_count += 1;
        record_activation_granted(unit.name());
        tracing::debug!(
            unit = unit.name(),
            client = client.0,
            lock_count = rec.lock_count,
            "activation complete"
        );
    }

    Ok(ActivationOutcome::Granted)
}

/// Unwind the compensation stack in reverse, then run the unconditional
/// failed pass: cancel the client's registration and notify the next
/// waiter. Recovery failures are logged and skipped so the unwind always
/// runs to the end.
fn rollback(
    unit: &PhysicalUnit,
    arbiter: &mut Arbiter,
    client: ClientId,
    compensations: &mut SmallVec<[Compensation; 3]>,
) {
    let driver = unit.driver();

    while let Some(comp) = compensations.pop() {
        let undone = match comp {
            Compensation::StopNew(c) => driver.stop(c),
            Compensation::Restore(c) => driver.restore(c),
            Compensation::RestartPrevious(prev) => driver.start(prev).map(|()| {
                if let Some(rec) = arbiter.find_record_mut(prev) {
                    rec.phase = PhaseState::Active;
                }
            }),
        };
        if let Err(err) = undone {
            crate::observability::trace_recovery_failed(unit.name(), client.0, &err);
        }
    }

    arbiter.cancel_registration(client);
    arbiter.notify_next_waiter();
    record_rollback(unit.name());
}

/// Release one lock. At zero the next waiter is notified; an exclusive
/// client stays current (and preemptible), a shared client's record is
/// retired.
pub(super) fn unlock(unit: &PhysicalUnit, arbiter: &mut Arbiter, client: ClientId) -> Result<()> {
    let policy = arbiter.policy();
    let rec = arbiter
        .find_record_mut(client)
        .ok_or(Error::IllegalState {
            operation: "unlock",
            required: "locked",
            actual: "not current",
        })?;
    if rec.lock_count == 0 {
        return Err(Error::IllegalState {
            operation: "unlock",
            required: "lock count > 0",
            actual: "lock count 0",
        });
    }
    rec.lock_count -= 1;

    if rec.lock_count == 0 {
        if policy == ResourcePolicy::Shared {
            rec.phase = PhaseState::Idle;
            arbiter.remove_record(client);
        }
        arbiter.notify_next_waiter();
        tracing::debug!(unit = unit.name(), client = client.0, "unlocked");
    }
    Ok(())
}

/// Cancel a pending registration; if the client is current, force stop
/// and retire it, then notify the next waiter.
pub(super) fn passivate(
    unit: &PhysicalUnit,
    arbiter: &mut Arbiter,
    client: ClientId,
) -> Result<()> {
    let cancelled = arbiter.cancel_registration(client);

    if arbiter.find_record_mut(client).is_some() {
        unit.driver().stop(client)?;
        arbiter.remove_record(client);
        arbiter.notify_next_waiter();
        tracing::debug!(unit = unit.name(), client = client.0, "passivated");
    } else if cancelled {
        arbiter.notify_next_waiter();
        tracing::debug!(
            unit = unit.name(),
            client = client.0,
            "pending registration cancelled"
        );
    }
    Ok(())
}

/// Atomic rearbitration: release one lock and immediately relock under
/// new request parameters, all in one mutex hold.
pub(super) fn unlock_and_lock(
    unit: &PhysicalUnit,
    arbiter: &mut Arbiter,
    client: ClientId,
    request: &ActivationRequest,
    grant: &Arc<Event>,
) -> Result<ActivationOutcome> {
    unlock(unit, arbiter, client)?;
    activate_and_lock(unit, arbiter, client, request, grant)
}
