//! Virtual unit collections: ordered multi-resource locking.
//!
//! A collection activates a bundle of virtual units as one transaction.
//! Before touching anything it computes the full reachable set of
//! physical units once, deduplicates it and sorts it by
//! [`UnitId`](super::UnitId); the
//! activation mutexes are then acquired in that fixed order and released
//! in reverse, so two collections sharing resources always agree on
//! acquisition order and cannot deadlock each other.
//!
//! Members activate leaves-first-then-self on the normal path and
//! recover self-first-then-leaves, because the parent's own unit
//! typically guards the children.

use super::arbiter::{Arbiter, CheckResult};
use super::physical::PhysicalUnit;
use super::saga::{self, ActivationFlags, ActivationOutcome, ActivationRequest};
use super::virtual_unit::VirtualUnit;
use crate::error::{Error, Result};
use crate::observability::span_unit;
use crate::sync::Event;
use std::sync::Arc;

/// A bundle of virtual units locked and unlocked as one transaction.
pub struct VirtualUnitCollection {
    name: String,
    /// Leaf members, in activation order.
    members: Vec<Arc<VirtualUnit>>,
    /// The composite's own unit; activated after the leaves.
    self_unit: Option<Arc<VirtualUnit>>,
}

impl VirtualUnitCollection {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            self_unit: None,
        }
    }

    /// The collection's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a leaf member.
    pub fn add_member(&mut self, unit: Arc<VirtualUnit>) {
        self.members.push(unit);
    }

    /// Set the composite's own unit.
    pub fn set_self_unit(&mut self, unit: Arc<VirtualUnit>) {
        self.self_unit = Some(unit);
    }

    /// The leaf members.
    pub fn members(&self) -> &[Arc<VirtualUnit>] {
        &self.members
    }

    /// Members in activation order: leaves first, then self.
    fn activation_order(&self) -> impl Iterator<Item = &Arc<VirtualUnit>> {
        self.members.iter().chain(self.self_unit.iter())
    }

    /// The reachable physical units, deduplicated and sorted by id.
    fn ordered_physicals(&self) -> Vec<Arc<PhysicalUnit>> {
        let mut units: Vec<Arc<PhysicalUnit>> = self
            .activation_order()
            .map(|vu| Arc::clone(vu.physical()))
            .collect();
        units.sort_by_key(|u| u.id());
        units.dedup_by_key(|u| u.id());
        units
    }

    /// Activate and lock every member, waiting through contention.
    ///
    /// One pass holds every activation mutex (in id order) while first
    /// checking feasibility for all members and then running the full
    /// saga per member. If any check is infeasible the infeasible
    /// members are registered, all mutexes are released in reverse, the
    /// caller blocks until every registered grant has fired, and the
    /// pass is retried. A saga failure recovers the already-committed
    /// members self-first-then-leaves and surfaces the error.
    pub fn activate_and_lock(&self, request: &ActivationRequest) -> Result<()> {
        let span = span_unit(&self.name);
        let _enter = span.enter();

        let units = self.ordered_physicals();
        let registering = request.flags.contains(ActivationFlags::REGISTER);

        loop {
            let mut guards: Vec<_> = units
                .iter()
                .map(|u| u.arbiter.lock().unwrap())
                .collect();

            // Feasibility pass over all members while holding every
            // mutex; nothing is committed yet.
            let mut pending: Vec<Arc<Event>> = Vec::new();
            for vu in self.activation_order() {
                let idx = self.unit_index(&units, vu)?;
                if let CheckResult::Infeasible = guards[idx].check(vu.client()) {
                    if !registering {
                        release_reverse(&mut guards);
                        return Err(Error::Contention(units[idx].id().0));
                    }
                    guards[idx].register_waiter(
                        vu.client(),
                        request.priority,
                        request.window,
                        Arc::clone(vu.grant()),
                    );
                    pending.push(Arc::clone(vu.grant()));
                }
            }

            if !pending.is_empty() {
                tracing::debug!(
                    collection = %self.name,
                    waiting = pending.len(),
                    "collection activation pending"
                );
                release_reverse(&mut guards);
                // Latched events: grants that fired while we still held
                // the mutexes are not lost.
                for grant in &pending {
                    grant.wait();
                    grant.reset();
                }
                continue;
            }

            // Commit pass, leaves first then self. Feasibility cannot
            // change underneath us while every mutex is held.
            let mut committed: Vec<&Arc<VirtualUnit>> = Vec::new();
            for vu in self.activation_order() {
                let idx = self.unit_index(&units, vu)?;
                let outcome = saga::activate_and_lock(
                    &units[idx],
                    &mut guards[idx],
                    vu.client(),
                    request,
                    vu.grant(),
                );
                match outcome {
                    Ok(ActivationOutcome::Granted) => committed.push(vu),
                    // Two members contending for the same exclusive
                    // physical unit inside one collection
                    Ok(ActivationOutcome::Pending) => {
                        self.recover(&units, &mut guards, &committed);
                        release_reverse(&mut guards);
                        return Err(Error::Contention(units[idx].id().0));
                    }
                    Err(err) => {
                        self.recover(&units, &mut guards, &committed);
                        release_reverse(&mut guards);
                        return Err(err);
                    }
                }
            }

            release_reverse(&mut guards);
            tracing::debug!(collection = %self.name, "collection activated");
            return Ok(());
        }
    }

    /// Force-retire already-committed members, self first then leaves.
    fn recover(
        &self,
        units: &[Arc<PhysicalUnit>],
        guards: &mut [std::sync::MutexGuard<'_, Arbiter>],
        committed: &[&Arc<VirtualUnit>],
    ) {
        for vu in committed.iter().rev() {
            let Ok(idx) = self.unit_index(units, vu) else {
                continue;
            };
            if let Err(err) = saga::passivate(&units[idx], &mut guards[idx], vu.client()) {
                crate::observability::trace_recovery_failed(
                    units[idx].name(),
                    vu.client().0,
                    &err,
                );
            }
        }
    }

    fn unit_index(&self, units: &[Arc<PhysicalUnit>], vu: &VirtualUnit) -> Result<usize> {
        units
            .binary_search_by_key(&vu.physical().id(), |u| u.id())
            .map_err(|_| Error::NotFound(format!("physical unit for {}", vu.name())))
    }

    /// Unlock every member, self first then leaves.
    pub fn unlock(&self) -> Result<()> {
        let mut first_err = None;
        let order: Vec<_> = self.activation_order().collect();
        for vu in order.iter().rev() {
            if let Err(err) = vu.unlock() {
                tracing::warn!(unit = vu.name(), %err, "unlock failed during collection unlock");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Passivate every member, self first then leaves.
    pub fn passivate(&self) -> Result<()> {
        let mut first_err = None;
        let order: Vec<_> = self.activation_order().collect();
        for vu in order.iter().rev() {
            if let Err(err) = vu.passivate() {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

/// Drop the guards back-to-front, the reverse of acquisition order.
fn release_reverse(guards: &mut Vec<std::sync::MutexGuard<'_, Arbiter>>) {
    while guards.pop().is_some() {}
}

impl std::fmt::Debug for VirtualUnitCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUnitCollection")
            .field("name", &self.name)
            .field("members", &self.members.len())
            .field("has_self_unit", &self.self_unit.is_some())
            .finish()
    }
}
