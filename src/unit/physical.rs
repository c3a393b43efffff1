//! Physical units: resource singletons and their device drivers.

use super::arbiter::Arbiter;
use super::virtual_unit::VirtualUnit;
use crate::error::Result;
use crate::tag::{ConfigVerb, TagList, TagTypeId};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Stable numeric identity of a physical unit.
///
/// Used as the global lock-ordering key: collections sort the physical
/// units they touch by `UnitId` and acquire their activation mutexes in
/// that order, so two collections sharing resources can never deadlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub u32);

/// Identifies one client (virtual unit) of a physical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// Arbitration priority; higher wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u32);

/// How a physical unit arbitrates concurrent clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePolicy {
    /// At most one current client; contenders wait in priority order.
    Exclusive,
    /// Independent lock counts per concurrently current client.
    Shared,
}

/// Device-specific hooks driven by the activation protocol.
///
/// The arbitration saga calls these while holding the unit's activation
/// mutex, in phase order on the forward path and in reverse on the
/// compensation path. Implementations talk to hardware; the defaults are
/// no-ops so purely logical resources need no boilerplate.
pub trait UnitDriver: Send + Sync {
    /// Stop the client's use of the resource (STOP_PREVIOUS / STOP_NEW).
    fn stop(&self, client: ClientId) -> Result<()> {
        let _ = client;
        Ok(())
    }

    /// Swap in the client's parameters (CHANGE).
    fn change(&self, client: ClientId) -> Result<()> {
        let _ = client;
        Ok(())
    }

    /// Start the client's use of the resource (START_NEW).
    fn start(&self, client: ClientId) -> Result<()> {
        let _ = client;
        Ok(())
    }

    /// Restore the previously active parameters (RESTORE compensation).
    fn restore(&self, client: ClientId) -> Result<()> {
        let _ = client;
        Ok(())
    }

    /// Tag types this unit accepts for configuration.
    fn tag_ids(&self) -> &[TagTypeId] {
        &[]
    }

    /// Apply one partitioned tag list.
    fn configure_tags(&self, verb: ConfigVerb, tags: &mut TagList) -> Result<()> {
        let _ = (verb, tags);
        Ok(())
    }

    /// Commit a completed configuration batch to hardware.
    fn update(&self) -> Result<()> {
        Ok(())
    }
}

/// A no-op driver for purely logical resources.
#[derive(Debug, Default)]
pub struct NullDriver;

impl UnitDriver for NullDriver {}

/// A resource singleton.
///
/// Exactly one `PhysicalUnit` exists per logical resource. Clients never
/// touch it directly: they go through [`VirtualUnit`] proxies created by
/// [`create_virtual`](Self::create_virtual). All arbitration state lives
/// behind the activation mutex; the configure counter tracks how many
/// configuration batches have been committed.
pub struct PhysicalUnit {
    id: UnitId,
    name: String,
    driver: Arc<dyn UnitDriver>,
    pub(super) arbiter: Mutex<Arbiter>,
    configure_count: AtomicU32,
    next_client: AtomicU64,
}

impl PhysicalUnit {
    /// Create a physical unit with the given arbitration policy.
    pub fn new(
        id: UnitId,
        name: impl Into<String>,
        policy: ResourcePolicy,
        driver: Arc<dyn UnitDriver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            driver,
            arbiter: Mutex::new(Arbiter::new(policy)),
            configure_count: AtomicU32::new(0),
            next_client: AtomicU64::new(1),
        })
    }

    /// Shorthand for an exclusive unit with a no-op driver.
    pub fn exclusive(id: UnitId, name: impl Into<String>) -> Arc<Self> {
        Self::new(id, name, ResourcePolicy::Exclusive, Arc::new(NullDriver))
    }

    /// Shorthand for a shared unit with a no-op driver.
    pub fn shared(id: UnitId, name: impl Into<String>) -> Arc<Self> {
        Self::new(id, name, ResourcePolicy::Shared, Arc::new(NullDriver))
    }

    /// The unit's stable identity.
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// The unit's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device driver.
    pub fn driver(&self) -> &Arc<dyn UnitDriver> {
        &self.driver
    }

    /// The arbitration policy.
    pub fn policy(&self) -> ResourcePolicy {
        self.arbiter.lock().unwrap().policy()
    }

    /// Number of committed configuration batches.
    pub fn configure_count(&self) -> u32 {
        self.configure_count.load(Ordering::Acquire)
    }

    pub(super) fn bump_configure_count(&self) {
        self.configure_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Clients waiting for this unit, in notify order.
    pub fn waiting_clients(&self) -> Vec<ClientId> {
        self.arbiter
            .lock()
            .unwrap()
            .waiters()
            .iter()
            .map(|w| w.client)
            .collect()
    }

    /// Number of clients considered current: lock count above zero or
    /// mid-activation.
    pub fn current_count(&self) -> usize {
        self.arbiter.lock().unwrap().current_count()
    }

    /// Create a per-client proxy over this unit.
    pub fn create_virtual(self: &Arc<Self>, name: impl Into<String>) -> Arc<VirtualUnit> {
        let client = ClientId(self.next_client.fetch_add(1, Ordering::AcqRel));
        VirtualUnit::new(Arc::clone(self), client, name)
    }
}

impl std::fmt::Debug for PhysicalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("configure_count", &self.configure_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_virtual_assigns_distinct_clients() {
        let unit = PhysicalUnit::exclusive(UnitId(1), "decoder");
        let a = unit.create_virtual("a");
        let b = unit.create_virtual("b");
        assert_ne!(a.client(), b.client());
        assert_eq!(a.physical().id(), UnitId(1));
    }

    #[test]
    fn test_policy_reported() {
        let ex = PhysicalUnit::exclusive(UnitId(1), "decoder");
        let sh = PhysicalUnit::shared(UnitId(2), "mixer");
        assert_eq!(ex.policy(), ResourcePolicy::Exclusive);
        assert_eq!(sh.policy(), ResourcePolicy::Shared);
    }
}
