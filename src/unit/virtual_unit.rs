//! Virtual units: per-client proxies over physical units.

use super::physical::{ClientId, PhysicalUnit};
use super::saga::{self, ActivationOutcome, ActivationRequest};
use crate::error::{Error, Result};
use crate::observability::span_unit;
use crate::sync::Event;
use crate::tag::{ConfigVerb, TagList};
use std::sync::{Arc, Mutex};

/// Three-phase construction state.
///
/// The object graph is built once at boot: create, then connect, then
/// initialize. Activation is legal only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Connected,
    Initialized,
}

/// A per-client proxy over a [`PhysicalUnit`].
///
/// Created by [`PhysicalUnit::create_virtual`], then `connect`ed and
/// `initialize`d once, then repeatedly activated/unlocked/passivated.
/// Each virtual unit owns the latched grant event its pending
/// activations wait on.
pub struct VirtualUnit {
    physical: Arc<PhysicalUnit>,
    client: ClientId,
    name: String,
    grant: Arc<Event>,
    lifecycle: Mutex<Lifecycle>,
}

impl VirtualUnit {
    pub(super) fn new(
        physical: Arc<PhysicalUnit>,
        client: ClientId,
        name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            physical,
            client,
            name: name.into(),
            grant: Arc::new(Event::new()),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// The unit's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing physical unit.
    pub fn physical(&self) -> &Arc<PhysicalUnit> {
        &self.physical
    }

    /// This proxy's client identity at the physical unit.
    pub fn client(&self) -> ClientId {
        self.client
    }

    pub(super) fn grant(&self) -> &Arc<Event> {
        &self.grant
    }

    /// Wire the unit into the object graph (boot phase two).
    pub fn connect(&self) -> Result<()> {
        self.advance(Lifecycle::Created, Lifecycle::Connected, "connect")
    }

    /// Finish construction (boot phase three).
    pub fn initialize(&self) -> Result<()> {
        self.advance(Lifecycle::Connected, Lifecycle::Initialized, "initialize")
    }

    fn advance(&self, from: Lifecycle, to: Lifecycle, operation: &'static str) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if *lifecycle != from {
            return Err(Error::IllegalState {
                operation,
                required: match from {
                    Lifecycle::Created => "created",
                    Lifecycle::Connected => "connected",
                    Lifecycle::Initialized => "initialized",
                },
                actual: match *lifecycle {
                    Lifecycle::Created => "created",
                    Lifecycle::Connected => "connected",
                    Lifecycle::Initialized => "initialized",
                },
            });
        }
        *lifecycle = to;
        Ok(())
    }

    fn require_initialized(&self, operation: &'static str) -> Result<()> {
        let lifecycle = self.lifecycle.lock().unwrap();
        if *lifecycle != Lifecycle::Initialized {
            return Err(Error::IllegalState {
                operation,
                required: "initialized",
                actual: match *lifecycle {
                    Lifecycle::Created => "created",
                    Lifecycle::Connected => "connected",
                    Lifecycle::Initialized => "initialized",
                },
            });
        }
        Ok(())
    }

    /// One pass of the activation saga.
    ///
    /// Returns [`ActivationOutcome::Pending`] when the request was queued
    /// (deferred success); the caller waits on the grant event and
    /// retries.
    pub fn try_activate_and_lock(&self, request: &ActivationRequest) -> Result<ActivationOutcome> {
        self.require_initialized("activate_and_lock")?;
        let mut arbiter = self.physical.arbiter.lock().unwrap();
        saga::activate_and_lock(&self.physical, &mut arbiter, self.client, request, &self.grant)
    }

    /// Activate and lock, waiting through contention.
    ///
    /// On a pending result the activation mutex is released, the caller
    /// blocks on the grant event, then the whole sequence is retried
    /// until it succeeds or fails hard. Without the REGISTER flag a
    /// contended resource fails immediately with
    /// [`Error::Contention`](crate::error::Error).
    pub fn activate_and_lock(&self, request: &ActivationRequest) -> Result<()> {
        let span = span_unit(&self.name);
        let _enter = span.enter();

        loop {
            match self.try_activate_and_lock(request)? {
                ActivationOutcome::Granted => return Ok(()),
                ActivationOutcome::Pending => {
                    // Mutex released; grant latches, so a signal that
                    // fires before we reach wait() is not lost.
                    self.grant.wait();
                    self.grant.reset();
                }
            }
        }
    }

    /// Release one lock.
    pub fn unlock(&self) -> Result<()> {
        let mut arbiter = self.physical.arbiter.lock().unwrap();
        saga::unlock(&self.physical, &mut arbiter, self.client)
    }

    /// Atomically release one lock and relock under new parameters.
    pub fn unlock_and_lock(&self, request: &ActivationRequest) -> Result<ActivationOutcome> {
        self.require_initialized("unlock_and_lock")?;
        let mut arbiter = self.physical.arbiter.lock().unwrap();
        saga::unlock_and_lock(&self.physical, &mut arbiter, self.client, request, &self.grant)
    }

    /// Cancel any pending registration; if current, force stop and
    /// retire, notifying the next waiter.
    pub fn passivate(&self) -> Result<()> {
        let mut arbiter = self.physical.arbiter.lock().unwrap();
        saga::passivate(&self.physical, &mut arbiter, self.client)
    }

    /// Whether the retry grant has fired and not yet been consumed.
    pub fn grant_fired(&self) -> bool {
        self.grant.is_set()
    }

    /// Block until the retry grant fires, then consume it.
    ///
    /// For clients driving their own retry loop instead of
    /// [`activate_and_lock`](Self::activate_and_lock).
    pub fn await_grant(&self, timeout: std::time::Duration) -> Result<()> {
        self.grant.wait_timeout(timeout)?;
        self.grant.reset();
        Ok(())
    }

    /// This client's lock count (diagnostics and tests).
    pub fn lock_count(&self) -> u32 {
        let mut arbiter = self.physical.arbiter.lock().unwrap();
        arbiter
            .find_record_mut(self.client)
            .map(|r| r.lock_count)
            .unwrap_or(0)
    }

    /// Whether this client is current at its physical unit.
    pub fn is_current(&self) -> bool {
        let mut arbiter = self.physical.arbiter.lock().unwrap();
        arbiter.find_record_mut(self.client).is_some()
    }

    /// Configure the unit through the tag protocol.
    ///
    /// Tags must all be advertised by the driver; a Set that reaches
    /// `update` bumps the physical unit's configure counter.
    pub fn configure(&self, verb: ConfigVerb, tags: &mut TagList) -> Result<()> {
        let driver = self.physical.driver();
        if let Some(tag) = tags.iter().find(|t| !driver.tag_ids().contains(&t.id)) {
            return Err(Error::InvalidParameter(format!(
                "tag type {:#x} not accepted by unit {}",
                tag.id.0,
                self.name
            )));
        }
        driver.configure_tags(verb, tags)?;
        driver.update()?;
        if verb == ConfigVerb::Set {
            self.physical.bump_configure_count();
        }
        Ok(())
    }
}

impl std::fmt::Debug for VirtualUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUnit")
            .field("name", &self.name)
            .field("client", &self.client)
            .field("physical", &self.physical.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Priority, UnitId};

    fn ready(unit: &Arc<VirtualUnit>) {
        unit.connect().unwrap();
        unit.initialize().unwrap();
    }

    #[test]
    fn test_lifecycle_enforced() {
        let physical = PhysicalUnit::exclusive(UnitId(1), "decoder");
        let unit = physical.create_virtual("client");

        // Activation before initialize is a protocol error
        let request = ActivationRequest::new(Priority(1));
        assert!(matches!(
            unit.try_activate_and_lock(&request),
            Err(Error::IllegalState { .. })
        ));

        // Out-of-order construction is a protocol error
        assert!(unit.initialize().is_err());
        unit.connect().unwrap();
        assert!(unit.connect().is_err());
        unit.initialize().unwrap();

        assert!(unit.try_activate_and_lock(&request).is_ok());
    }

    #[test]
    fn test_activate_unlock_cycle() {
        let physical = PhysicalUnit::exclusive(UnitId(1), "decoder");
        let unit = physical.create_virtual("client");
        ready(&unit);

        unit.activate_and_lock(&ActivationRequest::new(Priority(1))).unwrap();
        assert_eq!(unit.lock_count(), 1);
        assert!(unit.is_current());

        // Relocking by the holder stacks
        unit.activate_and_lock(&ActivationRequest::new(Priority(1))).unwrap();
        assert_eq!(unit.lock_count(), 2);

        unit.unlock().unwrap();
        unit.unlock().unwrap();
        assert_eq!(unit.lock_count(), 0);

        // Underflow is a protocol error
        assert!(unit.unlock().is_err());
    }

    #[test]
    fn test_passivate_retires_current() {
        let physical = PhysicalUnit::exclusive(UnitId(1), "decoder");
        let unit = physical.create_virtual("client");
        ready(&unit);

        unit.activate_and_lock(&ActivationRequest::new(Priority(1))).unwrap();
        unit.passivate().unwrap();
        assert!(!unit.is_current());
    }
}
