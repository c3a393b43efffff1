//! Units: resource singletons, per-client proxies and arbitration.
//!
//! A [`PhysicalUnit`] is the singleton for one shared resource; clients
//! act through [`VirtualUnit`] proxies. `activate_and_lock` arbitrates
//! access with a multi-phase saga (check, stop previous, change, start
//! new, complete) that rolls back cleanly on partial failure, queues
//! contenders in priority order and notifies them on unlock.
//! [`VirtualUnitCollection`] extends the protocol to bundles of units
//! with deadlock-free ordered locking.

mod arbiter;
mod collection;
mod physical;
mod saga;
mod virtual_unit;

pub use arbiter::{Arbiter, CheckResult, ClientRecord, PhaseState, RegisteredUnit};
pub use collection::VirtualUnitCollection;
pub use physical::{ClientId, NullDriver, PhysicalUnit, Priority, ResourcePolicy, UnitDriver, UnitId};
pub use saga::{ActivationFlags, ActivationOutcome, ActivationRequest};
pub use virtual_unit::VirtualUnit;
