//! Call lifecycle management
//!
//! The [`CallManager`] owns the registry of active calls, applies normalized
//! events to them, enforces the inbound admission policy, and drives the
//! max-duration timers and transcript waiters.

#[allow(clippy::module_inception)]
mod manager;
mod policy;
mod registry;


pub use manager::{CallManager, EventOutcome, InitiateOptions, ManagerSettings};
pub use policy::AdmissionPolicy;
pub use registry::CallRegistry;
