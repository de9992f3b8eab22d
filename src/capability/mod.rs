//! Capability system
//!
//! Workers declare what they can do through descriptor files. The
//! registry keeps the table; the router turns a task's required tags
//! into exactly one assignee.

mod registry;
mod router;
mod types;

pub use registry::{CapabilityRegistry, RegisteredCapability, Registration, RegistryTable};
pub use router::{DelegationRouter, RoutingRequest};
pub use types::{Capability, ContextScope};
