//! Network fabric synchronization.
//!
//! Tenant isolation lives on a software-defined network controller: each
//! tenant cluster is a region bound to a VLAN, carried on every trunk port
//! and joined by the server ports of the tenant's machines.

mod client;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod models;
mod sync;
mod traits;

pub use client::HttpFlowController;
#[cfg(any(test, feature = "testing"))]
pub use memory::InMemoryFlowController;
pub use models::{RegionBinding, ServerPort};
pub use sync::FabricSyncClient;
pub use traits::{FabricOutcome, FlowControllerRpc};
