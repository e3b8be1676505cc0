//! Bare metal machine lifecycle orchestration.
//!
//! Physical servers are handed out as compute instances. Each spawn claims a
//! machine from a shared inventory, installs an OS image over PXE while
//! tracking the installer through an out-of-band marker, and, for tenant
//! workloads, joins the machine's switch ports to the tenant's network
//! region on a flow controller. Destroy reverses all of it.
//!
//! # Example
//!
//! ```rust,ignore
//! use bmm::{BmmConfig, BmmOrchestrator, Collaborators};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BmmConfig::load("/etc/bmm/bmm.toml".as_ref())?;
//!     let orchestrator = BmmOrchestrator::new(config, collaborators)?;
//!
//!     // "C,tenantA,100": create region tenantA on VLAN 100 and join it
//!     let machine = orchestrator.spawn(&workload, &CancellationToken::new()).await?;
//!     println!("{} is {}", machine.name, machine.status);
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod fabric;
mod filelock;
pub mod inventory;
pub mod machine;
pub mod orchestrator;
pub mod power;
pub mod probe;
pub mod state;
pub mod template;
pub mod wait;
pub mod workload;
pub mod zone;

pub use config::BmmConfig;
pub use error::{BmmError, Result};
pub use fabric::{FabricOutcome, FabricSyncClient, FlowControllerRpc, HttpFlowController};
#[cfg(any(test, feature = "testing"))]
pub use fabric::InMemoryFlowController;
pub use inventory::{InventoryStore, MachineInventory, YamlInventoryStore};
pub use machine::{BareMetalMachine, MachineStatus, MachineUpdate, Switch, RESOURCE_POOL};
pub use orchestrator::{BmmOrchestrator, Collaborators, DestroyReport, HostStats, InstanceInfo, PoolReturn};
pub use power::{IpmiPowerController, PowerController, PowerState};
pub use probe::{FileStateProbe, InstallState, MachineStateProbe};
pub use workload::{DirImageStore, ImageStore, Workload, WorkloadStore, YamlWorkloadStore};
pub use zone::ZoneSpec;
