//! Flow controller RPC seam and fabric sync results.

use async_trait::async_trait;

use super::models::ServerPort;
use crate::error::Result;

/// Remote calls offered by the network flow controller.
#[async_trait]
pub trait FlowControllerRpc: Send + Sync {
    /// Attach a server port to a region.
    async fn set_server_port(&self, port: &ServerPort, region: &str) -> Result<()>;

    /// Detach a server port from a region.
    async fn clear_server_port(&self, port: &ServerPort, region: &str) -> Result<()>;

    async fn create_region(&self, region: &str) -> Result<()>;

    async fn destroy_region(&self, region: &str) -> Result<()>;

    /// Carry `vlan_id` for `region` on a trunk port.
    async fn set_outer_port_association_setting(
        &self,
        port: &ServerPort,
        vlan_id: u16,
        region: &str,
    ) -> Result<()>;

    async fn clear_outer_port_association_setting(
        &self,
        port: &ServerPort,
        vlan_id: u16,
        region: &str,
    ) -> Result<()>;

    /// Names of all regions.
    async fn show_region(&self) -> Result<Vec<String>>;

    /// Server ports currently attached to a region.
    async fn show_server_ports(&self, region: &str) -> Result<Vec<ServerPort>>;

    /// Persist the running configuration.
    async fn save(&self) -> Result<()>;
}

/// Result of a best-effort fabric change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FabricOutcome {
    /// Controller state matches the inventory.
    Synced,
    /// The change failed; controller state may have drifted from inventory.
    Drifted { region: String, error: String },
    /// Nothing to do (machine was not attached to a tenant region).
    Skipped,
}

impl FabricOutcome {
    #[must_use]
    pub fn is_drifted(&self) -> bool {
        matches!(self, Self::Drifted { .. })
    }
}
