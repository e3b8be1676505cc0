//! Region synchronization.
//!
//! Joining a machine attaches both of its server ports to the tenant region,
//! creating the region (and its VLAN on every trunk port) when asked.
//! Leaving detaches the ports and, for the last machine, tears the region
//! down again.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::models::{RegionBinding, ServerPort};
use super::traits::{FabricOutcome, FlowControllerRpc};
use crate::error::{BmmError, Result};
use crate::inventory::MachineInventory;
use crate::machine::{BareMetalMachine, RESOURCE_POOL};

/// Drives the flow controller on behalf of the orchestrator.
#[derive(Clone)]
pub struct FabricSyncClient {
    rpc: Arc<dyn FlowControllerRpc>,
    inventory: MachineInventory,
}

impl FabricSyncClient {
    #[must_use]
    pub fn new(rpc: Arc<dyn FlowControllerRpc>, inventory: MachineInventory) -> Self {
        Self { rpc, inventory }
    }

    /// Binding of a machine's server ports to `region`.
    #[must_use]
    pub fn binding(machine: &BareMetalMachine, region: &str, vlan_id: u16) -> RegionBinding {
        RegionBinding {
            region: region.to_string(),
            port1: ServerPort::new(machine.dpid1.clone(), machine.server_port1),
            port2: ServerPort::new(machine.dpid2.clone(), machine.server_port2),
            vlan_id,
        }
    }

    /// Binding a tenant machine currently holds, if any.
    #[must_use]
    pub fn current_binding(machine: &BareMetalMachine) -> Option<RegionBinding> {
        if machine.availability_zone == RESOURCE_POOL {
            return None;
        }
        machine
            .vlan_id
            .map(|vlan| Self::binding(machine, &machine.availability_zone, vlan))
    }

    /// Attach a machine to a region.
    ///
    /// # Errors
    /// - [`BmmError::RegionNotFound`] if the region is absent and
    ///   `create_region` is false.
    /// - [`BmmError::RegionAlreadyExists`] if `create_region` is set but the
    ///   region exists.
    /// - [`BmmError::RegionCreationFailed`] /
    ///   [`BmmError::RegionSettingOuterPortAssocFailed`] when setting up a
    ///   new region fails.
    pub async fn join_region(&self, binding: &RegionBinding, create_region: bool) -> Result<()> {
        let region = binding.region.as_str();
        let exists = self.rpc.show_region().await?.iter().any(|r| r == region);

        match (exists, create_region) {
            (false, false) => return Err(BmmError::RegionNotFound(region.to_string())),
            (true, true) => return Err(BmmError::RegionAlreadyExists(region.to_string())),
            (false, true) => self.create_region(region, binding.vlan_id).await?,
            (true, false) => {}
        }

        for port in binding.ports() {
            self.rpc.set_server_port(port, region).await?;
            debug!(region, dpid = %port.dpid, port = port.port, "Server port attached");
        }
        self.rpc.save().await?;

        info!(region, vlan_id = binding.vlan_id, "Machine joined region");
        Ok(())
    }

    async fn create_region(&self, region: &str, vlan_id: u16) -> Result<()> {
        self.rpc
            .create_region(region)
            .await
            .map_err(|e| BmmError::RegionCreationFailed {
                region: region.to_string(),
                message: e.to_string(),
            })?;
        info!(region, "Region created");

        for switch in self.inventory.switches().await? {
            for trunk in switch.trunk_ports() {
                let port = ServerPort::new(trunk.dpid, trunk.port);
                self.rpc
                    .set_outer_port_association_setting(&port, vlan_id, region)
                    .await
                    .map_err(|e| BmmError::RegionSettingOuterPortAssocFailed {
                        region: region.to_string(),
                        dpid: port.dpid.clone(),
                        port: port.port,
                        vlan_id,
                        message: e.to_string(),
                    })?;
                debug!(region, dpid = %port.dpid, port = port.port, vlan_id, "VLAN associated with trunk port");
            }
        }
        Ok(())
    }

    /// Detach a machine from a region, destroying it when `delete_region`.
    ///
    /// Ports that are not attached are skipped, so repeating a leave is
    /// harmless.
    ///
    /// # Errors
    /// Returns the first controller error.
    pub async fn leave_region(&self, binding: &RegionBinding, delete_region: bool) -> Result<()> {
        let region = binding.region.as_str();
        let exists = self.rpc.show_region().await?.iter().any(|r| r == region);

        if exists {
            let attached = self.rpc.show_server_ports(region).await?;
            for port in binding.ports() {
                if attached.contains(port) {
                    self.rpc.clear_server_port(port, region).await?;
                    debug!(region, dpid = %port.dpid, port = port.port, "Server port detached");
                } else {
                    debug!(region, dpid = %port.dpid, port = port.port, "Server port already detached");
                }
            }
        } else {
            debug!(region, "Region already absent");
        }

        if !delete_region || !exists {
            self.rpc.save().await?;
            info!(region, "Machine left region");
            return Ok(());
        }

        for switch in self.inventory.switches().await? {
            for trunk in switch.trunk_ports() {
                let port = ServerPort::new(trunk.dpid, trunk.port);
                self.rpc
                    .clear_outer_port_association_setting(&port, binding.vlan_id, region)
                    .await?;
            }
        }
        self.rpc.destroy_region(region).await?;
        self.rpc.save().await?;

        info!(region, "Machine left region; region destroyed");
        Ok(())
    }

    /// [`Self::leave_region`] with failures recorded instead of returned.
    pub async fn leave_region_best_effort(
        &self,
        binding: &RegionBinding,
        delete_region: bool,
    ) -> FabricOutcome {
        match self.leave_region(binding, delete_region).await {
            Ok(()) => FabricOutcome::Synced,
            Err(e) => {
                warn!(
                    region = %binding.region,
                    delete_region,
                    error = %e,
                    "Fabric cleanup failed; controller state drifted from inventory"
                );
                FabricOutcome::Drifted {
                    region: binding.region.clone(),
                    error: e.to_string(),
                }
            }
        }
    }
}
