//! Bare metal machine records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Availability zone tag of machines owned by the shared pool.
pub const RESOURCE_POOL: &str = "resource_pool";

/// Lifecycle status of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    /// Idle and installed with the pool image.
    Active,
    /// Assigned to a tenant workload.
    Used,
    /// Mid-transition; exclusively held by one workflow.
    Processing,
    /// Decommissioned or unassigned.
    Inactive,
}

impl MachineStatus {
    /// Whether a fresh claim may take a machine in this status.
    #[must_use]
    pub fn is_claimable(self) -> bool {
        match self {
            Self::Active | Self::Inactive => true,
            Self::Used | Self::Processing => false,
        }
    }
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Used => write!(f, "used"),
            Self::Processing => write!(f, "processing"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// A physical server tracked by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BareMetalMachine {
    /// Stable machine identifier.
    pub id: String,
    /// Machine name.
    pub name: String,
    /// Owning workload, if any.
    pub instance_id: Option<String>,
    /// Hardware profile tag.
    pub instance_type: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub local_gb: u64,
    /// Either [`RESOURCE_POOL`] or a tenant cluster name.
    pub availability_zone: String,
    /// Power-management (IPMI) address.
    pub ipmi_ip: String,
    pub pxe_ip: String,
    pub pxe_mac: String,
    #[serde(default)]
    pub storage_ip: Option<String>,
    #[serde(default)]
    pub storage_mac: Option<String>,
    #[serde(default)]
    pub service_mac1: Option<String>,
    #[serde(default)]
    pub service_mac2: Option<String>,
    /// Fabric switch ports facing the service NICs.
    pub server_port1: u32,
    pub server_port2: u32,
    /// Datapath identifiers of the switches holding those ports.
    pub dpid1: String,
    pub dpid2: String,
    #[serde(default)]
    pub vlan_id: Option<u16>,
    pub status: MachineStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BareMetalMachine {
    /// Whether the machine sits in the shared pool.
    #[must_use]
    pub fn in_pool(&self) -> bool {
        self.availability_zone == RESOURCE_POOL
    }
}

/// Partial update of a machine record.
///
/// Nullable columns use `Option<Option<_>>`: the outer `None` leaves the
/// column untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineUpdate {
    pub instance_id: Option<Option<String>>,
    pub availability_zone: Option<String>,
    pub vlan_id: Option<Option<u16>>,
    pub status: Option<MachineStatus>,
}

impl MachineUpdate {
    /// Update touching only the status.
    #[must_use]
    pub fn status(status: MachineStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_instance(mut self, instance_id: Option<String>) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    #[must_use]
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.availability_zone = Some(zone.into());
        self
    }

    #[must_use]
    pub fn with_vlan(mut self, vlan_id: Option<u16>) -> Self {
        self.vlan_id = Some(vlan_id);
        self
    }

    /// Apply the update to a record in place.
    pub fn apply(&self, machine: &mut BareMetalMachine) {
        if let Some(instance_id) = &self.instance_id {
            machine.instance_id.clone_from(instance_id);
        }
        if let Some(zone) = &self.availability_zone {
            machine.availability_zone.clone_from(zone);
        }
        if let Some(vlan_id) = self.vlan_id {
            machine.vlan_id = vlan_id;
        }
        if let Some(status) = self.status {
            machine.status = status;
        }
        machine.updated_at = Some(Utc::now());
    }
}

/// A trunk ("outer") port carrying tenant VLANs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrunkPort {
    pub dpid: String,
    pub port: u32,
}

/// A fabric switch and its trunk ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub dpid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub outer_ports: Vec<u32>,
}

impl Switch {
    /// Trunk ports on this switch.
    pub fn trunk_ports(&self) -> impl Iterator<Item = TrunkPort> + '_ {
        self.outer_ports.iter().map(|port| TrunkPort {
            dpid: self.dpid.clone(),
            port: *port,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Machine record with plausible hardware identity.
    pub fn machine(id: &str, instance_type: &str, status: MachineStatus) -> BareMetalMachine {
        BareMetalMachine {
            id: id.to_string(),
            name: format!("bmm-{id}"),
            instance_id: None,
            instance_type: instance_type.to_string(),
            vcpus: 16,
            memory_mb: 65536,
            local_gb: 480,
            availability_zone: RESOURCE_POOL.to_string(),
            ipmi_ip: format!("10.0.0.{}", id.len()),
            pxe_ip: "10.1.0.10".to_string(),
            pxe_mac: "AA:BB:CC:00:11:22".to_string(),
            storage_ip: None,
            storage_mac: None,
            service_mac1: None,
            service_mac2: None,
            server_port1: 11,
            server_port2: 12,
            dpid1: "0x0001".to_string(),
            dpid2: "0x0002".to_string(),
            vlan_id: None,
            status,
            updated_at: None,
        }
    }
}
