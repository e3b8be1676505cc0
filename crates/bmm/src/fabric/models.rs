//! Flow controller request and response models.

use serde::{Deserialize, Serialize};

// ============================================================================
// Ports and bindings
// ============================================================================

/// A server-facing switch port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerPort {
    /// Datapath id of the switch.
    pub dpid: String,
    /// Port number on that switch.
    pub port: u32,
}

impl ServerPort {
    #[must_use]
    pub fn new(dpid: impl Into<String>, port: u32) -> Self {
        Self {
            dpid: dpid.into(),
            port,
        }
    }
}

/// The pair of server ports that join one machine to a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionBinding {
    pub region: String,
    pub port1: ServerPort,
    pub port2: ServerPort,
    pub vlan_id: u16,
}

impl RegionBinding {
    #[must_use]
    pub fn ports(&self) -> [&ServerPort; 2] {
        [&self.port1, &self.port2]
    }
}

// ============================================================================
// Wire bodies
// ============================================================================

/// Arguments naming a region.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionArgs<'a> {
    pub region_name: &'a str,
}

/// Arguments naming a server port within a region.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPortArgs<'a> {
    pub dpid: &'a str,
    pub port_no: u32,
    pub region_name: &'a str,
}

/// Arguments for a VLAN association on a trunk port.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OuterPortAssociationArgs<'a> {
    pub dpid: &'a str,
    pub port_no: u32,
    pub vlan_id_min: u16,
    pub vlan_id_max: u16,
    pub region_name: &'a str,
}

/// Empty argument object.
#[derive(Debug, Serialize)]
pub struct NoArgs {}

/// `showRegion` response.
#[derive(Debug, Deserialize)]
pub struct RegionList {
    #[serde(default)]
    pub regions: Vec<String>,
}

/// `showServerPort` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPortList {
    #[serde(default)]
    pub server_ports: Vec<ServerPort>,
}
