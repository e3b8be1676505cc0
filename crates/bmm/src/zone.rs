//! Availability zone strings.
//!
//! A workload requests placement with one of:
//!
//! - `zone`: any single token, meaning the shared pool
//! - `cluster,vlan`: join the existing region `cluster` on VLAN `vlan`
//! - `C,cluster,vlan`: same, creating the region first

use crate::error::{BmmError, Result};
use crate::machine::RESOURCE_POOL;

/// Token that requests region creation.
const CREATE_TOKEN: &str = "C";

/// Highest usable 802.1Q VLAN id.
const MAX_VLAN_ID: u16 = 4094;

/// Parsed availability zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSpec {
    /// Zone string with the create token removed.
    pub cleaned_zone: String,
    /// Tenant cluster (region) name, or [`RESOURCE_POOL`].
    pub cluster_name: String,
    pub vlan_id: Option<u16>,
    pub create_region: bool,
}

impl ZoneSpec {
    /// Parse a zone string.
    ///
    /// # Errors
    /// Returns [`BmmError::InvalidZone`] when the string has too many parts
    /// or the VLAN id is not a valid integer.
    pub fn parse(zone: &str) -> Result<Self> {
        let mut parts: Vec<&str> = zone.split(',').map(str::trim).collect();

        let mut create_region = false;
        if parts.len() > 1 && parts[0] == CREATE_TOKEN {
            parts.remove(0);
            create_region = true;
        }

        let cleaned_zone = parts.join(",");

        match parts.as_slice() {
            [] | [_] => Ok(Self {
                cleaned_zone,
                cluster_name: RESOURCE_POOL.to_string(),
                vlan_id: None,
                create_region: false,
            }),
            [cluster, vlan] => {
                if cluster.is_empty() {
                    return Err(invalid(zone, "empty cluster name"));
                }
                let vlan_id = parse_vlan(zone, vlan)?;
                Ok(Self {
                    cleaned_zone,
                    cluster_name: (*cluster).to_string(),
                    vlan_id: Some(vlan_id),
                    create_region,
                })
            }
            _ => Err(invalid(zone, "expected [C,]cluster,vlan")),
        }
    }

    /// Whether the workload targets the shared pool.
    #[must_use]
    pub fn is_pool(&self) -> bool {
        self.cluster_name == RESOURCE_POOL
    }
}

fn parse_vlan(zone: &str, vlan: &str) -> Result<u16> {
    let vlan_id: u16 = vlan
        .parse()
        .map_err(|_| invalid(zone, &format!("VLAN id '{vlan}' is not an integer")))?;
    if vlan_id == 0 || vlan_id > MAX_VLAN_ID {
        return Err(invalid(zone, &format!("VLAN id {vlan_id} out of range")));
    }
    Ok(vlan_id)
}

fn invalid(zone: &str, reason: &str) -> BmmError {
    BmmError::InvalidZone {
        zone: zone.to_string(),
        reason: reason.to_string(),
    }
}
