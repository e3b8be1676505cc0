//! Error taxonomy for the bare metal orchestrator.

use thiserror::Error;

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, BmmError>;

/// Errors that can occur while provisioning or reclaiming machines.
#[derive(Error, Debug)]
pub enum BmmError {
    /// No idle machine of the requested instance type.
    #[error("No bare metal machine available for instance type '{0}'")]
    MachineUnavailable(String),

    /// Machine record does not exist.
    #[error("Bare metal machine not found: {0}")]
    MachineNotFound(String),

    /// Workload was deleted (or never existed) while a workflow was running.
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Region is absent on the flow controller and creation was not requested.
    #[error("Region not found on flow controller: {0}")]
    RegionNotFound(String),

    /// Region creation was requested but the region already exists.
    #[error("Region already exists on flow controller: {0}")]
    RegionAlreadyExists(String),

    /// Flow controller refused to create the region.
    #[error("Failed to create region '{region}': {message}")]
    RegionCreationFailed { region: String, message: String },

    /// VLAN association on a trunk port failed.
    #[error("Failed to associate VLAN {vlan_id} of region '{region}' with outer port {dpid}/{port}: {message}")]
    RegionSettingOuterPortAssocFailed {
        region: String,
        dpid: String,
        port: u32,
        vlan_id: u16,
        message: String,
    },

    /// Availability zone string does not follow `[C,]cluster,vlan`.
    #[error("Invalid availability zone '{zone}': {reason}")]
    InvalidZone { zone: String, reason: String },

    /// Out-of-band power management failed.
    #[error("Power control error for {address}: {message}")]
    Power { address: String, message: String },

    /// Flow controller RPC failed.
    #[error("Flow controller error in {method}: {message}")]
    FlowController { method: String, message: String },

    /// Inventory datastore failure.
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// Template could not be rendered.
    #[error("Template error: {0}")]
    Template(String),

    /// Image could not be fetched.
    #[error("Image error: {0}")]
    Image(String),

    /// A wait exceeded its configured deadline.
    #[error("Timed out after {secs} seconds waiting for {what}")]
    Timeout { what: String, secs: u64 },

    /// The workflow was cancelled by its caller.
    #[error("Cancelled while waiting for {0}")]
    Cancelled(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BmmError {
    /// Whether the error is one of the fabric-consistency errors raised on
    /// the join path.
    #[must_use]
    pub fn is_fabric_consistency(&self) -> bool {
        matches!(
            self,
            Self::RegionNotFound(_)
                | Self::RegionAlreadyExists(_)
                | Self::RegionCreationFailed { .. }
                | Self::RegionSettingOuterPortAssocFailed { .. }
        )
    }
}
