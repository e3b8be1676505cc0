//! Install progress markers.
//!
//! The installer environment records its progress by writing a single word
//! into a marker file on the provisioning server's shared storage.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Progress of the network-boot install/delete workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    /// No marker yet, or unrecognized content.
    Unknown,
    /// Installer booted and started writing the disk.
    Install,
    /// Disk written; installer is rebooting.
    InstallReboot,
    /// Installed OS booted.
    Installed,
    /// Disk wiped by the delete workflow.
    Deleted,
}

impl InstallState {
    /// Parse marker text.
    #[must_use]
    pub fn from_marker(marker: &str) -> Self {
        match marker.trim() {
            "install" => Self::Install,
            "install_reboot" => Self::InstallReboot,
            "installed" => Self::Installed,
            "deleted" => Self::Deleted,
            "" => Self::Unknown,
            other => {
                debug!(marker = %other, "Unrecognized install marker");
                Self::Unknown
            }
        }
    }

    /// Marker text written by the installer for this state.
    #[must_use]
    pub fn as_marker(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Install => "install",
            Self::InstallReboot => "install_reboot",
            Self::Installed => "installed",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            other => write!(f, "{}", other.as_marker()),
        }
    }
}

/// Reads a workload's install marker.
#[async_trait]
pub trait MachineStateProbe: Send + Sync {
    async fn read(&self, instance_name: &str) -> Result<InstallState>;
}

/// Probe reading `<cobbler_path>/images/<instance>/<status_file>`.
#[derive(Debug, Clone)]
pub struct FileStateProbe {
    images_root: PathBuf,
    status_file: String,
}

impl FileStateProbe {
    #[must_use]
    pub fn new(cobbler_path: impl Into<PathBuf>, status_file: impl Into<String>) -> Self {
        Self {
            images_root: cobbler_path.into().join("images"),
            status_file: status_file.into(),
        }
    }

    #[must_use]
    pub fn marker_path(&self, instance_name: &str) -> PathBuf {
        self.images_root.join(instance_name).join(&self.status_file)
    }
}

#[async_trait]
impl MachineStateProbe for FileStateProbe {
    async fn read(&self, instance_name: &str) -> Result<InstallState> {
        match tokio::fs::read_to_string(self.marker_path(instance_name)).await {
            Ok(content) => Ok(InstallState::from_marker(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InstallState::Unknown),
            Err(e) => Err(e.into()),
        }
    }
}
