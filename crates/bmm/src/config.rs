//! Orchestrator configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BmmError, Result};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bmm/bmm.toml";

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BmmConfig {
    /// Address of the provisioning (cobbler) server, substituted into scripts.
    pub cobbler: String,
    /// Root of the provisioning server's web directory.
    pub cobbler_path: PathBuf,
    /// Directory holding per-MAC PXE configuration files.
    pub pxe_boot_path: PathBuf,
    /// Optional directory of `*.hbs` templates overriding the built-in ones.
    pub template_dir: Option<PathBuf>,
    /// Flow controller endpoint.
    pub ofc_service_url: Option<String>,
    /// Name of the marker file written by the installer environment.
    pub bmm_status_path: String,
    /// Disk size for instance types without local storage.
    pub default_disk_gb: u64,
    pub ipmi_user: String,
    pub ipmi_password: Option<String>,
    pub ipmi_port: u16,
    /// Interval between marker and power polls.
    pub poll_interval_secs: u64,
    /// Deadline for each install/delete wait; unbounded when unset.
    pub install_timeout_secs: Option<u64>,
    /// Machine inventory file (file-backed store).
    pub inventory_path: PathBuf,
    /// Workload registry file (file-backed store).
    pub workloads_path: PathBuf,
    /// Directory holding images by reference (file-backed image store).
    pub image_dir: PathBuf,
}

impl Default for BmmConfig {
    fn default() -> Self {
        Self {
            cobbler: "127.0.0.1".to_string(),
            cobbler_path: PathBuf::from("/var/www/cobbler"),
            pxe_boot_path: PathBuf::from("/var/lib/tftpboot/pxelinux.cfg"),
            template_dir: None,
            ofc_service_url: None,
            bmm_status_path: "status".to_string(),
            default_disk_gb: 10,
            ipmi_user: "admin".to_string(),
            ipmi_password: None,
            ipmi_port: 623,
            poll_interval_secs: 10,
            install_timeout_secs: None,
            inventory_path: PathBuf::from("/var/lib/bmm/inventory.yaml"),
            workloads_path: PathBuf::from("/var/lib/bmm/workloads.yaml"),
            image_dir: PathBuf::from("/var/lib/bmm/images"),
        }
    }
}

impl BmmConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| BmmError::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that would otherwise fail deep inside a workflow.
    ///
    /// # Errors
    /// Returns [`BmmError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(BmmError::Config("poll_interval_secs must be > 0".into()));
        }
        if self.bmm_status_path.is_empty() {
            return Err(BmmError::Config("bmm_status_path must not be empty".into()));
        }
        if self.install_timeout_secs == Some(0) {
            return Err(BmmError::Config("install_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn install_timeout(&self) -> Option<Duration> {
        self.install_timeout_secs.map(Duration::from_secs)
    }
}
