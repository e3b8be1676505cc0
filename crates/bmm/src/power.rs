//! Out-of-band power control.
//!
//! Power actions are issued to a machine's BMC over IPMI. No retries happen
//! here; the orchestrator's poll loops re-check power state as needed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BmmError, Result};

/// Power state reported by the BMC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// Parse `ipmitool power status` output (`Chassis Power is on`).
///
/// # Errors
/// Returns [`BmmError::Power`] when the text has no recognizable state.
pub fn parse_power_status(address: &str, output: &str) -> Result<PowerState> {
    let state = output
        .trim()
        .rsplit(' ')
        .next()
        .map(str::to_ascii_lowercase);

    match state.as_deref() {
        Some("on") => Ok(PowerState::On),
        Some("off") => Ok(PowerState::Off),
        _ => Err(BmmError::Power {
            address: address.to_string(),
            message: format!("unrecognized power status: {}", output.trim()),
        }),
    }
}

/// Power operations against one machine's management address.
#[async_trait]
pub trait PowerController: Send + Sync {
    /// Power the machine on.
    async fn on(&self, address: &str) -> Result<()>;

    /// Hard power off.
    async fn off(&self, address: &str) -> Result<()>;

    /// ACPI soft power off.
    async fn soft_off(&self, address: &str) -> Result<()>;

    /// Hard reset.
    async fn reset(&self, address: &str) -> Result<()>;

    /// Current power state.
    async fn status(&self, address: &str) -> Result<PowerState>;

    /// Reset a running machine or power on a stopped one.
    async fn reboot_or_power_on(&self, address: &str) -> Result<()> {
        match self.status(address).await? {
            PowerState::On => self.reset(address).await,
            PowerState::Off => self.on(address).await,
        }
    }
}

/// IPMI power controller driven through `ipmitool`.
#[derive(Debug, Clone)]
pub struct IpmiPowerController {
    username: String,
    password: Option<String>,
    port: u16,
}

impl IpmiPowerController {
    #[must_use]
    pub fn new(username: impl Into<String>, password: Option<String>, port: u16) -> Self {
        Self {
            username: username.into(),
            password,
            port,
        }
    }

    /// Execute an ipmitool command against `address`.
    async fn ipmi_command(&self, address: &str, command: &str) -> Result<String> {
        let port_str = self.port.to_string();
        let password = self.password.as_deref().unwrap_or("");
        let mut args = vec![
            "-I",
            "lanplus",
            "-H",
            address,
            "-p",
            &port_str,
            "-U",
            &self.username,
            "-P",
            password,
        ];
        args.extend(command.split_whitespace());

        debug!(bmc_address = %address, command = %command, "Executing IPMI command");

        let output = tokio::process::Command::new("ipmitool")
            .args(&args)
            .output()
            .await
            .map_err(|e| BmmError::Power {
                address: address.to_string(),
                message: format!("failed to execute ipmitool: {e}"),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(BmmError::Power {
                address: address.to_string(),
                message: format!(
                    "'{command}' failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

#[async_trait]
impl PowerController for IpmiPowerController {
    async fn on(&self, address: &str) -> Result<()> {
        self.ipmi_command(address, "power on").await.map(drop)
    }

    async fn off(&self, address: &str) -> Result<()> {
        self.ipmi_command(address, "power off").await.map(drop)
    }

    async fn soft_off(&self, address: &str) -> Result<()> {
        self.ipmi_command(address, "power soft").await.map(drop)
    }

    async fn reset(&self, address: &str) -> Result<()> {
        self.ipmi_command(address, "power reset").await.map(drop)
    }

    async fn status(&self, address: &str) -> Result<PowerState> {
        let output = self.ipmi_command(address, "power status").await?;
        parse_power_status(address, &output)
    }
}
