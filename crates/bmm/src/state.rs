//! Workflow phases.
//!
//! The installer environment cannot report completion except by writing a
//! marker and rebooting itself, so installs and deletes advance through
//! fixed phases, each either acting on the machine or waiting for an edge.

use serde::{Deserialize, Serialize};

use crate::probe::InstallState;

/// Phases of the install workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    /// Fetch the image, render create script and installer PXE config, boot.
    Boot,
    /// Installer booted and claimed the machine.
    WaitInstall,
    /// Point PXE at local disk for the next boot.
    StartInstall,
    /// Installer finished writing the disk.
    WaitInstallReboot,
    /// Soft off, wait for power off, power on.
    PowerCycle,
    /// Installed OS came up.
    WaitInstalled,
    Complete,
}

impl InstallPhase {
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Boot => Self::WaitInstall,
            Self::WaitInstall => Self::StartInstall,
            Self::StartInstall => Self::WaitInstallReboot,
            Self::WaitInstallReboot => Self::PowerCycle,
            Self::PowerCycle => Self::WaitInstalled,
            Self::WaitInstalled | Self::Complete => Self::Complete,
        }
    }

    /// Marker this phase waits for, if it is a wait phase.
    #[must_use]
    pub fn awaited_marker(self) -> Option<InstallState> {
        match self {
            Self::WaitInstall => Some(InstallState::Install),
            Self::WaitInstallReboot => Some(InstallState::InstallReboot),
            Self::WaitInstalled => Some(InstallState::Installed),
            Self::Boot | Self::StartInstall | Self::PowerCycle | Self::Complete => None,
        }
    }
}

/// Phases of the delete workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePhase {
    /// Render wipe script and installer PXE config, boot.
    Boot,
    /// Disk wiped.
    WaitDeleted,
    /// Remove artifacts and make sure the machine is off.
    Cleanup,
    Complete,
}

impl DeletePhase {
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Boot => Self::WaitDeleted,
            Self::WaitDeleted => Self::Cleanup,
            Self::Cleanup | Self::Complete => Self::Complete,
        }
    }
}

impl InstallState {
    /// Position in the install progression; `None` for the delete marker.
    fn install_rank(self) -> Option<u8> {
        match self {
            Self::Unknown => Some(0),
            Self::Install => Some(1),
            Self::InstallReboot => Some(2),
            Self::Installed => Some(3),
            Self::Deleted => None,
        }
    }

    /// Whether the marker shows `target` was reached.
    ///
    /// Install markers are ordered, so a poll that misses an intermediate
    /// marker still observes the edge.
    #[must_use]
    pub fn has_reached(self, target: Self) -> bool {
        match (self.install_rank(), target.install_rank()) {
            (Some(current), Some(wanted)) => current >= wanted,
            _ => self == target,
        }
    }
}
