//! Boot script and PXE configuration rendering.
//!
//! Scripts land in the workload's directory on the provisioning server,
//! PXE configs in the TFTP `pxelinux.cfg` directory under the machine's
//! MAC-derived name.

use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::config::BmmConfig;
use crate::error::{BmmError, Result};

/// Template names.
pub const CREATE_SCRIPT: &str = "create.sh";
pub const DELETE_SCRIPT: &str = "delete.sh";
pub const PXEBOOT_CREATE: &str = "pxeboot_create";
pub const PXEBOOT_START: &str = "pxeboot_start";
pub const PXEBOOT_DELETE: &str = "pxeboot_delete";

const TEMPLATE_NAMES: [&str; 5] = [
    CREATE_SCRIPT,
    DELETE_SCRIPT,
    PXEBOOT_CREATE,
    PXEBOOT_START,
    PXEBOOT_DELETE,
];

/// Values substituted into templates.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateParams<'a> {
    pub instance_id: &'a str,
    pub cobbler: &'a str,
    pub status_file: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_size_mb: Option<u64>,
}

/// Renders and installs provisioning artifacts.
pub struct ProvisioningTemplateEngine {
    handlebars: Handlebars<'static>,
    cobbler: String,
    cobbler_path: PathBuf,
    pxe_boot_path: PathBuf,
    status_file: String,
}

impl ProvisioningTemplateEngine {
    /// Build the engine with the built-in templates, replaced by any
    /// `<name>.hbs` found in the configured template directory.
    ///
    /// # Errors
    /// Returns [`BmmError::Template`] if a template fails to parse.
    pub fn new(config: &BmmConfig) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        for name in TEMPLATE_NAMES {
            let override_path = config
                .template_dir
                .as_ref()
                .map(|dir| dir.join(format!("{name}.hbs")))
                .filter(|path| path.exists());

            let source = match override_path {
                Some(path) => {
                    debug!(template = name, path = %path.display(), "Loading template override");
                    std::fs::read_to_string(&path)?
                }
                None => builtin(name).to_string(),
            };

            handlebars
                .register_template_string(name, source)
                .map_err(|e| BmmError::Template(format!("{name}: {e}")))?;
        }

        Ok(Self {
            handlebars,
            cobbler: config.cobbler.clone(),
            cobbler_path: config.cobbler_path.clone(),
            pxe_boot_path: config.pxe_boot_path.clone(),
            status_file: config.bmm_status_path.clone(),
        })
    }

    /// Render a template to a string.
    ///
    /// # Errors
    /// Returns [`BmmError::Template`] on unknown templates or missing values.
    pub fn render(&self, template: &str, params: &TemplateParams<'_>) -> Result<String> {
        self.handlebars
            .render(template, params)
            .map_err(|e| BmmError::Template(format!("{template}: {e}")))
    }

    /// Directory holding a workload's scripts, image and marker file.
    #[must_use]
    pub fn instance_dir(&self, instance_name: &str) -> PathBuf {
        self.cobbler_path.join("images").join(instance_name)
    }

    /// PXE config path for a MAC address (`01-aa-bb-cc-dd-ee-ff`).
    #[must_use]
    pub fn pxe_config_path(&self, mac: &str) -> PathBuf {
        let name = format!("01-{}", mac.to_ascii_lowercase().replace(':', "-"));
        self.pxe_boot_path.join(name)
    }

    /// Write the install script and point PXE at the installer.
    ///
    /// # Errors
    /// Returns an error if rendering or writing fails.
    pub async fn write_create(&self, instance_name: &str, mac: &str, disk_size_mb: u64) -> Result<()> {
        let params = self.params(instance_name, Some(disk_size_mb));
        let dir = self.instance_dir(instance_name);
        self.render_to(CREATE_SCRIPT, &dir.join(CREATE_SCRIPT), &params).await?;
        self.render_to(PXEBOOT_CREATE, &self.pxe_config_path(mac), &params).await
    }

    /// Point PXE at local disk so the next boot starts the installed OS.
    ///
    /// # Errors
    /// Returns an error if rendering or writing fails.
    pub async fn write_start(&self, instance_name: &str, mac: &str) -> Result<()> {
        let params = self.params(instance_name, None);
        self.render_to(PXEBOOT_START, &self.pxe_config_path(mac), &params).await
    }

    /// Write the wipe script and point PXE at the installer.
    ///
    /// # Errors
    /// Returns an error if rendering or writing fails.
    pub async fn write_delete(&self, instance_name: &str, mac: &str) -> Result<()> {
        let params = self.params(instance_name, None);
        let dir = self.instance_dir(instance_name);
        self.render_to(DELETE_SCRIPT, &dir.join(DELETE_SCRIPT), &params).await?;
        self.render_to(PXEBOOT_DELETE, &self.pxe_config_path(mac), &params).await
    }

    /// Remove a workload's directory and the machine's PXE config.
    ///
    /// Missing files are not an error.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be removed.
    pub async fn remove(&self, instance_name: &str, mac: &str) -> Result<()> {
        let dir = self.instance_dir(instance_name);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        if let Err(e) = fs::remove_file(self.pxe_config_path(mac)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        debug!(instance = %instance_name, "Removed provisioning artifacts");
        Ok(())
    }

    fn params<'a>(&'a self, instance_name: &'a str, disk_size_mb: Option<u64>) -> TemplateParams<'a> {
        TemplateParams {
            instance_id: instance_name,
            cobbler: &self.cobbler,
            status_file: &self.status_file,
            disk_size_mb,
        }
    }

    async fn render_to(&self, template: &str, dest: &Path, params: &TemplateParams<'_>) -> Result<()> {
        let content = self.render(template, params)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(dest, content).await?;
        debug!(template, dest = %dest.display(), "Rendered template");
        Ok(())
    }
}

fn builtin(name: &str) -> &'static str {
    match name {
        CREATE_SCRIPT => CREATE_SCRIPT_TEMPLATE,
        DELETE_SCRIPT => DELETE_SCRIPT_TEMPLATE,
        PXEBOOT_CREATE => PXEBOOT_CREATE_TEMPLATE,
        PXEBOOT_START => PXEBOOT_START_TEMPLATE,
        _ => PXEBOOT_DELETE_TEMPLATE,
    }
}

const CREATE_SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
set -e

STATE_DIR=/mnt/cobbler/images/{{instance_id}}
mkdir -p /mnt/cobbler
mount -t nfs {{cobbler}}:/var/www/cobbler /mnt/cobbler

echo install > $STATE_DIR/{{status_file}}

parted -s /dev/sda mklabel msdos
parted -s /dev/sda mkpart primary 1MiB {{disk_size_mb}}MiB
wget -q -O - http://{{cobbler}}/cobbler/images/{{instance_id}}/disk | dd of=/dev/sda1 bs=4M

echo install_reboot > $STATE_DIR/{{status_file}}
sync
umount /mnt/cobbler
reboot
"#;

const DELETE_SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
set -e

STATE_DIR=/mnt/cobbler/images/{{instance_id}}
mkdir -p /mnt/cobbler
mount -t nfs {{cobbler}}:/var/www/cobbler /mnt/cobbler

dd if=/dev/zero of=/dev/sda bs=1M count=16
parted -s /dev/sda mklabel msdos

echo deleted > $STATE_DIR/{{status_file}}
sync
umount /mnt/cobbler
poweroff
"#;

const PXEBOOT_CREATE_TEMPLATE: &str = r"DEFAULT install
PROMPT 0
TIMEOUT 0

LABEL install
  KERNEL images/installer/vmlinuz
  APPEND initrd=images/installer/initrd.img script=http://{{cobbler}}/cobbler/images/{{instance_id}}/create.sh
";

const PXEBOOT_START_TEMPLATE: &str = r"DEFAULT local
PROMPT 0
TIMEOUT 0

LABEL local
  LOCALBOOT 0
";

const PXEBOOT_DELETE_TEMPLATE: &str = r"DEFAULT delete
PROMPT 0
TIMEOUT 0

LABEL delete
  KERNEL images/installer/vmlinuz
  APPEND initrd=images/installer/initrd.img script=http://{{cobbler}}/cobbler/images/{{instance_id}}/delete.sh
";
