//! Bare metal machine lifecycle orchestration.
//!
//! [`BmmOrchestrator`] composes the inventory, power control, templates,
//! install marker probe and fabric client into the compute-driver
//! operations. Each spawn or destroy is one long-running workflow that
//! suspends at every poll and external call; many may run concurrently.
//!
//! Once a machine is claimed, a failing spawn leaves it `processing` so an
//! operator must recover it. A machine is never silently returned to
//! `active` or `used` after a partial failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BmmConfig;
use crate::error::{BmmError, Result};
use crate::fabric::{FabricOutcome, FabricSyncClient, FlowControllerRpc, RegionBinding};
use crate::inventory::{InventoryStore, MachineInventory, Selection};
use crate::machine::{BareMetalMachine, MachineStatus, MachineUpdate, RESOURCE_POOL};
use crate::power::{PowerController, PowerState};
use crate::probe::{InstallState, MachineStateProbe};
use crate::state::{DeletePhase, InstallPhase};
use crate::template::ProvisioningTemplateEngine;
use crate::wait::{cancellable, Poller};
use crate::workload::{ImageStore, InstanceType, VmState, Workload, WorkloadStore, WorkloadUpdate};
use crate::zone::ZoneSpec;

/// Name of the image file inside a workload's directory.
const DISK_IMAGE_FILE: &str = "disk";

/// External systems the orchestrator drives.
pub struct Collaborators {
    pub inventory: Arc<dyn InventoryStore>,
    pub workloads: Arc<dyn WorkloadStore>,
    pub images: Arc<dyn ImageStore>,
    pub power: Arc<dyn PowerController>,
    pub probe: Arc<dyn MachineStateProbe>,
    /// Without a flow controller only the resource pool can be served.
    pub flow_controller: Option<Arc<dyn FlowControllerRpc>>,
}

/// Where an install leaves the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InstallTarget {
    Pool,
    Tenant { cluster: String, vlan_id: u16 },
}

impl InstallTarget {
    fn for_zone(zone: &ZoneSpec) -> Self {
        match zone.vlan_id {
            Some(vlan_id) if !zone.is_pool() => Self::Tenant {
                cluster: zone.cluster_name.clone(),
                vlan_id,
            },
            _ => Self::Pool,
        }
    }

    fn final_update(&self, instance_id: &str) -> MachineUpdate {
        let update = MachineUpdate::default().with_instance(Some(instance_id.to_string()));
        match self {
            Self::Pool => MachineUpdate {
                status: Some(MachineStatus::Active),
                ..update.with_zone(RESOURCE_POOL).with_vlan(None)
            },
            Self::Tenant { cluster, vlan_id } => MachineUpdate {
                status: Some(MachineStatus::Used),
                ..update.with_zone(cluster.clone()).with_vlan(Some(*vlan_id))
            },
        }
    }
}

/// Runtime state reported for a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstancePowerState {
    Running,
    Shutdown,
    NoState,
}

/// Per-workload information in the compute-driver shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub name: String,
    pub state: InstancePowerState,
    /// Memory in KiB.
    pub max_mem: u64,
    pub mem: u64,
    pub num_cpu: u32,
    pub cpu_time: u64,
}

/// Host capacity report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub hypervisor_type: String,
    pub vcpus: u64,
    pub vcpus_used: u64,
    pub memory_mb: u64,
    pub memory_mb_used: u64,
    pub local_gb: u64,
    pub local_gb_used: u64,
    pub machines: usize,
    pub machines_by_status: BTreeMap<String, usize>,
}

/// Outcome of a destroy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyReport {
    /// Reclaimed machine, `None` if the workload had none.
    pub machine_id: Option<String>,
    pub fabric: FabricOutcome,
}

/// Outcome of returning a machine to the pool.
#[derive(Debug, Clone)]
pub struct PoolReturn {
    pub machine: BareMetalMachine,
    pub fabric: FabricOutcome,
}

/// Drives machine selection, installs, deletes and fabric changes.
pub struct BmmOrchestrator {
    config: BmmConfig,
    inventory: MachineInventory,
    workloads: Arc<dyn WorkloadStore>,
    images: Arc<dyn ImageStore>,
    power: Arc<dyn PowerController>,
    probe: Arc<dyn MachineStateProbe>,
    templates: ProvisioningTemplateEngine,
    fabric: Option<FabricSyncClient>,
    poller: Poller,
}

impl BmmOrchestrator {
    /// Build an orchestrator around its collaborators.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a template fails
    /// to load.
    pub fn new(config: BmmConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let templates = ProvisioningTemplateEngine::new(&config)?;
        let inventory = MachineInventory::new(collaborators.inventory, collaborators.workloads.clone());
        let fabric = collaborators
            .flow_controller
            .map(|rpc| FabricSyncClient::new(rpc, inventory.clone()));
        let poller = Poller::new(config.poll_interval()).with_deadline(config.install_timeout());

        Ok(Self {
            config,
            inventory,
            workloads: collaborators.workloads,
            images: collaborators.images,
            power: collaborators.power,
            probe: collaborators.probe,
            templates,
            fabric,
            poller,
        })
    }

    /// Poll more often than whole seconds allow.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poller = Poller::new(interval).with_deadline(self.config.install_timeout());
        self
    }

    #[must_use]
    pub fn inventory(&self) -> &MachineInventory {
        &self.inventory
    }

    /// Check that the provisioning directories are in place.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be created.
    pub async fn init_host(&self) -> Result<()> {
        for dir in [&self.config.cobbler_path, &self.config.pxe_boot_path] {
            if !dir.exists() {
                warn!(path = %dir.display(), "Provisioning directory missing, creating it");
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        info!(machines = self.inventory.list().await?.len(), "Host initialized");
        Ok(())
    }

    // ------------------------------------------------------------------
    // spawn
    // ------------------------------------------------------------------

    /// Place a workload on a machine.
    ///
    /// # Errors
    /// - [`BmmError::InvalidZone`], [`BmmError::Image`] and
    ///   [`BmmError::MachineUnavailable`] before any side effect, as is
    ///   [`BmmError::Config`] for a tenant zone without a flow controller.
    /// - Any later error, cancellation included, leaves the claimed machine
    ///   `processing`.
    pub async fn spawn(&self, workload: &Workload, cancel: &CancellationToken) -> Result<BareMetalMachine> {
        let zone = ZoneSpec::parse(&workload.availability_zone)?;
        let target = InstallTarget::for_zone(&zone);
        if let InstallTarget::Tenant { cluster, .. } = &target {
            self.tenant_fabric(cluster)?;
        }
        let instance_type = self.workloads.get_instance_type(&workload.instance_type_id).await?;
        // an unknown image must fail before a machine is claimed
        let image = self.images.show(&workload.image_ref).await?;

        debug!(
            instance_id = %workload.id,
            image_ref = %image.image_ref,
            size_bytes = image.size_bytes,
            "Image resolved"
        );

        info!(
            instance_id = %workload.id,
            instance_type = %instance_type.name,
            zone = %workload.availability_zone,
            "Spawning workload"
        );

        if cancel.is_cancelled() {
            return Err(BmmError::Cancelled("machine selection".to_string()));
        }
        let selection = self
            .inventory
            .select(&instance_type.name, &workload.image_ref)
            .await?;
        let machine_id = selection.machine.id.clone();

        let result = self
            .provision(workload, &instance_type, &zone, target, selection, cancel)
            .await;

        match &result {
            Ok(machine) => info!(
                instance_id = %workload.id,
                machine_id = %machine.id,
                status = %machine.status,
                zone = %machine.availability_zone,
                "Workload spawned"
            ),
            Err(e) => error!(
                instance_id = %workload.id,
                machine_id = %machine_id,
                error = %e,
                fabric_consistency = e.is_fabric_consistency(),
                "Spawn failed; machine left in processing for operator recovery"
            ),
        }
        result
    }

    async fn provision(
        &self,
        workload: &Workload,
        instance_type: &InstanceType,
        zone: &ZoneSpec,
        target: InstallTarget,
        selection: Selection,
        cancel: &CancellationToken,
    ) -> Result<BareMetalMachine> {
        let machine = &selection.machine;

        self.workloads
            .update_workload(
                &workload.id,
                WorkloadUpdate {
                    display_name: Some(machine.name.clone()),
                    availability_zone: Some(zone.cleaned_zone.clone()),
                    ..WorkloadUpdate::default()
                },
            )
            .await?;

        if let InstallTarget::Tenant { cluster, vlan_id } = &target {
            let binding = FabricSyncClient::binding(machine, cluster, *vlan_id);
            let fabric = self.tenant_fabric(cluster)?;
            cancellable(cancel, "region join", fabric.join_region(&binding, zone.create_region)).await?;
        }

        if let Some(previous) = selection.previous_instance() {
            if previous != workload.id {
                self.destroy_stale_workload(previous, &machine.id).await?;
            }
        }

        if selection.reused && target != InstallTarget::Pool {
            info!(machine_id = %machine.id, "Reusing installed pool image, skipping reinstall");
            let machine = self
                .inventory
                .update(&machine.id, target.final_update(&workload.id))
                .await?;
            self.set_vm_state(&workload.id, VmState::Active).await?;
            return Ok(machine);
        }

        self.install(workload, machine, instance_type, &target, cancel)
            .await
    }

    /// Fabric client for placing a machine in `cluster`.
    fn tenant_fabric(&self, cluster: &str) -> Result<&FabricSyncClient> {
        self.fabric.as_ref().ok_or_else(|| {
            BmmError::Config(format!(
                "tenant zone '{cluster}' needs a flow controller; set ofc_service_url"
            ))
        })
    }

    async fn leave_region(&self, binding: Option<RegionBinding>, delete_region: bool) -> FabricOutcome {
        let Some(binding) = binding else {
            return FabricOutcome::Skipped;
        };
        match &self.fabric {
            Some(fabric) => fabric.leave_region_best_effort(&binding, delete_region).await,
            None => {
                warn!(region = %binding.region, "No flow controller configured, region left untouched");
                FabricOutcome::Drifted {
                    region: binding.region,
                    error: "no flow controller configured".to_string(),
                }
            }
        }
    }

    async fn destroy_stale_workload(&self, instance_id: &str, machine_id: &str) -> Result<()> {
        match self.workloads.destroy_workload(instance_id).await {
            Ok(()) => {
                info!(instance_id, machine_id, "Destroyed previous occupant record");
                Ok(())
            }
            Err(BmmError::InstanceNotFound(_)) => {
                debug!(instance_id, machine_id, "Previous occupant record already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // install workflow
    // ------------------------------------------------------------------

    async fn install(
        &self,
        workload: &Workload,
        machine: &BareMetalMachine,
        instance_type: &InstanceType,
        target: &InstallTarget,
        cancel: &CancellationToken,
    ) -> Result<BareMetalMachine> {
        let mut phase = InstallPhase::Boot;

        while phase != InstallPhase::Complete {
            info!(instance_id = %workload.id, machine_id = %machine.id, phase = ?phase, "Install phase");

            let step = async {
                match phase {
                    InstallPhase::Boot => self.boot_installer(workload, machine, instance_type).await,
                    InstallPhase::StartInstall => {
                        self.templates.write_start(&workload.name, &machine.pxe_mac).await
                    }
                    InstallPhase::PowerCycle => self.power_cycle(machine, cancel).await,
                    InstallPhase::WaitInstall
                    | InstallPhase::WaitInstallReboot
                    | InstallPhase::WaitInstalled => match phase.awaited_marker() {
                        Some(marker) => self.wait_for_install_marker(workload, marker, cancel).await,
                        None => Ok(()),
                    },
                    InstallPhase::Complete => Ok(()),
                }
            };
            cancellable(cancel, &format!("install phase {phase:?}"), step).await?;
            phase = phase.next();
        }

        let machine = self
            .inventory
            .update(&machine.id, target.final_update(&workload.id))
            .await?;
        self.set_vm_state(&workload.id, VmState::Active).await?;
        Ok(machine)
    }

    async fn boot_installer(
        &self,
        workload: &Workload,
        machine: &BareMetalMachine,
        instance_type: &InstanceType,
    ) -> Result<()> {
        // stale markers from an earlier attempt would satisfy the waits
        self.templates.remove(&workload.name, &machine.pxe_mac).await?;

        let image_path = self
            .templates
            .instance_dir(&workload.name)
            .join(DISK_IMAGE_FILE);
        self.images
            .fetch(&workload.image_ref, &image_path, &workload.project_id)
            .await?;

        self.templates
            .write_create(&workload.name, &machine.pxe_mac, self.disk_size_mb(instance_type))
            .await?;

        debug!(machine_id = %machine.id, ipmi_ip = %machine.ipmi_ip, "Reboot or power on");
        self.power.reboot_or_power_on(&machine.ipmi_ip).await
    }

    async fn power_cycle(&self, machine: &BareMetalMachine, cancel: &CancellationToken) -> Result<()> {
        let address = machine.ipmi_ip.as_str();
        self.power.soft_off(address).await?;
        self.wait_for_power(address, PowerState::Off, cancel).await?;
        self.power.on(address).await
    }

    fn disk_size_mb(&self, instance_type: &InstanceType) -> u64 {
        let gb = if instance_type.local_gb == 0 {
            self.config.default_disk_gb
        } else {
            instance_type.local_gb
        };
        gb * 1024
    }

    /// Poll the marker until it reaches `target`, aborting if the workload
    /// disappears.
    async fn wait_for_install_marker(
        &self,
        workload: &Workload,
        target: InstallState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let workloads = &self.workloads;
        let probe = &self.probe;
        let instance_id = workload.id.as_str();
        let name = workload.name.as_str();

        self.poller
            .until(cancel, &format!("install marker '{target}'"), || async move {
                match workloads.get_workload(instance_id).await? {
                    Some(record) if record.is_live() => {}
                    _ => return Err(BmmError::InstanceNotFound(instance_id.to_string())),
                }
                let state = probe.read(name).await?;
                debug!(instance_id, state = %state, target = %target, "Probed install marker");
                Ok(state.has_reached(target).then_some(()))
            })
            .await
    }

    async fn wait_for_delete_marker(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let probe = &self.probe;
        self.poller
            .until(cancel, "delete marker", || async move {
                let state = probe.read(name).await?;
                Ok((state == InstallState::Deleted).then_some(()))
            })
            .await
    }

    async fn wait_for_power(
        &self,
        address: &str,
        target: PowerState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let power = &self.power;
        self.poller
            .until(cancel, &format!("power {target}"), || async move {
                Ok((power.status(address).await? == target).then_some(()))
            })
            .await
    }

    // ------------------------------------------------------------------
    // destroy / pool return
    // ------------------------------------------------------------------

    /// Wipe the workload's machine and release it.
    ///
    /// Fabric cleanup is best-effort: failures are reported in the returned
    /// [`DestroyReport`] but never fail the destroy.
    ///
    /// # Errors
    /// Returns an error if the machine is held by another workflow or the
    /// wipe itself fails.
    pub async fn destroy(&self, workload: &Workload, cancel: &CancellationToken) -> Result<DestroyReport> {
        let Some(bound) = self.inventory.by_instance_id(&workload.id).await? else {
            warn!(instance_id = %workload.id, "No machine bound to workload, nothing to destroy");
            return Ok(DestroyReport {
                machine_id: None,
                fabric: FabricOutcome::Skipped,
            });
        };

        if cancel.is_cancelled() {
            return Err(BmmError::Cancelled("machine claim".to_string()));
        }
        let machine = self.inventory.claim(&bound.id).await?;
        info!(instance_id = %workload.id, machine_id = %machine.id, "Destroying workload");

        let mut phase = DeletePhase::Boot;
        while phase != DeletePhase::Complete {
            debug!(machine_id = %machine.id, phase = ?phase, "Delete phase");
            let step = async {
                match phase {
                    DeletePhase::Boot => {
                        self.templates.write_delete(&workload.name, &machine.pxe_mac).await?;
                        self.power.reboot_or_power_on(&machine.ipmi_ip).await
                    }
                    DeletePhase::WaitDeleted => self.wait_for_delete_marker(&workload.name, cancel).await,
                    DeletePhase::Cleanup => {
                        self.templates.remove(&workload.name, &machine.pxe_mac).await?;
                        if self.power.status(&machine.ipmi_ip).await? == PowerState::On {
                            self.power.off(&machine.ipmi_ip).await?;
                        }
                        Ok(())
                    }
                    DeletePhase::Complete => Ok(()),
                }
            };
            cancellable(cancel, &format!("delete phase {phase:?}"), step).await?;
            phase = phase.next();
        }

        let binding = FabricSyncClient::current_binding(&machine);
        let delete_region = self.is_last_in_zone(&machine).await?;

        self.inventory
            .update(
                &machine.id,
                MachineUpdate::status(MachineStatus::Inactive)
                    .with_instance(None)
                    .with_zone(RESOURCE_POOL)
                    .with_vlan(None),
            )
            .await?;

        let fabric = self.leave_region(binding, delete_region).await;

        info!(
            instance_id = %workload.id,
            machine_id = %machine.id,
            fabric = ?fabric,
            "Machine reclaimed"
        );
        Ok(DestroyReport {
            machine_id: Some(machine.id),
            fabric,
        })
    }

    /// Move a tenant machine back to the pool without reinstalling it.
    ///
    /// The workload stays bound, so the machine becomes a reuse candidate
    /// for workloads requesting the same image.
    ///
    /// # Errors
    /// Returns [`BmmError::InstanceNotFound`] if no machine is bound, or an
    /// error if another workflow holds the machine.
    pub async fn add_to_resource_pool(&self, workload: &Workload) -> Result<PoolReturn> {
        let bound = self
            .inventory
            .by_instance_id(&workload.id)
            .await?
            .ok_or_else(|| BmmError::InstanceNotFound(workload.id.clone()))?;

        if bound.in_pool() && bound.status == MachineStatus::Active {
            debug!(machine_id = %bound.id, "Machine already in pool");
            return Ok(PoolReturn {
                machine: bound,
                fabric: FabricOutcome::Skipped,
            });
        }

        let machine = self.inventory.claim(&bound.id).await?;
        let binding = FabricSyncClient::current_binding(&machine);
        let delete_region = self.is_last_in_zone(&machine).await?;

        let fabric = self.leave_region(binding, delete_region).await;

        let machine = self
            .inventory
            .update(
                &machine.id,
                MachineUpdate::status(MachineStatus::Active)
                    .with_zone(RESOURCE_POOL)
                    .with_vlan(None),
            )
            .await?;
        self.workloads
            .update_workload(
                &workload.id,
                WorkloadUpdate {
                    availability_zone: Some(RESOURCE_POOL.to_string()),
                    ..WorkloadUpdate::default()
                },
            )
            .await?;

        info!(instance_id = %workload.id, machine_id = %machine.id, "Machine returned to pool");
        Ok(PoolReturn { machine, fabric })
    }

    async fn is_last_in_zone(&self, machine: &BareMetalMachine) -> Result<bool> {
        if machine.in_pool() {
            return Ok(false);
        }
        Ok(self.inventory.by_zone(&machine.availability_zone).await?.len() == 1)
    }

    // ------------------------------------------------------------------
    // power operations
    // ------------------------------------------------------------------

    /// Power on the workload's machine.
    ///
    /// # Errors
    /// Returns [`BmmError::InstanceNotFound`] if no machine is bound.
    pub async fn start(&self, workload: &Workload) -> Result<()> {
        let machine = self.bound_machine(workload).await?;
        self.power.on(&machine.ipmi_ip).await?;
        self.set_vm_state(&workload.id, VmState::Active).await?;
        info!(instance_id = %workload.id, machine_id = %machine.id, "Workload started");
        Ok(())
    }

    /// Soft power off the workload's machine.
    ///
    /// # Errors
    /// Returns [`BmmError::InstanceNotFound`] if no machine is bound.
    pub async fn stop(&self, workload: &Workload) -> Result<()> {
        let machine = self.bound_machine(workload).await?;
        self.power.soft_off(&machine.ipmi_ip).await?;
        self.set_vm_state(&workload.id, VmState::Stopped).await?;
        info!(instance_id = %workload.id, machine_id = %machine.id, "Workload stopped");
        Ok(())
    }

    /// Reboot is not offered for bare metal workloads.
    ///
    /// # Errors
    /// Never fails.
    pub async fn reboot(&self, workload: &Workload) -> Result<()> {
        debug!(instance_id = %workload.id, "Reboot requested; no-op for bare metal");
        Ok(())
    }

    async fn bound_machine(&self, workload: &Workload) -> Result<BareMetalMachine> {
        self.inventory
            .by_instance_id(&workload.id)
            .await?
            .ok_or_else(|| BmmError::InstanceNotFound(workload.id.clone()))
    }

    async fn set_vm_state(&self, instance_id: &str, state: VmState) -> Result<()> {
        self.workloads
            .update_workload(
                instance_id,
                WorkloadUpdate {
                    vm_state: Some(state),
                    ..WorkloadUpdate::default()
                },
            )
            .await
            .map(drop)
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    /// Runtime information for a workload.
    ///
    /// # Errors
    /// Returns [`BmmError::InstanceNotFound`] if no machine is bound.
    pub async fn get_info(&self, workload: &Workload) -> Result<InstanceInfo> {
        let machine = self.bound_machine(workload).await?;
        Ok(self.instance_info(&workload.name, &machine).await)
    }

    async fn instance_info(&self, name: &str, machine: &BareMetalMachine) -> InstanceInfo {
        let state = match self.power.status(&machine.ipmi_ip).await {
            Ok(PowerState::On) => InstancePowerState::Running,
            Ok(PowerState::Off) => InstancePowerState::Shutdown,
            Err(e) => {
                warn!(machine_id = %machine.id, error = %e, "Power status unavailable");
                InstancePowerState::NoState
            }
        };
        InstanceInfo {
            name: name.to_string(),
            state,
            max_mem: machine.memory_mb * 1024,
            mem: machine.memory_mb * 1024,
            num_cpu: machine.vcpus,
            cpu_time: 0,
        }
    }

    /// Live workloads bound to machines, with their machines.
    async fn bound_workloads(&self) -> Result<Vec<(Workload, BareMetalMachine)>> {
        let mut bound = Vec::new();
        for machine in self.inventory.list().await? {
            let Some(instance_id) = machine.instance_id.as_deref() else {
                continue;
            };
            match self.workloads.get_workload(instance_id).await? {
                Some(workload) if workload.is_live() => bound.push((workload, machine)),
                _ => debug!(machine_id = %machine.id, instance_id, "Skipping stale binding"),
            }
        }
        Ok(bound)
    }

    /// Names of the workloads running on machines.
    ///
    /// # Errors
    /// Returns an error if the inventory or workload store fails.
    pub async fn list_instances(&self) -> Result<Vec<String>> {
        Ok(self
            .bound_workloads()
            .await?
            .into_iter()
            .map(|(workload, _)| workload.name)
            .collect())
    }

    /// [`InstanceInfo`] for every workload running on a machine.
    ///
    /// # Errors
    /// Returns an error if the inventory or workload store fails.
    pub async fn list_instances_detail(&self) -> Result<Vec<InstanceInfo>> {
        let bound = self.bound_workloads().await?;
        Ok(join_all(
            bound
                .iter()
                .map(|(workload, machine)| self.instance_info(&workload.name, machine)),
        )
        .await)
    }

    /// Capacity and usage across all machines.
    ///
    /// # Errors
    /// Returns an error if the inventory fails.
    pub async fn get_host_stats(&self) -> Result<HostStats> {
        let machines = self.inventory.list().await?;
        let mut stats = HostStats {
            hypervisor_type: "baremetal".to_string(),
            vcpus: 0,
            vcpus_used: 0,
            memory_mb: 0,
            memory_mb_used: 0,
            local_gb: 0,
            local_gb_used: 0,
            machines: machines.len(),
            machines_by_status: BTreeMap::new(),
        };

        for machine in &machines {
            stats.vcpus += u64::from(machine.vcpus);
            stats.memory_mb += machine.memory_mb;
            stats.local_gb += machine.local_gb;
            if matches!(machine.status, MachineStatus::Used | MachineStatus::Processing) {
                stats.vcpus_used += u64::from(machine.vcpus);
                stats.memory_mb_used += machine.memory_mb;
                stats.local_gb_used += machine.local_gb;
            }
            *stats
                .machines_by_status
                .entry(machine.status.to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }
}
