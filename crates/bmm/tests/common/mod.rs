//! Shared fakes and fixtures for orchestrator integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bmm::inventory::InventoryData;
use bmm::workload::{InstanceType, VmState, WorkloadRegistry};
use bmm::{
    BareMetalMachine, BmmConfig, BmmOrchestrator, Collaborators, DirImageStore,
    FlowControllerRpc, InMemoryFlowController, InstallState, MachineStateProbe, MachineStatus, PowerController,
    PowerState, Result, Switch, Workload, WorkloadStore, YamlInventoryStore, YamlWorkloadStore,
    RESOURCE_POOL,
};
use tempfile::TempDir;

pub const IMAGE: &str = "ubuntu-22.04";
pub const OTHER_IMAGE: &str = "rocky-9";
pub const INSTANCE_TYPE_ID: &str = "1";
pub const INSTANCE_TYPE: &str = "bm.small";

// =============================================================================
// Fake power controller
// =============================================================================

#[derive(Default)]
struct PowerLog {
    states: HashMap<String, PowerState>,
    calls: Vec<String>,
}

/// Power controller that flips an in-memory state and records every action.
pub struct FakePower {
    initial: PowerState,
    log: Mutex<PowerLog>,
}

impl FakePower {
    pub fn new(initial: PowerState) -> Self {
        Self {
            initial,
            log: Mutex::new(PowerLog::default()),
        }
    }

    /// Actions in call order, status queries excluded.
    pub fn actions(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.actions().iter().filter(|a| *a == action).count()
    }

    fn act(&self, address: &str, action: &str, state: Option<PowerState>) {
        let mut log = self.log.lock().unwrap();
        log.calls.push(action.to_string());
        if let Some(state) = state {
            log.states.insert(address.to_string(), state);
        }
    }
}

#[async_trait]
impl PowerController for FakePower {
    async fn on(&self, address: &str) -> Result<()> {
        self.act(address, "on", Some(PowerState::On));
        Ok(())
    }

    async fn off(&self, address: &str) -> Result<()> {
        self.act(address, "off", Some(PowerState::Off));
        Ok(())
    }

    async fn soft_off(&self, address: &str) -> Result<()> {
        self.act(address, "soft_off", Some(PowerState::Off));
        Ok(())
    }

    async fn reset(&self, address: &str) -> Result<()> {
        self.act(address, "reset", None);
        Ok(())
    }

    async fn status(&self, address: &str) -> Result<PowerState> {
        let log = self.log.lock().unwrap();
        Ok(log.states.get(address).copied().unwrap_or(self.initial))
    }
}

// =============================================================================
// Scripted install marker probe
// =============================================================================

/// Probe that replays a marker sequence per workload.
///
/// Each read pops the next marker; the last one sticks.
#[derive(Default)]
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<String, VecDeque<InstallState>>>,
    reads: Mutex<usize>,
}

impl ScriptedProbe {
    pub fn script(&self, instance_name: &str, states: &[InstallState]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(instance_name.to_string(), states.iter().copied().collect());
    }

    /// Markers the installer writes over a full install.
    pub fn script_install(&self, instance_name: &str) {
        self.script(
            instance_name,
            &[
                InstallState::Unknown,
                InstallState::Install,
                InstallState::InstallReboot,
                InstallState::Installed,
            ],
        );
    }

    pub fn reads(&self) -> usize {
        *self.reads.lock().unwrap()
    }
}

#[async_trait]
impl MachineStateProbe for ScriptedProbe {
    async fn read(&self, instance_name: &str) -> Result<InstallState> {
        *self.reads.lock().unwrap() += 1;
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(instance_name) else {
            return Ok(InstallState::Unknown);
        };
        let state = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };
        Ok(state.unwrap_or(InstallState::Unknown))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn machine(index: u8, status: MachineStatus) -> BareMetalMachine {
    BareMetalMachine {
        id: format!("m{index}"),
        name: format!("bm-{index:02}"),
        instance_id: None,
        instance_type: INSTANCE_TYPE.to_string(),
        vcpus: 32,
        memory_mb: 131_072,
        local_gb: 960,
        availability_zone: RESOURCE_POOL.to_string(),
        ipmi_ip: format!("10.0.0.{index}"),
        pxe_ip: format!("10.1.0.{index}"),
        pxe_mac: format!("aa:bb:cc:dd:ee:{index:02x}"),
        storage_ip: None,
        storage_mac: None,
        service_mac1: None,
        service_mac2: None,
        server_port1: u32::from(index) * 2,
        server_port2: u32::from(index) * 2 + 1,
        dpid1: "0x0001".to_string(),
        dpid2: "0x0002".to_string(),
        vlan_id: None,
        status,
        updated_at: None,
    }
}

pub fn workload(id: &str, image_ref: &str, zone: &str) -> Workload {
    Workload {
        id: id.to_string(),
        name: format!("instance-{id}"),
        display_name: None,
        image_ref: image_ref.to_string(),
        instance_type_id: INSTANCE_TYPE_ID.to_string(),
        availability_zone: zone.to_string(),
        user_id: "user".to_string(),
        project_id: "project".to_string(),
        vm_state: VmState::Building,
        deleted: false,
        updated_at: None,
    }
}

fn instance_type() -> InstanceType {
    InstanceType {
        id: INSTANCE_TYPE_ID.to_string(),
        name: INSTANCE_TYPE.to_string(),
        vcpus: 32,
        memory_mb: 131_072,
        local_gb: 0,
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub config: BmmConfig,
    pub inventory: YamlInventoryStore,
    pub workloads: Arc<YamlWorkloadStore>,
    pub rpc: Arc<InMemoryFlowController>,
    pub power: Arc<FakePower>,
    pub probe: Arc<ScriptedProbe>,
    pub orchestrator: BmmOrchestrator,
}

impl Harness {
    pub fn new(machines: Vec<BareMetalMachine>, workloads: Vec<Workload>) -> Self {
        Self::with_fabric(machines, workloads, InMemoryFlowController::new())
    }

    pub fn with_fabric(
        machines: Vec<BareMetalMachine>,
        workloads: Vec<Workload>,
        rpc: InMemoryFlowController,
    ) -> Self {
        Self::build(machines, workloads, rpc, true)
    }

    /// Orchestrator with no flow controller, as when none is configured.
    pub fn without_fabric(machines: Vec<BareMetalMachine>, workloads: Vec<Workload>) -> Self {
        Self::build(machines, workloads, InMemoryFlowController::new(), false)
    }

    fn build(
        machines: Vec<BareMetalMachine>,
        workloads: Vec<Workload>,
        rpc: InMemoryFlowController,
        fabric: bool,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let image_dir = dir.path().join("images");
        std::fs::create_dir_all(&image_dir).unwrap();
        std::fs::write(image_dir.join(IMAGE), b"image").unwrap();
        std::fs::write(image_dir.join(OTHER_IMAGE), b"image").unwrap();

        let config = BmmConfig {
            cobbler_path: dir.path().join("cobbler"),
            pxe_boot_path: dir.path().join("pxelinux.cfg"),
            image_dir: image_dir.clone(),
            ..BmmConfig::default()
        };

        let inventory = YamlInventoryStore::in_memory(InventoryData {
            machines,
            switches: vec![Switch {
                dpid: "0x0100".to_string(),
                name: Some("spine".to_string()),
                outer_ports: vec![47, 48],
            }],
            updated_at: None,
        });
        let workloads = Arc::new(YamlWorkloadStore::in_memory(WorkloadRegistry {
            workloads,
            instance_types: vec![instance_type()],
        }));
        let rpc = Arc::new(rpc);
        let power = Arc::new(FakePower::new(PowerState::On));
        let probe = Arc::new(ScriptedProbe::default());
        let flow_controller: Option<Arc<dyn FlowControllerRpc>> = if fabric {
            Some(rpc.clone())
        } else {
            None
        };

        let orchestrator = BmmOrchestrator::new(
            config.clone(),
            Collaborators {
                inventory: Arc::new(inventory.clone()),
                workloads: workloads.clone(),
                images: Arc::new(DirImageStore::new(image_dir)),
                power: power.clone(),
                probe: probe.clone(),
                flow_controller,
            },
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(5));

        Self {
            dir,
            config,
            inventory,
            workloads,
            rpc,
            power,
            probe,
            orchestrator,
        }
    }

    pub async fn machine(&self, id: &str) -> BareMetalMachine {
        self.orchestrator.inventory().get(id).await.unwrap().unwrap()
    }

    pub async fn workload(&self, id: &str) -> Workload {
        self.workloads.get_workload(id).await.unwrap().unwrap()
    }
}
