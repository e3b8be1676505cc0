//! Bare metal machine inventory.
//!
//! All reads and writes go through an [`InventoryTxn`]. A transaction that
//! is dropped without [`InventoryTxn::commit`] rolls back. Machine
//! selection scans and marks `processing` inside one transaction, so two
//! concurrent spawns can never claim the same machine.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::{BmmError, Result};
use crate::filelock::{read_yaml, write_yaml, FileLock};
use crate::machine::{BareMetalMachine, MachineStatus, MachineUpdate, Switch, RESOURCE_POOL};
use crate::workload::WorkloadStore;

/// Transactional access to the machine registry.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Start a serializable transaction.
    async fn begin(&self) -> Result<Box<dyn InventoryTxn>>;
}

/// An open inventory transaction.
#[async_trait]
pub trait InventoryTxn: Send {
    async fn get_machine(&mut self, id: &str) -> Result<Option<BareMetalMachine>>;

    async fn list_machines(&mut self) -> Result<Vec<BareMetalMachine>>;

    async fn get_machines_by_type(&mut self, instance_type: &str) -> Result<Vec<BareMetalMachine>>;

    async fn get_machines_by_type_and_zone(
        &mut self,
        instance_type: &str,
        zone: &str,
    ) -> Result<Vec<BareMetalMachine>>;

    async fn get_machines_by_zone(&mut self, zone: &str) -> Result<Vec<BareMetalMachine>>;

    async fn get_machine_by_instance_id(
        &mut self,
        instance_id: &str,
    ) -> Result<Option<BareMetalMachine>>;

    async fn update_machine(&mut self, id: &str, update: &MachineUpdate) -> Result<BareMetalMachine>;

    async fn insert_machine(&mut self, machine: BareMetalMachine) -> Result<()>;

    async fn get_switches(&mut self) -> Result<Vec<Switch>>;

    /// Make the transaction's writes visible.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Serialized inventory contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryData {
    #[serde(default)]
    pub machines: Vec<BareMetalMachine>,
    #[serde(default)]
    pub switches: Vec<Switch>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Inventory held in memory and optionally backed by a YAML file.
///
/// Transactions hold the store lock from `begin` until commit or drop. A
/// file-backed store also holds the file lock for that span and re-reads
/// the file first, so transactions stay serializable across processes
/// sharing the file.
#[derive(Clone)]
pub struct YamlInventoryStore {
    path: Option<PathBuf>,
    data: Arc<Mutex<InventoryData>>,
}

impl YamlInventoryStore {
    /// Store without persistence.
    #[must_use]
    pub fn in_memory(data: InventoryData) -> Self {
        Self {
            path: None,
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Load the inventory file; a missing file yields an empty inventory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = read_yaml(&path, BmmError::Inventory).await?;

        Ok(Self {
            path: Some(path),
            data: Arc::new(Mutex::new(data)),
        })
    }

    /// Copy of the contents as of the last transaction in this process.
    #[cfg(test)]
    async fn snapshot(&self) -> InventoryData {
        self.data.lock().await.clone()
    }
}

#[async_trait]
impl InventoryStore for YamlInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTxn>> {
        let mut guard = self.data.clone().lock_owned().await;
        let file_lock = match &self.path {
            Some(path) => {
                let lock = FileLock::exclusive(path).await?;
                *guard = read_yaml(path, BmmError::Inventory).await?;
                Some(lock)
            }
            None => None,
        };

        let working = guard.clone();
        Ok(Box::new(YamlTxn {
            guard,
            working,
            path: self.path.clone(),
            file_lock,
        }))
    }
}

struct YamlTxn {
    guard: OwnedMutexGuard<InventoryData>,
    working: InventoryData,
    path: Option<PathBuf>,
    file_lock: Option<FileLock>,
}

impl YamlTxn {
    fn filtered(&self, pred: impl Fn(&BareMetalMachine) -> bool) -> Vec<BareMetalMachine> {
        self.working
            .machines
            .iter()
            .filter(|m| pred(*m))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl InventoryTxn for YamlTxn {
    async fn get_machine(&mut self, id: &str) -> Result<Option<BareMetalMachine>> {
        Ok(self.working.machines.iter().find(|m| m.id == id).cloned())
    }

    async fn list_machines(&mut self) -> Result<Vec<BareMetalMachine>> {
        Ok(self.working.machines.clone())
    }

    async fn get_machines_by_type(&mut self, instance_type: &str) -> Result<Vec<BareMetalMachine>> {
        Ok(self.filtered(|m| m.instance_type == instance_type))
    }

    async fn get_machines_by_type_and_zone(
        &mut self,
        instance_type: &str,
        zone: &str,
    ) -> Result<Vec<BareMetalMachine>> {
        Ok(self.filtered(|m| m.instance_type == instance_type && m.availability_zone == zone))
    }

    async fn get_machines_by_zone(&mut self, zone: &str) -> Result<Vec<BareMetalMachine>> {
        Ok(self.filtered(|m| m.availability_zone == zone))
    }

    async fn get_machine_by_instance_id(
        &mut self,
        instance_id: &str,
    ) -> Result<Option<BareMetalMachine>> {
        Ok(self
            .working
            .machines
            .iter()
            .find(|m| m.instance_id.as_deref() == Some(instance_id))
            .cloned())
    }

    async fn update_machine(&mut self, id: &str, update: &MachineUpdate) -> Result<BareMetalMachine> {
        if let Some(Some(instance_id)) = &update.instance_id {
            if let Some(holder) = self
                .working
                .machines
                .iter()
                .find(|m| m.id != id && m.instance_id.as_deref() == Some(instance_id.as_str()))
            {
                return Err(BmmError::Inventory(format!(
                    "instance {instance_id} is already bound to machine {}",
                    holder.id
                )));
            }
        }

        let machine = self
            .working
            .machines
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| BmmError::MachineNotFound(id.to_string()))?;
        update.apply(machine);
        Ok(machine.clone())
    }

    async fn insert_machine(&mut self, machine: BareMetalMachine) -> Result<()> {
        if self.working.machines.iter().any(|m| m.id == machine.id) {
            return Err(BmmError::Inventory(format!(
                "machine {} already exists",
                machine.id
            )));
        }
        self.working.machines.push(machine);
        Ok(())
    }

    async fn get_switches(&mut self) -> Result<Vec<Switch>> {
        Ok(self.working.switches.clone())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            mut guard,
            mut working,
            path,
            file_lock,
        } = *self;
        working.updated_at = Some(Utc::now());

        if let Some(path) = path {
            write_yaml(&path, &working, BmmError::Inventory).await?;
        }

        *guard = working;
        drop(file_lock);
        Ok(())
    }
}

/// A machine claimed for a workload.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The machine, already marked `processing`.
    pub machine: BareMetalMachine,
    /// Status before the claim.
    pub previous_status: MachineStatus,
    /// The machine carries the requested image from its pool occupant.
    pub reused: bool,
}

impl Selection {
    /// Workload that occupied the machine before the claim.
    #[must_use]
    pub fn previous_instance(&self) -> Option<&str> {
        self.machine.instance_id.as_deref()
    }
}

/// Queries and transactional updates over the machine registry.
#[derive(Clone)]
pub struct MachineInventory {
    store: Arc<dyn InventoryStore>,
    workloads: Arc<dyn WorkloadStore>,
}

impl MachineInventory {
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, workloads: Arc<dyn WorkloadStore>) -> Self {
        Self { store, workloads }
    }

    /// Claim one machine of `instance_type` and mark it `processing`.
    ///
    /// A pool machine whose occupant runs `image_ref` wins over a fresh
    /// machine. The scan and the mark share one transaction; any error
    /// rolls both back.
    ///
    /// # Errors
    /// Returns [`BmmError::MachineUnavailable`] when nothing is eligible.
    pub async fn select(&self, instance_type: &str, image_ref: &str) -> Result<Selection> {
        let mut txn = self.store.begin().await?;

        let (candidate, reused) = match self.find_reusable(txn.as_mut(), instance_type, image_ref).await? {
            Some(machine) => (machine, true),
            None => {
                let fresh = txn
                    .get_machines_by_type(instance_type)
                    .await?
                    .into_iter()
                    .find(|m| m.status.is_claimable())
                    .ok_or_else(|| BmmError::MachineUnavailable(instance_type.to_string()))?;
                (fresh, false)
            }
        };

        let previous_status = candidate.status;
        let machine = txn
            .update_machine(&candidate.id, &MachineUpdate::status(MachineStatus::Processing))
            .await?;
        txn.commit().await?;

        info!(
            machine_id = %machine.id,
            instance_type,
            reused,
            previous_status = %previous_status,
            "Claimed bare metal machine"
        );

        Ok(Selection {
            machine,
            previous_status,
            reused,
        })
    }

    /// Pool machine already running `image_ref` for a live occupant.
    async fn find_reusable(
        &self,
        txn: &mut dyn InventoryTxn,
        instance_type: &str,
        image_ref: &str,
    ) -> Result<Option<BareMetalMachine>> {
        let pool = txn
            .get_machines_by_type_and_zone(instance_type, RESOURCE_POOL)
            .await?;

        for machine in pool.into_iter().filter(|m| m.status == MachineStatus::Active) {
            let Some(occupant) = machine.instance_id.as_deref() else {
                continue;
            };
            match self.workloads.get_workload(occupant).await? {
                Some(workload) if workload.is_live() && workload.image_ref == image_ref => {
                    return Ok(Some(machine));
                }
                Some(_) => {}
                None => {
                    debug!(machine_id = %machine.id, occupant, "Pool occupant record missing");
                }
            }
        }
        Ok(None)
    }

    /// Atomically mark a specific machine `processing`.
    ///
    /// # Errors
    /// Returns [`BmmError::MachineUnavailable`] if another workflow holds it.
    pub async fn claim(&self, id: &str) -> Result<BareMetalMachine> {
        let mut txn = self.store.begin().await?;
        let machine = txn
            .get_machine(id)
            .await?
            .ok_or_else(|| BmmError::MachineNotFound(id.to_string()))?;
        if machine.status == MachineStatus::Processing {
            warn!(machine_id = %id, "Machine already held by another workflow");
            return Err(BmmError::MachineUnavailable(machine.instance_type));
        }
        let claimed = txn
            .update_machine(id, &MachineUpdate::status(MachineStatus::Processing))
            .await?;
        txn.commit().await?;
        Ok(claimed)
    }

    /// Apply an update in its own transaction.
    ///
    /// # Errors
    /// Returns an error if the machine does not exist or the commit fails.
    pub async fn update(&self, id: &str, update: MachineUpdate) -> Result<BareMetalMachine> {
        let mut txn = self.store.begin().await?;
        let machine = txn.update_machine(id, &update).await?;
        txn.commit().await?;
        debug!(machine_id = %id, status = %machine.status, "Machine updated");
        Ok(machine)
    }

    /// Add a newly registered machine.
    ///
    /// # Errors
    /// Returns an error if the id is taken.
    pub async fn register(&self, machine: BareMetalMachine) -> Result<()> {
        let id = machine.id.clone();
        let mut txn = self.store.begin().await?;
        txn.insert_machine(machine).await?;
        txn.commit().await?;
        info!(machine_id = %id, "Machine registered");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<BareMetalMachine>> {
        self.store.begin().await?.get_machine(id).await
    }

    pub async fn list(&self) -> Result<Vec<BareMetalMachine>> {
        self.store.begin().await?.list_machines().await
    }

    pub async fn by_instance_id(&self, instance_id: &str) -> Result<Option<BareMetalMachine>> {
        self.store
            .begin()
            .await?
            .get_machine_by_instance_id(instance_id)
            .await
    }

    pub async fn by_zone(&self, zone: &str) -> Result<Vec<BareMetalMachine>> {
        self.store.begin().await?.get_machines_by_zone(zone).await
    }

    pub async fn switches(&self) -> Result<Vec<Switch>> {
        self.store.begin().await?.get_switches().await
    }
}
