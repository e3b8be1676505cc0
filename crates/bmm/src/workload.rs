//! Workload (instance) records and images.
//!
//! Workloads are owned by the host orchestration system. The orchestrator
//! reads them, patches display name, zone and runtime state, and deletes
//! stale pool-occupant records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{BmmError, Result};
use crate::filelock::{read_yaml, write_yaml, FileLock};

/// Runtime state of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Building,
    Active,
    Stopped,
    Deleted,
}

/// A workload bound (or about to be bound) to a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    /// Unique name used for on-disk artifacts.
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub image_ref: String,
    pub instance_type_id: String,
    pub availability_zone: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub project_id: String,
    pub vm_state: VmState,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Workload {
    /// Whether the record still represents a live workload.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.deleted && self.vm_state != VmState::Deleted
    }
}

/// Hardware profile requested by a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceType {
    pub id: String,
    /// Tag matched against `BareMetalMachine::instance_type`.
    pub name: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub local_gb: u64,
}

/// Partial update of a workload record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadUpdate {
    pub display_name: Option<String>,
    pub availability_zone: Option<String>,
    pub vm_state: Option<VmState>,
}

impl WorkloadUpdate {
    pub fn apply(&self, workload: &mut Workload) {
        if let Some(name) = &self.display_name {
            workload.display_name = Some(name.clone());
        }
        if let Some(zone) = &self.availability_zone {
            workload.availability_zone.clone_from(zone);
        }
        if let Some(state) = self.vm_state {
            workload.vm_state = state;
        }
        workload.updated_at = Some(Utc::now());
    }
}

/// Access to the host system's workload records.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// Fetch a workload, including soft-deleted records.
    async fn get_workload(&self, id: &str) -> Result<Option<Workload>>;

    async fn update_workload(&self, id: &str, update: WorkloadUpdate) -> Result<Workload>;

    /// Soft-delete a workload record.
    async fn destroy_workload(&self, id: &str) -> Result<()>;

    async fn get_instance_type(&self, id: &str) -> Result<InstanceType>;
}

/// Image metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub image_ref: String,
    pub size_bytes: u64,
}

/// Image service.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Copy an image to `dest` on behalf of `owner`.
    async fn fetch(&self, image_ref: &str, dest: &Path, owner: &str) -> Result<ImageMeta>;

    async fn show(&self, image_ref: &str) -> Result<ImageMeta>;
}

/// Serialized registry of workloads and instance types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadRegistry {
    #[serde(default)]
    pub workloads: Vec<Workload>,
    #[serde(default)]
    pub instance_types: Vec<InstanceType>,
}

/// Workload store kept in memory or backed by a YAML file.
///
/// A file-backed store re-reads the file on every access, so a deletion
/// made by another process is seen by the next liveness check. Writes hold
/// the file lock across read, modify and replace. Instance types are loaded
/// once at open.
pub struct YamlWorkloadStore {
    path: Option<PathBuf>,
    workloads: RwLock<HashMap<String, Workload>>,
    instance_types: HashMap<String, InstanceType>,
}

impl YamlWorkloadStore {
    /// Store without persistence.
    #[must_use]
    pub fn in_memory(registry: WorkloadRegistry) -> Self {
        Self {
            path: None,
            workloads: RwLock::new(
                registry
                    .workloads
                    .into_iter()
                    .map(|w| (w.id.clone(), w))
                    .collect(),
            ),
            instance_types: registry
                .instance_types
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
        }
    }

    /// Open the registry file; a missing file yields an empty registry.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let registry: WorkloadRegistry = read_yaml(&path, BmmError::Config).await?;

        let mut store = Self::in_memory(WorkloadRegistry {
            workloads: Vec::new(),
            instance_types: registry.instance_types,
        });
        store.path = Some(path);
        Ok(store)
    }

    /// Apply `change` to one workload and persist it.
    async fn modify(&self, id: &str, change: impl FnOnce(&mut Workload) + Send) -> Result<Workload> {
        let Some(path) = &self.path else {
            let mut workloads = self.workloads.write().await;
            let workload = workloads
                .get_mut(id)
                .ok_or_else(|| BmmError::InstanceNotFound(id.to_string()))?;
            change(workload);
            return Ok(workload.clone());
        };

        let _lock = FileLock::exclusive(path).await?;
        let mut registry: WorkloadRegistry = read_yaml(path, BmmError::Config).await?;
        let workload = registry
            .workloads
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| BmmError::InstanceNotFound(id.to_string()))?;
        change(workload);
        let updated = workload.clone();

        registry.workloads.sort_by(|a, b| a.id.cmp(&b.id));
        write_yaml(path, &registry, BmmError::Config).await?;
        Ok(updated)
    }
}

#[async_trait]
impl WorkloadStore for YamlWorkloadStore {
    async fn get_workload(&self, id: &str) -> Result<Option<Workload>> {
        match &self.path {
            Some(path) => {
                let registry: WorkloadRegistry = read_yaml(path, BmmError::Config).await?;
                Ok(registry.workloads.into_iter().find(|w| w.id == id))
            }
            None => Ok(self.workloads.read().await.get(id).cloned()),
        }
    }

    async fn update_workload(&self, id: &str, update: WorkloadUpdate) -> Result<Workload> {
        let updated = self.modify(id, |w| update.apply(w)).await?;
        debug!(instance_id = %id, "Workload updated");
        Ok(updated)
    }

    async fn destroy_workload(&self, id: &str) -> Result<()> {
        self.modify(id, |w| {
            w.deleted = true;
            w.vm_state = VmState::Deleted;
            w.updated_at = Some(Utc::now());
        })
        .await?;
        info!(instance_id = %id, "Workload record destroyed");
        Ok(())
    }

    async fn get_instance_type(&self, id: &str) -> Result<InstanceType> {
        self.instance_types
            .get(id)
            .cloned()
            .ok_or_else(|| BmmError::Config(format!("Unknown instance type: {id}")))
    }
}

/// Image store serving files from a local directory keyed by image ref.
#[derive(Debug, Clone)]
pub struct DirImageStore {
    root: PathBuf,
}

impl DirImageStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn image_path(&self, image_ref: &str) -> Result<PathBuf> {
        if image_ref.is_empty() || image_ref.contains(['/', '\\']) || image_ref == ".." {
            return Err(BmmError::Image(format!("Invalid image ref: {image_ref}")));
        }
        Ok(self.root.join(image_ref))
    }
}

#[async_trait]
impl ImageStore for DirImageStore {
    async fn fetch(&self, image_ref: &str, dest: &Path, owner: &str) -> Result<ImageMeta> {
        let source = self.image_path(image_ref)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let size_bytes = fs::copy(&source, dest)
            .await
            .map_err(|e| BmmError::Image(format!("Failed to fetch image {image_ref}: {e}")))?;
        info!(image_ref, owner, dest = %dest.display(), size_bytes, "Image fetched");
        Ok(ImageMeta {
            image_ref: image_ref.to_string(),
            size_bytes,
        })
    }

    async fn show(&self, image_ref: &str) -> Result<ImageMeta> {
        let metadata = fs::metadata(self.image_path(image_ref)?)
            .await
            .map_err(|e| BmmError::Image(format!("Image {image_ref} not found: {e}")))?;
        Ok(ImageMeta {
            image_ref: image_ref.to_string(),
            size_bytes: metadata.len(),
        })
    }
}
