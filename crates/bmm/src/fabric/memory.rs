//! In-process flow controller.
//!
//! Keeps regions in memory, records every call and fails on request. Built
//! for tests only (`testing` feature).

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::models::ServerPort;
use super::traits::FlowControllerRpc;
use crate::error::{BmmError, Result};

#[derive(Debug, Clone, Default)]
struct RegionState {
    server_ports: Vec<ServerPort>,
    outer_ports: Vec<(ServerPort, u16)>,
}

#[derive(Debug, Default)]
struct State {
    regions: BTreeMap<String, RegionState>,
    calls: Vec<String>,
    failing: HashSet<String>,
    saves: usize,
}

/// Flow controller kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryFlowController {
    state: Mutex<State>,
}

impl InMemoryFlowController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller that already knows `regions`.
    #[must_use]
    pub fn with_regions<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let controller = Self::default();
        {
            let mut state = controller.lock();
            for region in regions {
                state.regions.insert(region.into(), RegionState::default());
            }
        }
        controller
    }

    /// Make every future call of `method` fail.
    pub fn fail_on(&self, method: &str) {
        self.lock().failing.insert(method.to_string());
    }

    /// Method names in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls to `method`.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == method).count()
    }

    #[must_use]
    pub fn has_region(&self, region: &str) -> bool {
        self.lock().regions.contains_key(region)
    }

    /// Server ports attached to `region`.
    #[must_use]
    pub fn attached_ports(&self, region: &str) -> Vec<ServerPort> {
        self.lock()
            .regions
            .get(region)
            .map(|r| r.server_ports.clone())
            .unwrap_or_default()
    }

    /// Trunk ports carrying `region`.
    #[must_use]
    pub fn outer_ports(&self, region: &str) -> Vec<(ServerPort, u16)> {
        self.lock()
            .regions
            .get(region)
            .map(|r| r.outer_ports.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record a call and apply failure injection.
    fn enter(&self, method: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(method.to_string());
        debug!(method, "In-memory flow controller call");
        if state.failing.contains(method) {
            return Err(rejected(method, "injected failure"));
        }
        Ok(state)
    }
}

fn rejected(method: &str, message: &str) -> BmmError {
    BmmError::FlowController {
        method: method.to_string(),
        message: message.to_string(),
    }
}

fn region_mut<'a>(state: &'a mut State, method: &str, region: &str) -> Result<&'a mut RegionState> {
    state
        .regions
        .get_mut(region)
        .ok_or_else(|| rejected(method, &format!("no such region: {region}")))
}

#[async_trait]
impl FlowControllerRpc for InMemoryFlowController {
    async fn set_server_port(&self, port: &ServerPort, region: &str) -> Result<()> {
        let mut state = self.enter("setServerPort")?;
        let entry = region_mut(&mut state, "setServerPort", region)?;
        if !entry.server_ports.contains(port) {
            entry.server_ports.push(port.clone());
        }
        Ok(())
    }

    async fn clear_server_port(&self, port: &ServerPort, region: &str) -> Result<()> {
        let mut state = self.enter("clearServerPort")?;
        let entry = region_mut(&mut state, "clearServerPort", region)?;
        let before = entry.server_ports.len();
        entry.server_ports.retain(|p| p != port);
        if entry.server_ports.len() == before {
            return Err(rejected(
                "clearServerPort",
                &format!("port {}/{} not attached", port.dpid, port.port),
            ));
        }
        Ok(())
    }

    async fn create_region(&self, region: &str) -> Result<()> {
        let mut state = self.enter("createRegion")?;
        if state.regions.contains_key(region) {
            return Err(rejected("createRegion", &format!("region exists: {region}")));
        }
        state.regions.insert(region.to_string(), RegionState::default());
        Ok(())
    }

    async fn destroy_region(&self, region: &str) -> Result<()> {
        let mut state = self.enter("destroyRegion")?;
        state
            .regions
            .remove(region)
            .map(drop)
            .ok_or_else(|| rejected("destroyRegion", &format!("no such region: {region}")))
    }

    async fn set_outer_port_association_setting(
        &self,
        port: &ServerPort,
        vlan_id: u16,
        region: &str,
    ) -> Result<()> {
        let method = "setOuterPortAssociationSetting";
        let mut state = self.enter(method)?;
        let entry = region_mut(&mut state, method, region)?;
        let assoc = (port.clone(), vlan_id);
        if !entry.outer_ports.contains(&assoc) {
            entry.outer_ports.push(assoc);
        }
        Ok(())
    }

    async fn clear_outer_port_association_setting(
        &self,
        port: &ServerPort,
        vlan_id: u16,
        region: &str,
    ) -> Result<()> {
        let method = "clearOuterPortAssociationSetting";
        let mut state = self.enter(method)?;
        let entry = region_mut(&mut state, method, region)?;
        entry
            .outer_ports
            .retain(|(p, v)| !(p == port && *v == vlan_id));
        Ok(())
    }

    async fn show_region(&self) -> Result<Vec<String>> {
        let state = self.enter("showRegion")?;
        Ok(state.regions.keys().cloned().collect())
    }

    async fn show_server_ports(&self, region: &str) -> Result<Vec<ServerPort>> {
        let state = self.enter("showServerPort")?;
        Ok(state
            .regions
            .get(region)
            .map(|r| r.server_ports.clone())
            .unwrap_or_default())
    }

    async fn save(&self) -> Result<()> {
        let mut state = self.enter("save")?;
        state.saves += 1;
        Ok(())
    }
}
