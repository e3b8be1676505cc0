//! Integration tests for workload placement.
//!
//! These drive `BmmOrchestrator::spawn` against in-memory inventory and
//! fabric, a fake power controller, and a scripted installer probe.

mod common;

use std::time::Duration;

use bmm::workload::VmState;
use bmm::{
    BmmError, InMemoryFlowController, InstallState, MachineStatus, WorkloadStore, RESOURCE_POOL,
};
use common::{machine, workload, Harness, IMAGE, OTHER_IMAGE};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Tenant and pool placement
// =============================================================================

#[tokio::test]
async fn test_spawn_tenant_creates_region_and_binds_machine() {
    let w = workload("w1", IMAGE, "C,tenantA,100");
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);
    h.probe.script_install(&w.name);

    let placed = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap();

    assert_eq!(placed.id, "m1");
    assert_eq!(placed.status, MachineStatus::Used);
    assert_eq!(placed.availability_zone, "tenantA");
    assert_eq!(placed.vlan_id, Some(100));
    assert_eq!(placed.instance_id.as_deref(), Some("w1"));

    assert_eq!(h.rpc.call_count("createRegion"), 1);
    assert_eq!(h.rpc.call_count("setServerPort"), 2);
    assert_eq!(h.rpc.call_count("setOuterPortAssociationSetting"), 2);
    assert_eq!(h.rpc.attached_ports("tenantA").len(), 2);

    let stored = h.workload("w1").await;
    assert_eq!(stored.display_name.as_deref(), Some("bm-01"));
    assert_eq!(stored.availability_zone, "tenantA,100");
    assert_eq!(stored.vm_state, VmState::Active);
}

#[tokio::test]
async fn test_spawn_tenant_on_active_pool_machine() {
    let w = workload("w1", IMAGE, "C,tenantA,100");
    let h = Harness::new(vec![machine(1, MachineStatus::Active)], vec![w.clone()]);
    h.probe.script_install(&w.name);

    let placed = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap();

    assert_eq!(placed.status, MachineStatus::Used);
    assert_eq!(placed.availability_zone, "tenantA");
    assert_eq!(placed.vlan_id, Some(100));
    assert_eq!(h.rpc.call_count("createRegion"), 1);
    assert_eq!(h.rpc.call_count("setServerPort"), 2);
}

#[tokio::test]
async fn test_install_drives_exactly_one_power_cycle() {
    let w = workload("w1", IMAGE, "C,tenantA,100");
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);
    h.probe.script_install(&w.name);

    h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap();

    // machine starts powered on, so the installer boot is a reset
    assert_eq!(h.power.actions(), vec!["reset", "soft_off", "on"]);
}

#[tokio::test]
async fn test_install_writes_provisioning_artifacts() {
    let w = workload("w1", IMAGE, RESOURCE_POOL);
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);
    h.probe.script_install(&w.name);

    h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap();

    let instance_dir = h.config.cobbler_path.join("images").join(&w.name);
    assert!(instance_dir.join("disk").exists());
    assert!(instance_dir.join("create.sh").exists());

    // after install, PXE points at local disk
    let pxe = std::fs::read_to_string(h.config.pxe_boot_path.join("01-aa-bb-cc-dd-ee-01")).unwrap();
    assert!(pxe.to_ascii_lowercase().contains("localboot"));
}

#[tokio::test]
async fn test_spawn_pool_leaves_machine_active_without_fabric_calls() {
    let w = workload("w1", IMAGE, RESOURCE_POOL);
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);
    h.probe.script_install(&w.name);

    let placed = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap();

    assert_eq!(placed.status, MachineStatus::Active);
    assert_eq!(placed.availability_zone, RESOURCE_POOL);
    assert_eq!(placed.vlan_id, None);
    assert!(h.rpc.calls().is_empty());
    assert_eq!(h.workload("w1").await.vm_state, VmState::Active);
}

#[tokio::test]
async fn test_spawn_joins_existing_region_without_create_flag() {
    let w = workload("w1", IMAGE, "tenantA,100");
    let h = Harness::with_fabric(
        vec![machine(1, MachineStatus::Inactive)],
        vec![w.clone()],
        InMemoryFlowController::with_regions(["tenantA"]),
    );
    h.probe.script_install(&w.name);

    let placed = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap();

    assert_eq!(placed.status, MachineStatus::Used);
    assert_eq!(h.rpc.call_count("createRegion"), 0);
    assert_eq!(h.rpc.call_count("setServerPort"), 2);
}

// =============================================================================
// Reuse of installed pool machines
// =============================================================================

#[tokio::test]
async fn test_spawn_reuses_pool_machine_with_matching_image() {
    let old = workload("old", IMAGE, RESOURCE_POOL);
    let new = workload("new", IMAGE, "C,tenantB,200");
    let mut installed = machine(1, MachineStatus::Active);
    installed.instance_id = Some("old".to_string());
    let h = Harness::new(
        vec![machine(2, MachineStatus::Inactive), installed],
        vec![old, new.clone()],
    );

    let placed = h.orchestrator.spawn(&new, &CancellationToken::new()).await.unwrap();

    assert_eq!(placed.id, "m1");
    assert_eq!(placed.status, MachineStatus::Used);
    assert_eq!(placed.instance_id.as_deref(), Some("new"));
    assert_eq!(placed.vlan_id, Some(200));

    // no reinstall
    assert!(h.power.actions().is_empty());
    assert_eq!(h.probe.reads(), 0);

    let previous = h.workload("old").await;
    assert!(previous.deleted);
    assert_eq!(h.workload("new").await.vm_state, VmState::Active);
    assert_eq!(h.machine("m2").await.status, MachineStatus::Inactive);
}

#[tokio::test]
async fn test_spawn_installs_fresh_machine_when_image_differs() {
    let old = workload("old", IMAGE, RESOURCE_POOL);
    let new = workload("new", OTHER_IMAGE, "C,tenantB,200");
    let mut installed = machine(1, MachineStatus::Active);
    installed.instance_id = Some("old".to_string());
    let h = Harness::new(
        vec![installed, machine(2, MachineStatus::Inactive)],
        vec![old, new.clone()],
    );
    h.probe.script_install(&new.name);

    let placed = h.orchestrator.spawn(&new, &CancellationToken::new()).await.unwrap();

    // first claimable machine of the type, not a reuse
    assert_eq!(placed.id, "m1");
    assert_eq!(h.power.count("soft_off"), 1);
    assert!(h.workload("old").await.deleted);
}

// =============================================================================
// Failures before and after the claim
// =============================================================================

#[tokio::test]
async fn test_spawn_without_free_machine_is_unavailable() {
    let w = workload("w1", IMAGE, RESOURCE_POOL);
    let h = Harness::new(vec![machine(1, MachineStatus::Used)], vec![w.clone()]);

    let err = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, BmmError::MachineUnavailable(_)));
    assert_eq!(h.machine("m1").await.status, MachineStatus::Used);
    assert!(h.power.actions().is_empty());
}

#[tokio::test]
async fn test_spawn_rejects_malformed_zone_before_claiming() {
    let w = workload("w1", IMAGE, "C,tenantA,notavlan");
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);

    let err = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, BmmError::InvalidZone { .. }));
    assert_eq!(h.machine("m1").await.status, MachineStatus::Inactive);
}

#[tokio::test]
async fn test_spawn_rejects_unknown_image_before_claiming() {
    let w = workload("w1", "no-such-image", RESOURCE_POOL);
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);

    let err = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, BmmError::Image(_)));
    assert_eq!(h.machine("m1").await.status, MachineStatus::Inactive);
}

#[tokio::test]
async fn test_tenant_zone_without_flow_controller_is_rejected_before_claiming() {
    let w = workload("w1", IMAGE, "C,tenantA,100");
    let h = Harness::without_fabric(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);

    let err = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, BmmError::Config(msg) if msg.contains("ofc_service_url")));
    assert_eq!(h.machine("m1").await.status, MachineStatus::Inactive);
    assert!(h.power.actions().is_empty());
}

#[tokio::test]
async fn test_pool_spawn_needs_no_flow_controller() {
    let w = workload("w1", IMAGE, RESOURCE_POOL);
    let h = Harness::without_fabric(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);
    h.probe.script_install(&w.name);

    let placed = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap();

    assert_eq!(placed.status, MachineStatus::Active);
}

#[tokio::test]
async fn test_missing_region_leaves_machine_processing() {
    let w = workload("w1", IMAGE, "tenantX,5");
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);

    let err = h.orchestrator.spawn(&w, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, BmmError::RegionNotFound(r) if r == "tenantX"));
    assert_eq!(h.machine("m1").await.status, MachineStatus::Processing);
    assert_eq!(h.rpc.call_count("setServerPort"), 0);
}

#[tokio::test]
async fn test_workload_deleted_mid_install_aborts_with_instance_not_found() {
    let w = workload("w1", IMAGE, RESOURCE_POOL);
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);
    h.probe.script(&w.name, &[InstallState::Unknown]);

    let cancel = CancellationToken::new();
    let (result, ()) = tokio::join!(h.orchestrator.spawn(&w, &cancel), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.workloads.destroy_workload("w1").await.unwrap();
    });

    let err = result.unwrap_err();
    assert!(matches!(err, BmmError::InstanceNotFound(id) if id == "w1"));
    assert_eq!(h.machine("m1").await.status, MachineStatus::Processing);
}

#[tokio::test]
async fn test_cancelled_spawn_leaves_machine_processing() {
    let w = workload("w1", IMAGE, RESOURCE_POOL);
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);
    h.probe.script(&w.name, &[InstallState::Unknown]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let (result, ()) = tokio::join!(h.orchestrator.spawn(&w, &cancel), async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    assert!(matches!(result.unwrap_err(), BmmError::Cancelled(_)));
    assert_eq!(h.machine("m1").await.status, MachineStatus::Processing);
}

#[tokio::test]
async fn test_spawn_with_cancelled_token_claims_nothing() {
    let w = workload("w1", IMAGE, RESOURCE_POOL);
    let h = Harness::new(vec![machine(1, MachineStatus::Inactive)], vec![w.clone()]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.orchestrator.spawn(&w, &cancel).await.unwrap_err();

    assert!(matches!(err, BmmError::Cancelled(_)));
    assert_eq!(h.machine("m1").await.status, MachineStatus::Inactive);
    assert!(h.power.actions().is_empty());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_spawns_claim_distinct_machines() {
    let workloads: Vec<_> = (0..3)
        .map(|i| workload(&format!("w{i}"), IMAGE, RESOURCE_POOL))
        .collect();
    let h = Harness::new(
        vec![machine(1, MachineStatus::Inactive), machine(2, MachineStatus::Inactive)],
        workloads.clone(),
    );
    for w in &workloads {
        h.probe.script_install(&w.name);
    }

    let cancel = CancellationToken::new();
    let results = join_all(workloads.iter().map(|w| h.orchestrator.spawn(w, &cancel))).await;

    let placed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(placed.len(), 2);
    assert_ne!(placed[0].id, placed[1].id);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(BmmError::MachineUnavailable(_))))
            .count(),
        1
    );
}
