//! Client compatibility
//!
//! Older clients connect to the current backend, get accepted, report
//! inventory and install a no-op update. Runs against both the open source
//! and the enterprise backend.

use mender_e2e::api::{NewDeployment, Service};
use mender_e2e::artifact::Artifact;
use mender_e2e::deployments::{assert_successful_deployment, create_deployment, upload_artifact};
use mender_e2e::device::SSH_OPEN_WAIT;
use mender_e2e::devices::{accept_devices, await_inventory_updated, wait_for_pending_devices};
use mender_e2e::poll::DEVICE_CONNECT_TIMEOUT;
use mender_e2e::TestHarness;

use crate::common::{setup_device_owner, Edition};

const NOOP_ARTIFACT: &str = "rootfs-noop-update";

async fn compatibility(name: &str, edition: Edition) {
    let harness = TestHarness::start(edition.harness_options(name))
        .await
        .expect("Failed to start harness");

    let devices = harness.devices().unwrap();
    assert!(!devices.is_empty(), "no devices configured");
    devices.ssh_is_opened(SSH_OPEN_WAIT).await.expect("devices should accept SSH");

    let token = setup_device_owner(&harness, edition, &devices)
        .await
        .expect("device owner should be set up");

    let deviceauth = harness.management(Service::Deviceauth).unwrap().with_auth(&token);
    let inventory = harness.management(Service::Inventory).unwrap().with_auth(&token);
    let deployments = harness.management(Service::Deployments).unwrap().with_auth(&token);

    let pending = wait_for_pending_devices(&deviceauth, devices.len(), DEVICE_CONNECT_TIMEOUT)
        .await
        .expect("every device should connect");
    accept_devices(&deviceauth, Some(pending.as_slice())).await.unwrap();
    await_inventory_updated(&inventory, devices.len(), harness.config.timeouts.provisioning())
        .await
        .unwrap();

    // Empty rootfs payload: the unchanged passive partition becomes active
    let device_types = ["qemux86-64", "raspberrypi3", "beaglebone"];
    let artifact = Artifact::new(NOOP_ARTIFACT, &device_types, "rootfs-image").make().await.unwrap();
    upload_artifact(&deployments, artifact.path()).await.unwrap();

    let deployment = NewDeployment {
        name: "noop_deployment".to_string(),
        artifact_name: NOOP_ARTIFACT.to_string(),
        devices: pending.iter().map(|d| d.id.clone()).collect(),
    };
    let id = create_deployment(&deployments, &deployment).await.unwrap();
    assert_successful_deployment(&deployments, &id, harness.config.timeouts.deployment())
        .await
        .expect("deployment should succeed on every device");
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_compat_clients_update() {
    compatibility("test_compat_clients_update", Edition::OpenSource).await;
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_compat_enterprise_clients_update() {
    compatibility("test_compat_enterprise_clients_update", Edition::Enterprise).await;
}
