//! Database migration from a legacy client
//!
//! A device running an old client is updated to the current one.
//!
//! - A first update that fails in a commit state script must roll back (two
//!   reboots, same active partition); the next one succeeds.
//! - Two successful updates in a row, with state scripts logging each run, to
//!   show the migrated database leaves nothing behind that breaks the second.
//!
//! Both run against the open source and the enterprise backend.
//!
//! Needs `MENDER_ROOTFS_IMAGE` pointing at a valid rootfs image for the device
//! and `MENDER_HOST_IP` set to an address the device can reach.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use mender_e2e::api::{ApiClient, NewDeployment, Service};
use mender_e2e::artifact::Artifact;
use mender_e2e::deployments::{
    assert_successful_deployment, await_deployment_finished, check_expected_statistics,
    create_deployment, upload_artifact,
};
use mender_e2e::device::{Device, RemoteShell, RunOptions, REBOOT_WAIT, SSH_OPEN_WAIT};
use mender_e2e::devices::{accept_devices, wait_for_pending_devices};
use mender_e2e::poll::DEVICE_CONNECT_TIMEOUT;
use mender_e2e::TestHarness;

use crate::common::{setup_device_owner, Edition};

const DEVICE_TYPE: &str = "qemux86-64";

/// Older Yocto branches did not split mender.conf into /etc and /data; this
/// script provides the persistent half from the read-only one
const ENSURE_PERSISTENT_CONF: &str = r#"#!/bin/sh
set -e
if ! [ -f /data/mender/mender.conf ]; then
    (
         echo '{'
         grep RootfsPart /etc/mender/mender.conf |sed -e '${s/,$//}'
         echo '}'
    ) > /data/mender/mender.conf
fi
exit 0
"#;

/// Appended to by the logging state scripts, one script name per run
const STATE_SCRIPTS_LOG: &str = "/var/lib/mender/migration_state_scripts.log";

const LOGGING_SCRIPTS: [&str; 2] = ["ArtifactInstall_Enter_00", "ArtifactCommit_Enter_00"];

fn write_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write state script");
    path
}

struct Setup {
    harness: TestHarness,
    deployments: ApiClient,
    device: Device,
    device_id: String,
    host_ip: String,
    image: PathBuf,
}

async fn setup(name: &str, edition: Edition) -> Setup {
    let harness = TestHarness::start(edition.harness_options(name))
        .await
        .expect("Failed to start harness");
    let host_ip = harness.config.devices.host_ip.clone().expect("MENDER_HOST_IP must be set");
    let image = PathBuf::from(std::env::var("MENDER_ROOTFS_IMAGE").expect("MENDER_ROOTFS_IMAGE must be set"));

    let group = harness.devices().unwrap();
    let device = group.get(0).expect("one device configured").clone();
    group.ssh_is_opened(SSH_OPEN_WAIT).await.unwrap();

    let token = setup_device_owner(&harness, edition, &group)
        .await
        .expect("device owner should be set up");

    let deviceauth = harness.management(Service::Deviceauth).unwrap().with_auth(&token);
    let pending = wait_for_pending_devices(&deviceauth, 1, DEVICE_CONNECT_TIMEOUT).await.unwrap();
    accept_devices(&deviceauth, Some(pending.as_slice())).await.unwrap();

    let deployments = harness.management(Service::Deployments).unwrap().with_auth(&token);
    Setup { harness, deployments, device, device_id: pending[0].id.clone(), host_ip, image }
}

/// Build, upload and deploy a rootfs artifact to the device; returns the
/// deployment id
async fn deploy(setup: &Setup, name: &str, scripts: &[PathBuf]) -> String {
    let mut artifact = Artifact::new(name, &[DEVICE_TYPE], "rootfs-image")
        .with_payload_file(&setup.image)
        .with_format_version(2);
    for script in scripts {
        artifact = artifact.with_script(script);
    }
    let file = artifact.make().await.expect("artifact should build");
    upload_artifact(&setup.deployments, file.path()).await.unwrap();

    let deployment = NewDeployment {
        name: format!("{name}-deployment"),
        artifact_name: name.to_string(),
        devices: vec![setup.device_id.clone()],
    };
    create_deployment(&setup.deployments, &deployment).await.unwrap()
}

/// Successful rootfs update: one reboot into the other partition, which then
/// reports the new artifact
async fn update_image(setup: &Setup, scripts: &[PathBuf]) {
    let active = setup.device.active_partition().await.unwrap();
    let mut reboot = setup.device.reboot_detector(&setup.host_ip).await.unwrap();

    let name = format!("successful-update-{}", Uuid::new_v4());
    let id = deploy(setup, &name, scripts).await;
    reboot.verify_reboot_performed(REBOOT_WAIT, 1).await.expect("device should reboot");
    assert_successful_deployment(&setup.deployments, &id, setup.harness.config.timeouts.deployment())
        .await
        .unwrap();
    assert_ne!(setup.device.active_partition().await.unwrap(), active);
    assert_eq!(setup.device.installed_artifact().await.unwrap(), name);
    reboot.finish().await.unwrap();
}

async fn failure_then_success(name: &str, edition: Edition) {
    let setup = setup(name, edition).await;
    let scripts_dir = tempfile::tempdir().unwrap();
    let ensure_conf = write_script(
        scripts_dir.path(),
        "ArtifactInstall_Enter_00_ensure_persistent_conf",
        ENSURE_PERSISTENT_CONF,
    );
    let failing_commit =
        write_script(scripts_dir.path(), "ArtifactCommit_Enter_01", "#!/bin/sh\nexit 1\n");

    let active = setup.device.active_partition().await.unwrap();

    // Failing commit script: install, reboot into the new partition, roll back
    let mut reboot = setup.device.reboot_detector(&setup.host_ip).await.unwrap();
    let failed = format!("failed-update-{}", Uuid::new_v4());
    let id = deploy(&setup, &failed, &[ensure_conf.clone(), failing_commit]).await;
    reboot.verify_reboot_performed(REBOOT_WAIT, 2).await.expect("device should reboot twice");
    assert_eq!(setup.device.active_partition().await.unwrap(), active);
    await_deployment_finished(&setup.deployments, &id, setup.harness.config.timeouts.deployment())
        .await
        .unwrap();
    check_expected_statistics(&setup.deployments, &id, "failure", 1).await.unwrap();
    reboot.finish().await.unwrap();

    // Same image without the failing script
    update_image(&setup, &[ensure_conf]).await;
}

async fn state_scripts_log(device: &Device) -> String {
    let log = device.run(&format!("cat {STATE_SCRIPTS_LOG}"), RunOptions::default()).await.unwrap();
    log.trim().to_string()
}

async fn success_twice(name: &str, edition: Edition) {
    let setup = setup(name, edition).await;
    let scripts_dir = tempfile::tempdir().unwrap();
    let mut scripts = vec![write_script(
        scripts_dir.path(),
        "ArtifactInstall_Enter_00_ensure_persistent_conf",
        ENSURE_PERSISTENT_CONF,
    )];
    for script in LOGGING_SCRIPTS {
        let content = format!("#!/bin/sh\necho $(basename $0) >> {STATE_SCRIPTS_LOG}\n");
        scripts.push(write_script(scripts_dir.path(), script, &content));
    }

    update_image(&setup, &scripts).await;
    let once = LOGGING_SCRIPTS.join("\n");
    assert_eq!(state_scripts_log(&setup.device).await, once);

    update_image(&setup, &scripts).await;
    assert_eq!(state_scripts_log(&setup.device).await, format!("{once}\n{once}"));
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_db_migration_legacy_client_failure_then_success() {
    failure_then_success("test_db_migration_legacy_client_failure_then_success", Edition::OpenSource)
        .await;
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_db_migration_legacy_client_success_twice() {
    success_twice("test_db_migration_legacy_client_success_twice", Edition::OpenSource).await;
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_db_migration_enterprise_legacy_client_failure_then_success() {
    failure_then_success(
        "test_db_migration_enterprise_legacy_client_failure_then_success",
        Edition::Enterprise,
    )
    .await;
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_db_migration_enterprise_legacy_client_success_twice() {
    success_twice("test_db_migration_enterprise_legacy_client_success_twice", Edition::Enterprise)
        .await;
}
