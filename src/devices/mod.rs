//! # Device Authorization and Inventory
//!
//! Waiting for devices to show up as pending in deviceauth, accepting them,
//! and waiting for their first inventory report after acceptance.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde_json::json;
use tracing::{debug, info};

use crate::api::endpoints::{deviceauth, inventory};
use crate::api::{ApiClient, Device, DeviceInventory, RequestOptions};
use crate::errors::{Error, Result};
use crate::poll::{await_condition, PollPolicy, Probe};

/// `GET /devices?status=pending` on the deviceauth management API
pub async fn list_pending_devices(client: &ApiClient) -> Result<Vec<Device>> {
    client
        .call(
            Method::GET,
            deviceauth::URL_MGMT_DEVICES,
            RequestOptions::new().query("status", "pending"),
        )
        .await?
        .expect_status(StatusCode::OK, "list pending devices")?
        .json()
}

/// Classify a pending-device listing against the number of devices started
pub fn pending_devices_probe(devices: Vec<Device>, expected: usize) -> Probe<Vec<Device>> {
    match devices.len() {
        n if n == expected => Probe::Ready(devices),
        n if n > expected => Probe::Failed(format!(
            "{n} devices pending authorization, only {expected} were started"
        )),
        _ => Probe::Pending,
    }
}

/// Wait until exactly `expected` devices are pending authorization
pub async fn wait_for_pending_devices(
    client: &ApiClient,
    expected: usize,
    timeout: Duration,
) -> Result<Vec<Device>> {
    let policy = PollPolicy::new("devices to connect to server", timeout);

    let devices = await_condition(&policy, || async move {
        let devices = list_pending_devices(client).await?;
        debug!(pending = devices.len(), expected, "checked pending devices");
        Ok(pending_devices_probe(devices, expected))
    })
    .await?;

    info!(count = devices.len(), "devices connected");
    Ok(devices)
}

/// Accept the first auth set of each device, or of every pending device when
/// `devices` is `None`
pub async fn accept_devices(client: &ApiClient, devices: Option<&[Device]>) -> Result<()> {
    let fetched;
    let devices = match devices {
        Some(devices) => devices,
        None => {
            fetched = list_pending_devices(client).await?;
            fetched.as_slice()
        }
    };

    for device in devices {
        let auth_set = device.auth_sets.first().ok_or_else(|| {
            Error::assertion(format!("device {} has no authentication sets", device.id))
        })?;

        client
            .call(
                Method::PUT,
                deviceauth::URL_AUTHSET_STATUS,
                RequestOptions::new()
                    .path_param("did", &device.id)
                    .path_param("aid", &auth_set.id)
                    .json(json!({ "status": "accepted" })),
            )
            .await?
            .expect_status(StatusCode::NO_CONTENT, &format!("accept device {}", device.id))?;

        info!(device_id = %device.id, auth_set_id = %auth_set.id, "device accepted");
    }

    Ok(())
}

/// Classify an inventory listing.
///
/// Done once every one of `expected` devices reported after `since`. Seeing
/// more devices than exist cannot be fixed by waiting.
pub fn inventory_probe(
    inventories: &[DeviceInventory],
    expected: usize,
    since: DateTime<Utc>,
) -> Probe<()> {
    if inventories.len() > expected {
        return Probe::Failed(format!(
            "received {} devices from inventory, only {expected} exist",
            inventories.len()
        ));
    }
    if inventories.len() < expected {
        return Probe::Pending;
    }
    let updated = inventories.iter().filter(|inv| inv.updated_ts > since).count();
    Probe::ready_if(updated == expected, ())
}

/// Wait until all `num_devices` devices have updated their inventory after
/// the moment of this call
pub async fn await_inventory_updated(
    client: &ApiClient,
    num_devices: usize,
    timeout: Duration,
) -> Result<()> {
    let since = Utc::now();
    let policy = PollPolicy::new("devices to submit inventory", timeout);

    await_condition(&policy, || async move {
        let inventories: Vec<DeviceInventory> = client
            .call(
                Method::GET,
                inventory::URL_DEVICES,
                RequestOptions::new().query("per_page", num_devices * 2),
            )
            .await?
            .expect_status(StatusCode::OK, "list device inventories")?
            .json()?;
        Ok(inventory_probe(&inventories, num_devices, since))
    })
    .await?;

    info!(num_devices, "inventory updated");
    Ok(())
}
