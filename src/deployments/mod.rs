//! # Deployments
//!
//! Artifact upload, deployment creation and waiting for a deployment to run
//! to completion on every targeted device.

use std::path::Path;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use tracing::{debug, info};

use crate::api::endpoints::deployments::*;
use crate::api::{
    ApiClient, Deployment, DeploymentStatistics, MultipartFile, NewDeployment, RequestOptions,
};
use crate::errors::{Error, Result};
use crate::poll::{await_condition, PollPolicy, Probe};

/// Upload a built artifact file (201)
pub async fn upload_artifact(client: &ApiClient, path: &Path) -> Result<()> {
    let content = tokio::fs::read(path).await?;
    let file = MultipartFile {
        field: "artifact".to_string(),
        file_name: "artifact.mender".to_string(),
        content,
        mime: "application/octet-stream".to_string(),
    };

    client
        .call(Method::POST, URL_DEPLOYMENTS_ARTIFACTS, RequestOptions::new().file(file))
        .await?
        .expect_status(StatusCode::CREATED, "upload artifact")?;

    info!(path = %path.display(), "artifact uploaded");
    Ok(())
}

/// Create a deployment and return its id, taken from the `Location` header
pub async fn create_deployment(client: &ApiClient, deployment: &NewDeployment) -> Result<String> {
    let body = serde_json::to_value(deployment)?;
    let response = client
        .post(URL_DEPLOYMENTS, body)
        .await?
        .expect_status(StatusCode::CREATED, "create deployment")?;

    let id = response
        .location_id()
        .ok_or_else(|| Error::assertion("deployment created without a Location header"))?;

    info!(deployment_id = %id, name = %deployment.name, devices = deployment.devices.len(), "deployment created");
    Ok(id)
}

pub async fn get_deployment(client: &ApiClient, id: &str) -> Result<Deployment> {
    client
        .call(Method::GET, URL_DEPLOYMENTS_ID, RequestOptions::new().path_param("id", id))
        .await?
        .expect_status(StatusCode::OK, &format!("get deployment {id}"))?
        .json()
}

pub async fn get_statistics(client: &ApiClient, id: &str) -> Result<DeploymentStatistics> {
    client
        .call(Method::GET, URL_DEPLOYMENTS_STATISTICS, RequestOptions::new().path_param("id", id))
        .await?
        .expect_status(StatusCode::OK, &format!("get statistics of deployment {id}"))?
        .json()
}

/// Classify one deployment observation; only `finished` is terminal
pub fn deployment_probe(deployment: Deployment) -> Probe<Deployment> {
    if deployment.is_finished() {
        Probe::Ready(deployment)
    } else {
        Probe::Pending
    }
}

/// Wait until the deployment reaches its terminal status
pub async fn await_deployment_finished(
    client: &ApiClient,
    id: &str,
    timeout: Duration,
) -> Result<Deployment> {
    let policy = PollPolicy::deployment(format!("deployment {id} to finish")).with_timeout(timeout);

    await_condition(&policy, || async move {
        let deployment = get_deployment(client, id).await?;
        debug!(deployment_id = id, status = %deployment.status, "checked deployment");
        Ok(deployment_probe(deployment))
    })
    .await
}

/// Every targeted device succeeded and none failed
pub fn verify_statistics(deployment: &Deployment, stats: &DeploymentStatistics) -> Result<()> {
    if stats.failure() != 0 {
        return Err(Error::assertion(format!(
            "deployment {}: {} devices failed to update",
            deployment.id,
            stats.failure()
        )));
    }
    if stats.success() != deployment.device_count {
        return Err(Error::assertion(format!(
            "deployment {}: {} of {} devices updated successfully",
            deployment.id,
            stats.success(),
            deployment.device_count
        )));
    }
    Ok(())
}

/// Wait for the deployment to finish, then check that it succeeded on every
/// device
pub async fn assert_successful_deployment(
    client: &ApiClient,
    id: &str,
    timeout: Duration,
) -> Result<()> {
    let deployment = await_deployment_finished(client, id, timeout).await?;
    let stats = get_statistics(client, id).await?;
    verify_statistics(&deployment, &stats)?;

    info!(deployment_id = id, devices = deployment.device_count, "deployment succeeded");
    Ok(())
}

/// Fail unless the `status` counter of the deployment equals `expected`
pub async fn check_expected_statistics(
    client: &ApiClient,
    id: &str,
    status: &str,
    expected: u64,
) -> Result<()> {
    let stats = get_statistics(client, id).await?;
    let actual = stats.get(status);
    if actual != expected {
        return Err(Error::assertion(format!(
            "deployment {id}: expected {expected} devices with status '{status}', got {actual}"
        )));
    }
    Ok(())
}
