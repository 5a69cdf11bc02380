//! # Tenants
//!
//! Organization sign-up through the tenantadm management API, tenant lookup
//! through the internal API and the per-plan device limits set up for a new
//! tenant.

use reqwest::{Method, StatusCode};
use tracing::info;

use crate::api::endpoints::{deviceauth, tenantadm};
use crate::api::{ApiClient, ApiResponse, MaxDevicesLimit, NewOrganization, RequestOptions, Tenant};
use crate::errors::{Error, Result};
use crate::smtp::Message;

/// Device limit of the default (`os`) plan
pub const DEFAULT_PLAN_DEVICE_LIMIT: u64 = 50;

/// Device limit of the `professional` plan
pub const PROFESSIONAL_PLAN_DEVICE_LIMIT: u64 = 250;

/// How the backend answered a sign-up request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupOutcome {
    /// 202: provisioning was queued. Duplicate organization names land here.
    Accepted,
    /// 409: the email address already owns an organization
    Conflict(String),
    /// 400: the request was rejected, e.g. an unknown plan
    Invalid(String),
}

impl SignupOutcome {
    /// Map a sign-up response; statuses outside 202/409/400 are errors
    pub fn from_response(response: &ApiResponse) -> Result<Self> {
        match response.status {
            StatusCode::ACCEPTED => Ok(Self::Accepted),
            StatusCode::CONFLICT => Ok(Self::Conflict(response.text())),
            StatusCode::BAD_REQUEST => Ok(Self::Invalid(response.text())),
            other => Err(Error::unexpected_status("create organization", other, response.text())),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Accepted => StatusCode::ACCEPTED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Submit the public sign-up form.
///
/// `client` is bound to the tenantadm management base URL; no credentials
/// are needed.
pub async fn create_organization(
    client: &ApiClient,
    organization: &NewOrganization,
) -> Result<SignupOutcome> {
    let form = serde_json::to_value(organization)?;
    let response = client
        .call(Method::POST, tenantadm::URL_MGMT_TENANTS, RequestOptions::new().form(form))
        .await?;
    let outcome = SignupOutcome::from_response(&response)?;

    info!(
        organization = %organization.organization,
        email = %organization.email,
        plan = organization.plan.as_deref().unwrap_or("os"),
        status = %outcome.status(),
        "submitted organization sign-up"
    );
    Ok(outcome)
}

/// All tenants, from the tenantadm internal API
pub async fn list_tenants_internal(client: &ApiClient) -> Result<Vec<Tenant>> {
    client
        .get(tenantadm::URL_INTERNAL_TENANTS)
        .await?
        .expect_status(StatusCode::OK, "list tenants")?
        .json()
}

/// The only tenant in the system; errors when there are none or several
pub async fn single_tenant(client: &ApiClient) -> Result<Tenant> {
    let mut tenants = list_tenants_internal(client).await?;
    if tenants.len() != 1 {
        return Err(Error::assertion(format!("expected exactly 1 tenant, found {}", tenants.len())));
    }
    Ok(tenants.remove(0))
}

/// Device limit of `tenant_id`, from the deviceauth internal API
pub async fn max_devices_limit(client: &ApiClient, tenant_id: &str) -> Result<u64> {
    let limit: MaxDevicesLimit = client
        .call(
            Method::GET,
            deviceauth::URL_LIMITS_MAX_DEVICES,
            RequestOptions::new().path_param("tid", tenant_id),
        )
        .await?
        .expect_status(StatusCode::OK, "get max devices limit")?
        .json()?;
    Ok(limit.limit)
}

/// Device limit a new tenant on `plan` should get
pub fn expected_device_limit(plan: Option<&str>) -> u64 {
    match plan {
        Some("professional") => PROFESSIONAL_PLAN_DEVICE_LIMIT,
        _ => DEFAULT_PLAN_DEVICE_LIMIT,
    }
}

/// Check the welcome mail of a sign-up: exactly one message whose first
/// recipient is `recipient`, sent by `sender`, with a body.
pub fn assert_signup_email(messages: &[Message], recipient: &str, sender: &str) -> Result<()> {
    let addressed: Vec<&Message> = messages
        .iter()
        .filter(|m| m.rcpt_tos.first().map(String::as_str) == Some(recipient))
        .collect();

    let [message] = addressed.as_slice() else {
        return Err(Error::assertion(format!(
            "expected exactly 1 sign-up mail to {recipient}, got {}",
            addressed.len()
        )));
    };
    if message.mail_from != sender {
        return Err(Error::assertion(format!(
            "sign-up mail sent by {}, expected {sender}",
            message.mail_from
        )));
    }
    if message.data.is_empty() {
        return Err(Error::assertion("sign-up mail has an empty body"));
    }
    Ok(())
}
