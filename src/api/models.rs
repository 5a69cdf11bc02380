//! Request and response bodies of the backend APIs
//!
//! Only the fields the scenarios look at are modelled; everything else is
//! ignored on deserialization.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant as listed by the tenantadm internal API
#[derive(Debug, Clone, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tenant_token: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Sign-up request for a new organization
#[derive(Debug, Clone, Serialize)]
pub struct NewOrganization {
    pub request_id: String,
    pub organization: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "g-recaptcha-response")]
    pub recaptcha_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

impl NewOrganization {
    /// Sign-up payload with a unique request id and a placeholder captcha
    pub fn new(organization: &str, email: &str, password: &str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            organization: organization.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            recaptcha_response: "foobar".to_string(),
            plan: None,
        }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Device limit of a tenant
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MaxDevicesLimit {
    pub limit: u64,
}

/// Device identity with its authentication sets
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub auth_sets: Vec<AuthSet>,
    #[serde(default)]
    pub identity_data: serde_json::Value,
}

/// One identity/key bundle awaiting an accept or reject decision
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSet {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub pubkey: Option<String>,
}

/// Inventory record of a device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInventory {
    pub id: String,
    pub updated_ts: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Vec<serde_json::Value>,
}

/// Deployment status values reported by the deployments service
pub const DEPLOYMENT_FINISHED: &str = "finished";

#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artifact_name: Option<String>,
    pub status: String,
    pub device_count: u64,
}

impl Deployment {
    pub fn is_finished(&self) -> bool {
        self.status == DEPLOYMENT_FINISHED
    }
}

/// Per-device outcome counters of a deployment, keyed by status name
/// (`success`, `failure`, `pending`, `already-installed`, ...)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentStatistics {
    #[serde(flatten)]
    pub counts: BTreeMap<String, u64>,
}

impl DeploymentStatistics {
    pub fn get(&self, status: &str) -> u64 {
        self.counts.get(status).copied().unwrap_or(0)
    }

    pub fn success(&self) -> u64 {
        self.get("success")
    }

    pub fn failure(&self) -> u64 {
        self.get("failure")
    }
}

/// Request to deploy an artifact to a set of devices
#[derive(Debug, Clone, Serialize)]
pub struct NewDeployment {
    pub name: String,
    pub artifact_name: String,
    pub devices: Vec<String>,
}

/// Two-factor authentication state of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TfaStatus {
    Enabled,
    Disabled,
    Unverified,
}

impl fmt::Display for TfaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TfaStatus::Enabled => "enabled",
            TfaStatus::Disabled => "disabled",
            TfaStatus::Unverified => "unverified",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub tfa_status: Option<TfaStatus>,
}

/// Body of `GET /2faqr`
#[derive(Debug, Clone, Deserialize)]
pub struct TfaQr {
    /// Base64 encoded PNG
    pub qr: String,
}
