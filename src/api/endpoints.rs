//! Backend service endpoints
//!
//! Paths are relative to the service base URL returned by
//! [`Service::management_base`] or configured for internal APIs. Path
//! parameters use `{name}` placeholders substituted by
//! [`RequestOptions::path_param`](super::RequestOptions::path_param).

use std::fmt;

/// Backend microservices the harness talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Useradm,
    Tenantadm,
    Deviceauth,
    Inventory,
    Deployments,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::Useradm,
        Service::Tenantadm,
        Service::Deviceauth,
        Service::Inventory,
        Service::Deployments,
    ];

    /// Service (and CLI binary) name
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Useradm => "useradm",
            Service::Tenantadm => "tenantadm",
            Service::Deviceauth => "deviceauth",
            Service::Inventory => "inventory",
            Service::Deployments => "deployments",
        }
    }

    fn management_path(&self) -> &'static str {
        match self {
            Service::Useradm => "/api/management/v1/useradm",
            Service::Tenantadm => "/api/management/v1/tenantadm",
            Service::Deviceauth => "/api/management/v2/devauth",
            Service::Inventory => "/api/management/v1/inventory",
            Service::Deployments => "/api/management/v1/deployments",
        }
    }

    /// Management API base URL behind `gateway`
    pub fn management_base(&self, gateway: &str) -> String {
        format!("{}{}", gateway.trim_end_matches('/'), self.management_path())
    }

    /// Internal API path appended to a service's direct address
    pub fn internal_path(&self) -> &'static str {
        match self {
            Service::Useradm => "/api/internal/v1/useradm",
            Service::Tenantadm => "/api/internal/v1/tenantadm",
            Service::Deviceauth => "/api/internal/v1/devauth",
            Service::Inventory => "/api/internal/v1/inventory",
            Service::Deployments => "/api/internal/v1/deployments",
        }
    }

    /// Internal API base URL for a service reachable at `address`
    pub fn internal_base(&self, address: &str) -> String {
        format!("{}{}", address.trim_end_matches('/'), self.internal_path())
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Service {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|svc| svc.as_str() == s)
            .ok_or_else(|| crate::errors::Error::config(format!("unknown service '{s}'")))
    }
}

/// Management base URLs of every service behind one gateway.
///
/// Compatibility setups run several backends side by side, each with its own
/// gateway address, so URLs are built per environment rather than fixed.
#[derive(Debug, Clone)]
pub struct ServiceUrls {
    gateway: String,
}

impl ServiceUrls {
    pub fn for_gateway(gateway: impl Into<String>) -> Self {
        Self { gateway: gateway.into() }
    }

    pub fn management(&self, service: Service) -> String {
        service.management_base(&self.gateway)
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }
}

pub mod useradm {
    pub const URL_LOGIN: &str = "/auth/login";
    pub const URL_USERS: &str = "/users";
    pub const URL_USERS_ID: &str = "/users/{id}";
    pub const URL_SETTINGS: &str = "/settings";
    pub const URL_2FAQR: &str = "/2faqr";
    pub const URL_2FAVERIFY: &str = "/2faverify";
    pub const URL_2FA_ENABLE: &str = "/users/{id}/2fa/enable";
    pub const URL_2FA_DISABLE: &str = "/users/{id}/2fa/disable";
    pub const URL_VERIFY_EMAIL_START: &str = "/auth/verify-email/start";
    pub const URL_VERIFY_EMAIL_COMPLETE: &str = "/auth/verify-email/complete";
}

pub mod tenantadm {
    pub const URL_MGMT_TENANTS: &str = "/tenants";
    pub const URL_INTERNAL_TENANTS: &str = "/tenants";
}

pub mod deviceauth {
    pub const URL_MGMT_DEVICES: &str = "/devices";
    pub const URL_AUTHSET_STATUS: &str = "/devices/{did}/auth/{aid}/status";
    pub const URL_LIMITS_MAX_DEVICES: &str = "/tenant/{tid}/limits/max_devices";
}

pub mod inventory {
    pub const URL_DEVICES: &str = "/devices";
}

pub mod deployments {
    pub const URL_DEPLOYMENTS: &str = "/deployments";
    pub const URL_DEPLOYMENTS_ID: &str = "/deployments/{id}";
    pub const URL_DEPLOYMENTS_STATISTICS: &str = "/deployments/{id}/statistics";
    pub const URL_DEPLOYMENTS_ARTIFACTS: &str = "/artifacts";
}
