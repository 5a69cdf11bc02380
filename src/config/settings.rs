//! # Configuration Settings
//!
//! Defines the configuration structure for the e2e harness.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::Service;
use crate::errors::{Error, Result};

/// Main harness configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct HarnessConfig {
    /// Backend API locations
    #[validate(nested)]
    pub backend: BackendConfig,

    /// Mock SMTP server
    #[validate(nested)]
    pub smtp: SmtpConfig,

    /// SSH accessible devices
    #[validate(nested)]
    pub devices: DeviceConfig,

    /// Migration CLI invocation
    #[validate(nested)]
    pub migration: MigrationConfig,

    /// Poll timeout tiers
    #[validate(nested)]
    pub timeouts: TimeoutConfig,

    /// Logging
    #[validate(nested)]
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        for host in &self.devices.hosts {
            if host.split(':').count() > 2 {
                return Err(Error::config(format!("malformed device host string '{host}'")));
            }
        }

        if self.timeouts.mail_delivery_seconds > self.timeouts.provisioning_seconds {
            return Err(Error::config(
                "mail delivery timeout cannot exceed the provisioning timeout",
            ));
        }

        Ok(())
    }
}

/// Backend API locations
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackendConfig {
    /// Public API gateway, e.g. `https://mender-api-gateway`
    #[validate(url(message = "Gateway URL must be a valid URL"))]
    pub gateway_url: String,

    /// tenantadm internal API base (bypasses the gateway)
    #[validate(url(message = "tenantadm internal URL must be a valid URL"))]
    pub tenantadm_internal_url: String,

    /// deviceauth internal API base (bypasses the gateway)
    #[validate(url(message = "deviceauth internal URL must be a valid URL"))]
    pub deviceauth_internal_url: String,

    /// Accept the self-signed gateway certificate of test deployments
    pub accept_invalid_certs: bool,

    /// Per-request timeout in seconds
    #[validate(range(min = 1, max = 300, message = "Request timeout must be between 1 and 300 seconds"))]
    pub request_timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://mender-api-gateway".to_string(),
            tenantadm_internal_url: "http://mender-tenantadm:8080".to_string(),
            deviceauth_internal_url: "http://mender-device-auth:8080".to_string(),
            accept_invalid_certs: true,
            request_timeout_seconds: 30,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gateway_url: env_string("MENDER_GATEWAY_URL", defaults.gateway_url),
            tenantadm_internal_url: env_string(
                "MENDER_TENANTADM_INTERNAL_URL",
                defaults.tenantadm_internal_url,
            ),
            deviceauth_internal_url: env_string(
                "MENDER_DEVICEAUTH_INTERNAL_URL",
                defaults.deviceauth_internal_url,
            ),
            accept_invalid_certs: env_bool("MENDER_ACCEPT_INVALID_CERTS", defaults.accept_invalid_certs),
            request_timeout_seconds: env_parse(
                "MENDER_REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        }
    }
}

/// Mock SMTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SmtpConfig {
    /// Address the mock binds; the backend's mailer is pointed at it
    #[validate(length(min = 1, message = "SMTP bind address cannot be empty"))]
    pub bind_address: String,

    /// Sender address the backend uses for outbound mail
    #[validate(email(message = "Sender must be an email address"))]
    pub sender: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4444".to_string(),
            sender: "contact@mender.io".to_string(),
        }
    }
}

impl SmtpConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env_string("MENDER_SMTP_MOCK_ADDR", defaults.bind_address),
            sender: env_string("MENDER_SMTP_SENDER", defaults.sender),
        }
    }
}

/// SSH accessible devices
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeviceConfig {
    /// `host:port` of each device's SSH server
    pub hosts: Vec<String>,

    /// Remote SSH user
    #[validate(length(min = 1, message = "SSH user cannot be empty"))]
    pub user: String,

    /// Address on the virtual network the devices can reach us at
    pub host_ip: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { hosts: vec!["localhost:8822".to_string()], user: "root".to_string(), host_ip: None }
    }
}

impl DeviceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let hosts = std::env::var("MENDER_DEVICE_HOSTS")
            .map(|s| {
                s.split(',').map(str::trim).filter(|h| !h.is_empty()).map(String::from).collect()
            })
            .unwrap_or(defaults.hosts);

        Self {
            hosts,
            user: env_string("MENDER_DEVICE_USER", defaults.user),
            host_ip: std::env::var("MENDER_HOST_IP").ok(),
        }
    }
}

/// How service CLIs are reached for schema migrations
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MigrationConfig {
    /// Command prepended to every invocation, e.g. `docker exec`
    pub command_prefix: Vec<String>,

    /// Container name per service; services not listed use `mender-<service>`
    pub containers: BTreeMap<String, String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            command_prefix: vec!["docker".to_string(), "exec".to_string()],
            containers: BTreeMap::new(),
        }
    }
}

impl MigrationConfig {
    /// Container running `service`
    pub fn container_for(&self, service: Service) -> String {
        self.containers
            .get(service.as_str())
            .cloned()
            .unwrap_or_else(|| format!("mender-{}", service.as_str()))
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let command_prefix = std::env::var("MENDER_MIGRATION_PREFIX")
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or(defaults.command_prefix);

        let mut containers = BTreeMap::new();
        for service in Service::ALL {
            let key = format!("MENDER_CONTAINER_{}", service.as_str().to_uppercase());
            if let Ok(name) = std::env::var(&key) {
                containers.insert(service.as_str().to_string(), name);
            }
        }

        Self { command_prefix, containers }
    }
}

/// Poll timeout tiers in seconds
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TimeoutConfig {
    #[validate(range(min = 1, max = 3600, message = "Mail timeout must be between 1 and 3600 seconds"))]
    pub mail_delivery_seconds: u64,

    #[validate(range(min = 1, max = 3600, message = "Provisioning timeout must be between 1 and 3600 seconds"))]
    pub provisioning_seconds: u64,

    #[validate(range(min = 1, max = 7200, message = "Deployment timeout must be between 1 and 7200 seconds"))]
    pub deployment_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            mail_delivery_seconds: crate::poll::MAIL_DELIVERY_TIMEOUT.as_secs(),
            provisioning_seconds: crate::poll::ORGANIZATION_PROVISIONING_TIMEOUT.as_secs(),
            deployment_seconds: crate::poll::DEPLOYMENT_TIMEOUT.as_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn mail_delivery(&self) -> Duration {
        Duration::from_secs(self.mail_delivery_seconds)
    }

    pub fn provisioning(&self) -> Duration {
        Duration::from_secs(self.provisioning_seconds)
    }

    pub fn deployment(&self) -> Duration {
        Duration::from_secs(self.deployment_seconds)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mail_delivery_seconds: env_parse(
                "MENDER_MAIL_TIMEOUT_SECONDS",
                defaults.mail_delivery_seconds,
            ),
            provisioning_seconds: env_parse(
                "MENDER_PROVISIONING_TIMEOUT_SECONDS",
                defaults.provisioning_seconds,
            ),
            deployment_seconds: env_parse(
                "MENDER_DEPLOYMENT_TIMEOUT_SECONDS",
                defaults.deployment_seconds,
            ),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: env_string("MENDER_E2E_LOG_LEVEL", defaults.level),
            json: env_bool("MENDER_E2E_LOG_JSON", defaults.json),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|s| s.to_lowercase() == "true" || s == "1").unwrap_or(default)
}
