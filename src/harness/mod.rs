//! # Test Harness
//!
//! Single entry point for live-system scenarios:
//! - Configuration and logging
//! - Service schema migrations
//! - The mock SMTP server the backend's mailer is pointed at
//! - API clients for management and internal endpoints
//! - SSH access to the devices under test
//!
//! Live scenarios only run with `RUN_E2E=1`; [`TestHarness::start`] bails out
//! otherwise so that an accidental `--ignored` run fails loudly instead of
//! hammering whatever the default URLs resolve to.

use anyhow::Context;
use tracing::{info, warn};

use crate::api::{ApiClient, ClientOptions, Service, ServiceUrls};
use crate::config::HarnessConfig;
use crate::device::DeviceGroup;
use crate::migrate::MigrationCli;
use crate::observability::{init_logging, log_config_info};
use crate::smtp::{Mailbox, SmtpServerMock};

/// Environment variable gating live scenarios
pub const RUN_E2E_ENV: &str = "RUN_E2E";

/// What a scenario needs started before it runs
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Scenario name, used in logs
    pub test_name: String,
    /// Start the mock SMTP server on the configured address
    pub start_smtp: bool,
    /// Services whose migrations run before the scenario
    pub migrate: Vec<Service>,
}

impl HarnessOptions {
    pub fn new(test_name: impl Into<String>) -> Self {
        Self { test_name: test_name.into(), start_smtp: false, migrate: Vec::new() }
    }

    /// Capture outgoing mail (sign-up and verification flows)
    pub fn with_smtp(mut self) -> Self {
        self.start_smtp = true;
        self
    }

    pub fn with_migrations(mut self, services: &[Service]) -> Self {
        self.migrate.extend_from_slice(services);
        self
    }
}

/// Whether live scenarios are enabled for this run
pub fn e2e_enabled() -> bool {
    std::env::var(RUN_E2E_ENV).ok().as_deref() == Some("1")
}

/// Running scenario fixture; the SMTP mock is stopped when this is dropped
pub struct TestHarness {
    pub config: HarnessConfig,
    test_name: String,
    urls: ServiceUrls,
    client_options: ClientOptions,
    smtp: Option<SmtpServerMock>,
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("test_name", &self.test_name)
            .field("gateway", &self.urls.gateway())
            .field("smtp", &self.smtp.as_ref().map(|s| s.local_addr()))
            .finish()
    }
}

impl TestHarness {
    /// Load configuration, initialise logging, run the requested migrations
    /// and start the SMTP mock
    pub async fn start(options: HarnessOptions) -> anyhow::Result<Self> {
        if !e2e_enabled() {
            anyhow::bail!("E2E tests disabled (set {RUN_E2E_ENV}=1 to enable)");
        }

        let config = HarnessConfig::from_env().context("invalid harness configuration")?;
        Self::with_config(config, options).await
    }

    /// Start from an explicit configuration, without the `RUN_E2E` gate
    pub async fn with_config(config: HarnessConfig, options: HarnessOptions) -> anyhow::Result<Self> {
        init_logging(&config.logging);
        log_config_info(&config);
        info!(test = %options.test_name, "starting test harness");

        for service in &options.migrate {
            MigrationCli::new(*service, &config.migration)
                .migrate(None)
                .await
                .with_context(|| format!("migrating {service}"))?;
        }

        let smtp = if options.start_smtp {
            let server = SmtpServerMock::start(config.smtp.bind_address.as_str())
                .await
                .with_context(|| format!("starting SMTP mock on {}", config.smtp.bind_address))?;
            Some(server)
        } else {
            None
        };

        Ok(Self {
            urls: ServiceUrls::for_gateway(config.backend.gateway_url.clone()),
            client_options: ClientOptions::from(&config.backend),
            test_name: options.test_name,
            config,
            smtp,
        })
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Unauthenticated client for a service's management API
    pub fn management(&self, service: Service) -> anyhow::Result<ApiClient> {
        Ok(ApiClient::with_options(self.urls.management(service), &self.client_options)?)
    }

    /// Management client for the same service behind another gateway
    pub fn management_at(&self, gateway: &str, service: Service) -> anyhow::Result<ApiClient> {
        let urls = ServiceUrls::for_gateway(gateway);
        Ok(ApiClient::with_options(urls.management(service), &self.client_options)?)
    }

    /// Client for a service's internal API; only services with a configured
    /// internal address are reachable
    pub fn internal(&self, service: Service) -> anyhow::Result<ApiClient> {
        let address = match service {
            Service::Tenantadm => &self.config.backend.tenantadm_internal_url,
            Service::Deviceauth => &self.config.backend.deviceauth_internal_url,
            other => anyhow::bail!("no internal address configured for {other}"),
        };
        Ok(ApiClient::with_options(service.internal_base(address), &self.client_options)?)
    }

    /// Mailbox of the SMTP mock
    pub fn mailbox(&self) -> anyhow::Result<&Mailbox> {
        self.smtp
            .as_ref()
            .map(SmtpServerMock::mailbox)
            .context("SMTP mock not started (use HarnessOptions::with_smtp)")
    }

    /// SSH handles for every configured device
    pub fn devices(&self) -> anyhow::Result<DeviceGroup> {
        Ok(DeviceGroup::new(&self.config.devices.hosts, &self.config.devices.user)?)
    }

    /// Run one service's migrations, e.g. for a tenant created mid-scenario
    pub async fn migrate(&self, service: Service, tenant: Option<&str>) -> anyhow::Result<()> {
        MigrationCli::new(service, &self.config.migration)
            .migrate(tenant)
            .await
            .with_context(|| format!("migrating {service}"))?;
        Ok(())
    }

    /// Stop the SMTP mock and wait for its sessions to end
    pub async fn shutdown(mut self) {
        if let Some(smtp) = self.smtp.take() {
            smtp.stop().await;
        }
        info!(test = %self.test_name, "test harness stopped");
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if self.smtp.is_some() {
            // Dropping the server aborts its accept loop
            warn!(test = %self.test_name, "test harness dropped without shutdown");
        }
    }
}
