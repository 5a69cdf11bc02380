//! Shared scenario setup
//!
//! - Unique organization and user names so reruns do not collide
//! - Organization sign-up followed by the waits the backend needs
//! - Authorized API clients for a logged-in user
//! - Open source and enterprise variants of the device scenarios' first user

use anyhow::Context;
use tracing::info;
use uuid::Uuid;

use mender_e2e::api::{ApiClient, NewOrganization, Service, Tenant};
use mender_e2e::device::DeviceGroup;
use mender_e2e::migrate::MigrationCli;
use mender_e2e::tenants::{create_organization, list_tenants_internal, SignupOutcome};
use mender_e2e::users::{create_user, login_token, wait_for_login, Credentials};
use mender_e2e::{HarnessOptions, TestHarness};

pub const TEST_PASSWORD: &str = "correcthorse";

/// `ci.email.tests+<uuid>@mender.io`, optionally with a suffix before the `@`
pub fn unique_email(suffix: Option<&str>) -> String {
    let id = Uuid::new_v4();
    match suffix {
        Some(suffix) => format!("ci.email.tests+{id}-{suffix}@mender.io"),
        None => format!("ci.email.tests+{id}@mender.io"),
    }
}

pub fn unique_org_name() -> String {
    format!("test.mender.io-{}", Uuid::new_v4())
}

/// A signed-up organization and its first user
#[derive(Debug)]
pub struct TestTenant {
    pub tenant: Tenant,
    pub owner: Credentials,
    pub token: String,
}

impl TestTenant {
    /// Management client for `service` authorized as the owner
    pub fn client(&self, harness: &TestHarness, service: Service) -> anyhow::Result<ApiClient> {
        Ok(harness.management(service)?.with_auth(&self.token))
    }
}

/// Sign up an organization and wait until its owner can log in
pub async fn create_org(
    harness: &TestHarness,
    name: &str,
    owner: Credentials,
    plan: Option<&str>,
) -> anyhow::Result<TestTenant> {
    let mut signup = NewOrganization::new(name, &owner.email, &owner.password);
    if let Some(plan) = plan {
        signup = signup.with_plan(plan);
    }

    let tenantadm = harness.management(Service::Tenantadm)?;
    let outcome = create_organization(&tenantadm, &signup).await?;
    anyhow::ensure!(outcome == SignupOutcome::Accepted, "sign-up of {name} rejected: {outcome:?}");

    let useradm = harness.management(Service::Useradm)?;
    let token = wait_for_login(&useradm, &owner, harness.config.timeouts.provisioning())
        .await
        .with_context(|| format!("owner of {name} never became able to log in"))?;

    let tenants = list_tenants_internal(&harness.internal(Service::Tenantadm)?).await?;
    let tenant = tenants
        .into_iter()
        .find(|t| t.name == name)
        .with_context(|| format!("tenant {name} missing from tenantadm"))?;

    info!(tenant_id = %tenant.id, name, "organization ready");
    Ok(TestTenant { tenant, owner, token })
}

/// Add a user to the tenant and wait until it can log in
pub async fn add_user(
    harness: &TestHarness,
    tenant: &TestTenant,
    user: &Credentials,
) -> anyhow::Result<String> {
    create_user(&tenant.client(harness, Service::Useradm)?, user).await?;
    let useradm = harness.management(Service::Useradm)?;
    Ok(wait_for_login(&useradm, user, harness.config.timeouts.provisioning()).await?)
}

/// Which flavour of the backend a device scenario runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edition {
    /// Single tenant; the user is created through the useradm CLI
    OpenSource,
    /// Multi tenant; the user signs up an organization and the devices are
    /// given its tenant token
    Enterprise,
}

impl Edition {
    /// Harness options with the migrations this edition's setup needs
    pub fn harness_options(self, test_name: &str) -> HarnessOptions {
        match self {
            Edition::OpenSource => {
                HarnessOptions::new(test_name).with_migrations(&[Service::Useradm])
            }
            Edition::Enterprise => HarnessOptions::new(test_name)
                .with_migrations(&[Service::Tenantadm, Service::Useradm]),
        }
    }
}

/// Create the scenario's user, hand the devices whatever they need to
/// connect, and return the user's token
pub async fn setup_device_owner(
    harness: &TestHarness,
    edition: Edition,
    devices: &DeviceGroup,
) -> anyhow::Result<String> {
    let owner = Credentials::new("test@mender.io", TEST_PASSWORD);
    match edition {
        Edition::OpenSource => {
            MigrationCli::new(Service::Useradm, &harness.config.migration)
                .create_user(&owner.email, &owner.password)
                .await
                .context("creating user through useradm CLI")?;
            let useradm = harness.management(Service::Useradm)?;
            Ok(login_token(&useradm, &owner).await?)
        }
        Edition::Enterprise => {
            let org = create_org(harness, "Mender", owner, None).await?;
            let tenant_token = org
                .tenant
                .tenant_token
                .as_deref()
                .context("tenantadm returned no tenant token")?;
            devices.set_tenant_token(tenant_token).await?;
            Ok(org.token)
        }
    }
}
