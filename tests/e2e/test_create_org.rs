//! Organization sign-up
//!
//! - Sign-up mail is sent and the owner can log in within the provisioning
//!   window
//! - Exactly one tenant exists afterwards, with the plan's device limit
//! - Duplicate names are accepted, duplicate emails conflict
//! - Unknown plans are rejected

use std::time::Duration;

use mender_e2e::api::{NewOrganization, Service};
use mender_e2e::smtp::await_mail;
use mender_e2e::tenants::{
    assert_signup_email, create_organization, expected_device_limit, max_devices_limit,
    single_tenant, SignupOutcome, DEFAULT_PLAN_DEVICE_LIMIT, PROFESSIONAL_PLAN_DEVICE_LIMIT,
};
use mender_e2e::users::{wait_for_login, Credentials};
use mender_e2e::{HarnessOptions, TestHarness};

const EMAIL: &str = "some.user@example.com";
const PASSWORD: &str = "asdfqwer1234";

async fn start(name: &str, smtp: bool) -> TestHarness {
    let mut options = HarnessOptions::new(name).with_migrations(&[Service::Tenantadm]);
    if smtp {
        options = options.with_smtp();
    }
    TestHarness::start(options).await.expect("Failed to start harness")
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_create_org_success() {
    let harness = start("test_create_org_success", true).await;
    let tenantadm = harness.management(Service::Tenantadm).unwrap();

    let signup = NewOrganization::new("tenant-foo", EMAIL, PASSWORD);
    let outcome = create_organization(&tenantadm, &signup).await.unwrap();
    assert_eq!(outcome, SignupOutcome::Accepted);

    let mailbox = harness.mailbox().unwrap();
    let messages = await_mail(mailbox, EMAIL, harness.config.timeouts.provisioning())
        .await
        .expect("sign-up mail should arrive");
    assert_signup_email(&messages, EMAIL, &harness.config.smtp.sender).unwrap();

    let useradm = harness.management(Service::Useradm).unwrap();
    let credentials = Credentials::new(EMAIL, PASSWORD);
    wait_for_login(&useradm, &credentials, Duration::from_secs(3 * 60))
        .await
        .expect("user should log in within three minutes of sign-up");

    let tenant = single_tenant(&harness.internal(Service::Tenantadm).unwrap()).await.unwrap();
    let limit = max_devices_limit(&harness.internal(Service::Deviceauth).unwrap(), &tenant.id)
        .await
        .unwrap();
    assert_eq!(limit, DEFAULT_PLAN_DEVICE_LIMIT);
    assert_eq!(limit, expected_device_limit(None));

    harness.shutdown().await;
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_create_org_success_with_plan() {
    let harness = start("test_create_org_success_with_plan", false).await;
    let tenantadm = harness.management(Service::Tenantadm).unwrap();

    let signup = NewOrganization::new("tenant-foo", EMAIL, PASSWORD).with_plan("professional");
    assert_eq!(
        create_organization(&tenantadm, &signup).await.unwrap(),
        SignupOutcome::Accepted
    );

    let useradm = harness.management(Service::Useradm).unwrap();
    wait_for_login(&useradm, &Credentials::new(EMAIL, PASSWORD), Duration::from_secs(5 * 60))
        .await
        .expect("user should log in within five minutes of sign-up");

    let tenant = single_tenant(&harness.internal(Service::Tenantadm).unwrap()).await.unwrap();
    let limit = max_devices_limit(&harness.internal(Service::Deviceauth).unwrap(), &tenant.id)
        .await
        .unwrap();
    assert_eq!(limit, PROFESSIONAL_PLAN_DEVICE_LIMIT);
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_create_org_duplicate_organization_name() {
    let harness = start("test_create_org_duplicate_organization_name", false).await;
    let tenantadm = harness.management(Service::Tenantadm).unwrap();

    let first = NewOrganization::new("tenant-foo", EMAIL, PASSWORD).with_request_id("123456");
    assert_eq!(create_organization(&tenantadm, &first).await.unwrap(), SignupOutcome::Accepted);

    let second = NewOrganization::new("tenant-foo", "some.user1@example.com", PASSWORD)
        .with_request_id("123457");
    assert_eq!(create_organization(&tenantadm, &second).await.unwrap(), SignupOutcome::Accepted);
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_create_org_duplicate_email() {
    let harness = start("test_create_org_duplicate_email", false).await;
    let tenantadm = harness.management(Service::Tenantadm).unwrap();

    let first = NewOrganization::new("tenant-foo", EMAIL, PASSWORD).with_request_id("123456");
    assert_eq!(create_organization(&tenantadm, &first).await.unwrap(), SignupOutcome::Accepted);

    let second = NewOrganization::new("tenant-foo", EMAIL, PASSWORD).with_request_id("123457");
    let outcome = create_organization(&tenantadm, &second).await.unwrap();
    assert!(matches!(outcome, SignupOutcome::Conflict(_)), "got {outcome:?}");
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_create_org_plan_invalid() {
    let harness = start("test_create_org_plan_invalid", false).await;
    let tenantadm = harness.management(Service::Tenantadm).unwrap();

    let signup = NewOrganization::new("tenant-foo", EMAIL, PASSWORD).with_plan("foo");
    let outcome = create_organization(&tenantadm, &signup).await.unwrap();
    assert!(matches!(outcome, SignupOutcome::Invalid(_)), "got {outcome:?}");
}
