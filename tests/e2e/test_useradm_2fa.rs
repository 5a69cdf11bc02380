//! Two-factor authentication over two enterprise tenants
//!
//! Enabling 2FA for one user must not affect other users, of the same tenant
//! or another one, and legacy per-user settings must be ignored.

use reqwest::StatusCode;

use mender_e2e::api::{Service, TfaStatus};
use mender_e2e::smtp::await_mail;
use mender_e2e::users::{
    assert_tfa_status, complete_email_verification, extract_activation_secret, login,
    post_settings, start_email_verification, tfa_generator, tfa_qr, tfa_settings, toggle_tfa,
    verify_tfa, Credentials,
};
use mender_e2e::{HarnessOptions, TestHarness};

use crate::common::{add_user, create_org, unique_email, unique_org_name, TestTenant, TEST_PASSWORD};

struct TenantWithUsers {
    tenant: TestTenant,
    second: Credentials,
}

async fn setup(harness: &TestHarness) -> Vec<TenantWithUsers> {
    let mut tenants = Vec::new();
    for _ in 0..2 {
        let owner = Credentials::new(unique_email(None), TEST_PASSWORD);
        let tenant = create_org(harness, &unique_org_name(), owner, Some("enterprise"))
            .await
            .expect("organization should be created");

        harness.migrate(Service::Useradm, Some(&tenant.tenant.id)).await.unwrap();

        let second = Credentials::new(unique_email(Some("user2")), TEST_PASSWORD);
        add_user(harness, &tenant, &second).await.expect("second user should log in");
        tenants.push(TenantWithUsers { tenant, second });
    }
    tenants
}

#[tokio::test]
#[ignore = "requires RUN_E2E=1"]
async fn test_useradm_2fa_enable_disable() {
    let harness = TestHarness::start(
        HarnessOptions::new("test_useradm_2fa_enable_disable")
            .with_smtp()
            .with_migrations(&[Service::Tenantadm]),
    )
    .await
    .expect("Failed to start harness");

    let tenants = setup(&harness).await;
    let useradm = harness.management(Service::Useradm).unwrap();
    let user_2fa = &tenants[0].tenant.owner;
    let user_no_2fa = &tenants[0].second;

    let r = login(&useradm, user_2fa, None).await.unwrap();
    assert_eq!(r.status, StatusCode::OK);
    let uadm = useradm.with_auth(r.text());

    // Unverified email: 2FA settings are off limits
    for on in [true, false] {
        let r = toggle_tfa(&uadm, "me", on).await.unwrap();
        assert_eq!(r.status, StatusCode::FORBIDDEN);
    }
    // QR code only exists while 2FA is unverified
    assert_eq!(tfa_qr(&uadm).await.unwrap().status, StatusCode::BAD_REQUEST);

    start_email_verification(&useradm, &user_2fa.email).await.unwrap();
    let messages = await_mail(harness.mailbox().unwrap(), &user_2fa.email, harness.config.timeouts.mail_delivery())
        .await
        .expect("verification mail should arrive");
    let secret = extract_activation_secret(&messages[0].text()).unwrap();
    complete_email_verification(&useradm, &secret).await.unwrap();

    // Enabled but unverified: plain login still works
    assert_eq!(toggle_tfa(&uadm, "me", true).await.unwrap().status, StatusCode::OK);
    assert_eq!(login(&useradm, user_2fa, None).await.unwrap().status, StatusCode::OK);
    assert_tfa_status(&uadm, "me", TfaStatus::Unverified).await.unwrap();

    let totp = tfa_generator(&uadm).await.unwrap();
    let code = totp.now().unwrap();
    assert_eq!(verify_tfa(&uadm, &code).await.unwrap().status, StatusCode::ACCEPTED);
    assert_tfa_status(&uadm, "me", TfaStatus::Enabled).await.unwrap();

    assert_eq!(login(&useradm, user_2fa, Some(&code)).await.unwrap().status, StatusCode::OK);
    // Enabling twice is rejected
    assert_eq!(toggle_tfa(&uadm, "me", true).await.unwrap().status, StatusCode::BAD_REQUEST);
    assert_eq!(login(&useradm, user_2fa, None).await.unwrap().status, StatusCode::UNAUTHORIZED);

    // Another user cannot switch it off
    let r = login(&useradm, user_no_2fa, None).await.unwrap();
    assert_eq!(r.status, StatusCode::OK);
    let other = useradm.with_auth(r.text());
    let user_2fa_id = mender_e2e::users::get_user(&uadm, "me").await.unwrap().id;
    assert_eq!(
        toggle_tfa(&other, &user_2fa_id, false).await.unwrap().status,
        StatusCode::UNAUTHORIZED
    );
    assert_tfa_status(&uadm, "me", TfaStatus::Enabled).await.unwrap();

    // Everyone else logs in without a code
    for user in [user_no_2fa, &tenants[1].tenant.owner, &tenants[1].second] {
        assert_eq!(login(&useradm, user, None).await.unwrap().status, StatusCode::OK);
    }

    assert_eq!(toggle_tfa(&uadm, "me", false).await.unwrap().status, StatusCode::OK);
    assert_eq!(login(&useradm, user_2fa, None).await.unwrap().status, StatusCode::OK);
    assert_tfa_status(&uadm, "me", TfaStatus::Disabled).await.unwrap();

    // Legacy settings keys are stored but change nothing
    let other_id = mender_e2e::users::get_user(&other, "me").await.unwrap().id;
    let settings = tfa_settings(&[
        (user_2fa_id.as_str(), TfaStatus::Enabled),
        (other_id.as_str(), TfaStatus::Enabled),
    ]);
    assert_eq!(post_settings(&uadm, settings).await.unwrap().status, StatusCode::CREATED);
    assert_tfa_status(&uadm, "me", TfaStatus::Disabled).await.unwrap();

    harness.shutdown().await;
}
