//! # Users
//!
//! Login, email verification and two-factor authentication against the
//! useradm management API. Every function takes a client bound to the useradm
//! base URL; authenticated calls expect a client built with
//! [`ApiClient::with_auth`].
//!
//! Most calls hand back the raw [`ApiResponse`] because the scenarios assert
//! on refusals (403 before email verification, 401 without a TOTP code) as
//! much as on successes.

pub mod qr;
pub mod totp;

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::api::endpoints::useradm::*;
use crate::api::{ApiClient, ApiResponse, RequestOptions, TfaQr, TfaStatus, User};
use crate::errors::{Error, Result};
use crate::poll::{await_condition, PollPolicy, Probe};

pub use qr::decode_qr_png;
pub use totp::Totp;

/// Email and password of a backend user
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into() }
    }
}

/// `POST /auth/login` with basic credentials and an optional TOTP code.
///
/// On 200 the body is the session token.
pub async fn login(
    client: &ApiClient,
    credentials: &Credentials,
    totp: Option<&str>,
) -> Result<ApiResponse> {
    let body = match totp {
        Some(code) => json!({ "token2fa": code }),
        None => json!({}),
    };
    client
        .call(
            Method::POST,
            URL_LOGIN,
            RequestOptions::new()
                .basic_auth(&credentials.email, &credentials.password)
                .json(body),
        )
        .await
}

/// Classify one login attempt. Only 200 ends the wait.
pub fn login_probe(response: &ApiResponse) -> Probe<String> {
    if response.status == StatusCode::OK {
        Probe::Ready(response.text())
    } else {
        Probe::Pending
    }
}

/// Retry login until the user exists and can authenticate; returns the token.
///
/// Users of a freshly signed-up organization are created by an asynchronous
/// job, so 401 and 404 are expected for a while.
pub async fn wait_for_login(
    client: &ApiClient,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<String> {
    let policy = PollPolicy::new(format!("user {} to be able to log in", credentials.email), timeout);

    let token = await_condition(&policy, || async move {
        let response = login(client, credentials, None).await?;
        debug!(email = %credentials.email, status = %response.status, "login attempt");
        Ok(login_probe(&response))
    })
    .await?;

    info!(email = %credentials.email, "user logged in");
    Ok(token)
}

/// Log in once and fail unless the backend answers 200
pub async fn login_token(client: &ApiClient, credentials: &Credentials) -> Result<String> {
    let response = login(client, credentials, None)
        .await?
        .expect_status(StatusCode::OK, &format!("login as {}", credentials.email))?;
    Ok(response.text())
}

/// Add a user to the caller's organization (201)
pub async fn create_user(client: &ApiClient, credentials: &Credentials) -> Result<()> {
    client
        .post(
            URL_USERS,
            json!({ "email": credentials.email, "password": credentials.password }),
        )
        .await?
        .expect_status(StatusCode::CREATED, &format!("create user {}", credentials.email))?;
    Ok(())
}

/// Ask the backend to mail a verification link (202)
pub async fn start_email_verification(client: &ApiClient, email: &str) -> Result<()> {
    client
        .post(URL_VERIFY_EMAIL_START, json!({ "email": email }))
        .await?
        .expect_status(StatusCode::ACCEPTED, "start email verification")?;
    Ok(())
}

/// Confirm an address with the secret from the verification link (204)
pub async fn complete_email_verification(client: &ApiClient, secret_hash: &str) -> Result<()> {
    client
        .post(URL_VERIFY_EMAIL_COMPLETE, json!({ "secret_hash": secret_hash }))
        .await?
        .expect_status(StatusCode::NO_CONTENT, "complete email verification")?;
    Ok(())
}

lazy_static! {
    static ref ACTIVATION_LINK: Regex =
        Regex::new(r"https://hosted\.mender\.io/ui/#/activate/([a-z0-9\-]+)")
            .expect("ACTIVATION_LINK should be a valid regex pattern");
}

/// Secret hash from the activation link in a verification mail
pub fn extract_activation_secret(body: &str) -> Result<String> {
    ACTIVATION_LINK
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::assertion("verification mail contains no activation link"))
}

/// Enable or disable 2FA for `user_id` (`"me"` for the caller)
pub async fn toggle_tfa(client: &ApiClient, user_id: &str, on: bool) -> Result<ApiResponse> {
    let path = if on { URL_2FA_ENABLE } else { URL_2FA_DISABLE };
    client.call(Method::POST, path, RequestOptions::new().path_param("id", user_id)).await
}

/// `GET /2faqr`; only answers 200 while 2FA is unverified
pub async fn tfa_qr(client: &ApiClient) -> Result<ApiResponse> {
    client.get(URL_2FAQR).await
}

/// Fetch the enrolment QR code and build a generator from its secret
pub async fn tfa_generator(client: &ApiClient) -> Result<Totp> {
    let qr: TfaQr = tfa_qr(client).await?.expect_status(StatusCode::OK, "get 2FA QR code")?.json()?;
    let uri = decode_qr_png(&qr.qr)?;
    Totp::from_uri(&uri)
}

/// `PUT /2faverify` with a TOTP code
pub async fn verify_tfa(client: &ApiClient, code: &str) -> Result<ApiResponse> {
    client.put(URL_2FAVERIFY, json!({ "token2fa": code })).await
}

pub async fn get_user(client: &ApiClient, user_id: &str) -> Result<User> {
    client
        .call(Method::GET, URL_USERS_ID, RequestOptions::new().path_param("id", user_id))
        .await?
        .expect_status(StatusCode::OK, &format!("get user {user_id}"))?
        .json()
}

/// Fail unless `user_id` reports the given 2FA state
pub async fn assert_tfa_status(client: &ApiClient, user_id: &str, expected: TfaStatus) -> Result<()> {
    let user = get_user(client, user_id).await?;
    match user.tfa_status {
        Some(status) if status == expected => Ok(()),
        other => Err(Error::assertion(format!(
            "user {} has 2FA status {:?}, expected {expected}",
            user.email, other
        ))),
    }
}

/// Legacy per-user `<id>_2fa` settings body. The backend must ignore it.
pub fn tfa_settings(statuses: &[(&str, TfaStatus)]) -> Value {
    let settings: Map<String, Value> = statuses
        .iter()
        .map(|(id, status)| (format!("{id}_2fa"), Value::String(status.to_string())))
        .collect();
    Value::Object(settings)
}

pub async fn post_settings(client: &ApiClient, settings: Value) -> Result<ApiResponse> {
    client.post(URL_SETTINGS, settings).await
}
