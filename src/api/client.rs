//! HTTP client for the backend APIs
//!
//! A thin layer over `reqwest` that mirrors how scenarios talk to the
//! backend: every call returns the raw status and body, and the caller decides
//! what an unexpected status means. Probes rely on this, since a 401 during
//! login propagation is a reason to keep waiting rather than an error.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, Instrument};

use crate::errors::{Error, Result};

/// Client construction options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-request timeout
    pub timeout: Duration,
    /// Accept self-signed certificates (test gateways use them)
    pub accept_invalid_certs: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), accept_invalid_certs: true }
    }
}

impl From<&crate::config::BackendConfig> for ClientOptions {
    fn from(config: &crate::config::BackendConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }
}

/// File attached as a multipart form field
#[derive(Debug, Clone)]
pub struct MultipartFile {
    pub field: String,
    pub file_name: String,
    pub content: Vec<u8>,
    pub mime: String,
}

/// Per-call request parameters
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    path_params: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<Value>,
    form: Option<Value>,
    basic_auth: Option<(String, String)>,
    file: Option<MultipartFile>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitute `{name}` in the path
    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// URL-encoded form body, as submitted by the sign-up page
    pub fn form(mut self, body: Value) -> Self {
        self.form = Some(body);
        self
    }

    /// Basic credentials; take precedence over the client's bearer token
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    pub fn file(mut self, file: MultipartFile) -> Self {
        self.file = Some(file);
        self
    }
}

/// Status, headers and body of one call
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Last path segment of the `Location` header, i.e. the created resource id
    pub fn location_id(&self) -> Option<String> {
        let location = self.headers.get(LOCATION)?.to_str().ok()?;
        location.trim_end_matches('/').rsplit('/').next().map(str::to_string)
    }

    /// Fail unless the status is `expected`
    pub fn expect_status(self, expected: StatusCode, context: &str) -> Result<Self> {
        if self.status == expected {
            Ok(self)
        } else {
            Err(Error::unexpected_status(context, self.status, self.text()))
        }
    }
}

/// Client bound to one service base URL
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client with default options
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_options(base_url, &ClientOptions::default())
    }

    pub fn with_options(base_url: impl Into<String>, options: &ClientOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()?;

        Ok(Self { client, base_url: base_url.into(), token: None })
    }

    /// Copy of this client that sends `token` as a bearer credential
    pub fn with_auth(&self, token: impl Into<String>) -> Self {
        Self { client: self.client.clone(), base_url: self.base_url.clone(), token: Some(token.into()) }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for `path` with `{name}` placeholders substituted
    pub fn url(&self, path: &str, path_params: &[(String, String)]) -> String {
        let mut path = path.to_string();
        for (name, value) in path_params {
            path = path.replace(&format!("{{{name}}}"), value);
        }
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Perform one request.
    ///
    /// Any status is returned as `Ok`; only transport failures are errors.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        let url = self.url(path, &options.path_params);
        let span = crate::api_span!(method, url);

        async move {
            let mut request = self.client.request(method.clone(), &url);

            if !options.query.is_empty() {
                request = request.query(&options.query);
            }
            request = match (&options.basic_auth, &self.token) {
                (Some((user, password)), _) => request.basic_auth(user, Some(password)),
                (None, Some(token)) => request.bearer_auth(token),
                (None, None) => request,
            };
            if let Some(body) = &options.body {
                request = request.json(body);
            }
            if let Some(form) = &options.form {
                request = request.form(form);
            }
            if let Some(file) = options.file {
                let part = Part::bytes(file.content).file_name(file.file_name).mime_str(&file.mime)?;
                request = request.multipart(Form::new().part(file.field, part));
            }

            let response = request.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;

            tracing::Span::current().record("status", status.as_u16());
            debug!(%status, bytes = body.len(), "response received");

            Ok(ApiResponse { status, headers, body })
        }
        .instrument(span)
        .await
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.call(Method::GET, path, RequestOptions::new()).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.call(Method::POST, path, RequestOptions::new().json(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.call(Method::PUT, path, RequestOptions::new().json(body)).await
    }
}
