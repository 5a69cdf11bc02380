//! # Error Handling
//!
//! Error types for the e2e harness using `thiserror`.
//!
//! The poller distinguishes three failure kinds: a deadline that expired while
//! the awaited condition was still pending ([`Error::Timeout`]), a probe that
//! observed a state which cannot resolve by waiting ([`Error::PermanentFailure`]),
//! and anything that went wrong while performing the observation itself
//! (transport, decoding, I/O). Only the first is produced by the poll loop;
//! the latter two are passed through untouched.

use std::time::Duration;

use reqwest::StatusCode;

/// Custom result type for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Deadline passed while the condition stayed unsatisfied
    #[error("timeout waiting for {awaited} (gave up after {waited:?}, {attempts} attempts)")]
    Timeout { awaited: String, waited: Duration, attempts: u32 },

    /// A probe saw a state that more waiting cannot fix
    #[error("{awaited}: {reason}")]
    PermanentFailure { awaited: String, reason: String },

    /// Transport level HTTP failures
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A response whose status the caller did not expect
    #[error("{context}: unexpected status {status}: {body}")]
    UnexpectedStatus { context: String, status: StatusCode, body: String },

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External tool exited unsuccessfully
    #[error("command `{command}` failed ({status}): {stderr}")]
    Command { command: String, status: String, stderr: String },

    /// Mock SMTP server errors
    #[error("SMTP mock error: {0}")]
    Smtp(String),

    /// Remote device control errors
    #[error("SSH error on {host}: {message}")]
    Ssh { host: String, message: String },

    /// A post-poll check on the observed state did not hold
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl Error {
    /// Create a permanent failure for the named wait
    pub fn permanent<A: Into<String>, R: Into<String>>(awaited: A, reason: R) -> Self {
        Self::PermanentFailure { awaited: awaited.into(), reason: reason.into() }
    }

    /// Create an unexpected status error
    pub fn unexpected_status<C: Into<String>, B: Into<String>>(
        context: C,
        status: StatusCode,
        body: B,
    ) -> Self {
        Self::UnexpectedStatus { context: context.into(), status, body: body.into() }
    }

    /// Create an assertion error
    pub fn assertion<S: Into<String>>(message: S) -> Self {
        Self::Assertion(message.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new SMTP error
    pub fn smtp<S: Into<String>>(message: S) -> Self {
        Self::Smtp(message.into())
    }

    /// Create a new SSH error
    pub fn ssh<H: Into<String>, M: Into<String>>(host: H, message: M) -> Self {
        Self::Ssh { host: host.into(), message: message.into() }
    }

    /// Whether this error came from the deadline expiring
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error is a permanent failure reported by a probe
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::PermanentFailure { .. })
    }
}
