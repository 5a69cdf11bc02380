//! # mender-e2e
//!
//! End-to-end harness for a multi-tenant device management backend and the
//! OTA client running on its devices.
//!
//! The backend is eventually consistent: a freshly signed-up user cannot log
//! in straight away, inventory lags behind device reports, deployments take
//! minutes to finish and mail arrives whenever the mailer gets to it. Every
//! such wait goes through one primitive, [`poll::await_condition`], driven by
//! tri-state probes and bounded by a timeout tier.
//!
//! ## Architecture
//!
//! ```text
//! scenarios (tests/e2e) → TestHarness → api::ApiClient  → backend services
//!                              │      → smtp::SmtpServerMock ← backend mailer
//!                              │      → device::Device (ssh/scp) → devices
//!                              └──────→ migrate / artifact (external CLIs)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use mender_e2e::api::Service;
//! use mender_e2e::harness::{HarnessOptions, TestHarness};
//! use mender_e2e::users::{wait_for_login, Credentials};
//! use std::time::Duration;
//!
//! # async fn scenario() -> anyhow::Result<()> {
//! let harness = TestHarness::start(HarnessOptions::new("login").with_smtp()).await?;
//! let useradm = harness.management(Service::Useradm)?;
//! let credentials = Credentials::new("user@example.com", "correcthorse");
//! let _token = wait_for_login(&useradm, &credentials, Duration::from_secs(180)).await?;
//! harness.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod artifact;
pub mod cli;
pub mod config;
pub mod deployments;
pub mod device;
pub mod devices;
pub mod errors;
pub mod harness;
pub mod migrate;
pub mod observability;
pub mod poll;
pub mod process;
pub mod smtp;
pub mod tenants;
pub mod users;

// Re-export commonly used types and traits
pub use config::HarnessConfig;
pub use errors::{Error, Result};
pub use harness::{HarnessOptions, TestHarness};
pub use poll::{await_condition, PollPolicy, Probe};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
