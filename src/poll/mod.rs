//! # Eventual-Consistency Polling
//!
//! The backend under test completes most of its work asynchronously: a new
//! tenant's first user shows up some time after the sign-up request returns,
//! devices report inventory on their own schedule, deployments run for
//! minutes. Every scenario synchronises on that state through one primitive,
//! [`await_condition`], which re-runs a probe on a fixed interval until it
//! reports [`Probe::Ready`], reports [`Probe::Failed`], or the deadline passes.
//!
//! A probe is a single observation, usually one HTTP request. Errors returned
//! by the probe itself (transport failures, undecodable bodies) abort the poll
//! as-is; only an explicit [`Probe::Pending`] leads to another attempt.
//!
//! ```rust,ignore
//! let policy = PollPolicy::new("user to be able to log in", LOGIN_PROPAGATION_TIMEOUT);
//! let token = await_condition(&policy, || async move {
//!     let rsp = client.call(Method::POST, URL_LOGIN, opts.clone()).await?;
//!     Ok(if rsp.status == StatusCode::OK { Probe::Ready(rsp.text()) } else { Probe::Pending })
//! })
//! .await?;
//! ```

pub mod backoff;

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn, Instrument};

use crate::errors::{Error, Result};

pub use backoff::{retry_with_backoff, RetryConfig};

/// Sleep between probe attempts at every call site
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Verification and notification mail reaching the mock SMTP server
pub const MAIL_DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// A freshly created user becoming able to log in
pub const LOGIN_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Asynchronous tenant sign-up jobs (welcome mail, first user)
pub const ORGANIZATION_PROVISIONING_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Devices connecting to the server and reporting inventory
pub const DEVICE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// OS image deployments reaching a terminal state
pub const DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Classification of one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// Condition holds; stop polling and hand back the payload
    Ready(T),
    /// Condition does not hold yet; sleep and try again
    Pending,
    /// Condition can never hold; stop polling with this diagnostic
    Failed(String),
}

impl<T> Probe<T> {
    /// `Ready(value)` when `cond` holds, `Pending` otherwise
    pub fn ready_if(cond: bool, value: T) -> Self {
        if cond {
            Self::Ready(value)
        } else {
            Self::Pending
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// What to wait for and for how long
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Human readable description used in logs and the timeout message
    pub awaited: String,
    /// Maximum wall-clock time to keep probing
    pub timeout: Duration,
    /// Fixed sleep between attempts
    pub interval: Duration,
}

impl PollPolicy {
    /// Poll at [`DEFAULT_INTERVAL`] for at most `timeout`
    pub fn new(awaited: impl Into<String>, timeout: Duration) -> Self {
        Self { awaited: awaited.into(), timeout, interval: DEFAULT_INTERVAL }
    }

    /// Short tier, for mail delivery
    pub fn mail_delivery(awaited: impl Into<String>) -> Self {
        Self::new(awaited, MAIL_DELIVERY_TIMEOUT)
    }

    /// Medium tier, for user and tenant provisioning
    pub fn provisioning(awaited: impl Into<String>) -> Self {
        Self::new(awaited, ORGANIZATION_PROVISIONING_TIMEOUT)
    }

    /// Long tier, for deployments
    pub fn deployment(awaited: impl Into<String>) -> Self {
        Self::new(awaited, DEPLOYMENT_TIMEOUT)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::config(format!(
                "poll timeout for '{}' must be positive",
                self.awaited
            )));
        }
        if self.interval.is_zero() {
            return Err(Error::config(format!(
                "poll interval for '{}' must be positive",
                self.awaited
            )));
        }
        Ok(())
    }
}

/// Probe until the condition holds, fails permanently, or the deadline passes.
///
/// The deadline is fixed at call time. The last sleep is clamped to the time
/// remaining, so a final probe runs at the deadline. A probe still running one
/// interval past the deadline is abandoned and the call times out, so it never
/// returns later than that. Probe errors propagate immediately.
pub async fn await_condition<T, F, Fut>(policy: &PollPolicy, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    policy.validate()?;

    let span = crate::poll_span!(&policy.awaited, policy.timeout);
    async move {
        let started = Instant::now();
        let deadline = started + policy.timeout;
        let hard_deadline = deadline + policy.interval;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let Ok(observed) = timeout_at(hard_deadline, probe()).await else {
                warn!(attempts, "probe still running one interval past the deadline");
                return Err(Error::Timeout {
                    awaited: policy.awaited.clone(),
                    waited: started.elapsed(),
                    attempts,
                });
            };
            match observed? {
                Probe::Ready(value) => {
                    debug!(attempts, elapsed_ms = started.elapsed().as_millis(), "condition satisfied");
                    return Ok(value);
                }
                Probe::Failed(reason) => {
                    warn!(attempts, reason = %reason, "condition failed permanently");
                    return Err(Error::permanent(policy.awaited.clone(), reason));
                }
                Probe::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(attempts, "deadline passed with condition still pending");
                return Err(Error::Timeout {
                    awaited: policy.awaited.clone(),
                    waited: now - started,
                    attempts,
                });
            }

            let pause = policy.interval.min(deadline - now);
            debug!(attempts, sleep_ms = pause.as_millis(), "condition pending");
            sleep(pause).await;
        }
    }
    .instrument(span)
    .await
}
