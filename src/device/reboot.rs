//! Reboot detection
//!
//! Devices ship a `mender-reboot-detector` service that connects to a
//! configured `ip:port` and sends `shutdown` when going down and `startup`
//! once back up. The detector listens on an ephemeral port, points the
//! device's service at it, and counts those messages.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info};

use super::{RemoteShell, RunOptions};
use crate::errors::{Error, Result};

/// Where the device's detector service reads the address to report to
pub const REBOOT_DETECTOR_CONFIG: &str = "/data/mender/test.mender-reboot-detector.txt";

pub const REBOOT_DETECTOR_SERVICE: &str = "mender-reboot-detector";

/// Default wait for a device to reboot
pub const REBOOT_WAIT: Duration = Duration::from_secs(60 * 60);

/// One detector message is a single short word per connection
pub(crate) const MAX_MESSAGE_LEN: usize = 4096;

/// Listens for reboot notifications from one device.
///
/// Call [`finish`](Self::finish) when done so the device's detector service
/// is stopped and its configuration removed.
pub struct RebootDetector<'a, S: RemoteShell> {
    shell: &'a S,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
}

impl<S: RemoteShell> std::fmt::Debug for RebootDetector<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebootDetector")
            .field("device", &self.shell.host_string())
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

impl<'a, S: RemoteShell> RebootDetector<'a, S> {
    /// Bind `host_ip:0`, tell the device where to report, and restart its
    /// detector service
    pub async fn start(shell: &'a S, host_ip: &str) -> Result<Self> {
        let listener = TcpListener::bind((host_ip, 0)).await?;
        let local_addr = listener.local_addr()?;

        let mut config = tempfile::NamedTempFile::new()?;
        write!(config, "{}:{}", host_ip, local_addr.port())?;
        config.flush()?;

        shell.put(config.path(), REBOOT_DETECTOR_CONFIG).await?;
        shell
            .run(&format!("systemctl restart {REBOOT_DETECTOR_SERVICE}"), RunOptions::default())
            .await?;

        info!(device = %shell.host_string(), addr = %local_addr, "reboot detector listening");
        Ok(Self { shell, listener: Some(listener), local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for `number_of_reboots` completed reboots within `max_wait`
    pub async fn verify_reboot_performed(
        &mut self,
        max_wait: Duration,
        number_of_reboots: u32,
    ) -> Result<()> {
        info!(number_of_reboots, "waiting for device to reboot");
        if self.observe(max_wait, number_of_reboots).await? {
            Ok(())
        } else {
            Err(Error::Timeout {
                awaited: format!("device to reboot {number_of_reboots} time(s)"),
                waited: max_wait,
                attempts: 1,
            })
        }
    }

    /// Check that the device does not reboot within `wait`
    pub async fn verify_reboot_not_performed(&mut self, wait: Duration) -> Result<()> {
        info!(wait_secs = wait.as_secs(), "checking that device does not reboot");
        if self.observe(wait, 1).await? {
            Err(Error::assertion("device unexpectedly rebooted"))
        } else {
            Ok(())
        }
    }

    /// Count reboots until `number_of_reboots` or the deadline; `false` on
    /// timeout
    async fn observe(&mut self, max_wait: Duration, number_of_reboots: u32) -> Result<bool> {
        let listener =
            self.listener.as_ref().ok_or_else(|| Error::config("reboot detector already finished"))?;
        let deadline = Instant::now() + max_wait;
        let mut tracker = RebootTracker::default();

        loop {
            let (mut connection, peer) = match timeout_at(deadline, listener.accept()).await {
                Ok(accepted) => accepted?,
                Err(_) => {
                    info!(max_wait_secs = max_wait.as_secs(), "device did not reboot in time");
                    return Ok(false);
                }
            };

            let mut raw = [0u8; MAX_MESSAGE_LEN];
            let read = match timeout_at(deadline, connection.read(&mut raw)).await {
                Ok(read) => read?,
                Err(_) => {
                    info!(%peer, max_wait_secs = max_wait.as_secs(), "device connected but sent nothing in time");
                    return Ok(false);
                }
            };
            let message = String::from_utf8_lossy(&raw[..read]).trim().to_string();
            if message.is_empty() {
                debug!(%peer, "reboot detector connection closed without a message");
                continue;
            }
            debug!(%peer, %message, "reboot detector message");

            if tracker.record(&message)? >= number_of_reboots {
                info!(reboots = tracker.reboots, "device rebooted");
                return Ok(true);
            }
        }
    }

    /// Stop listening, then stop the device's detector service and remove its
    /// configuration
    pub async fn finish(mut self) -> Result<()> {
        self.listener = None;
        let cmd = format!(
            "systemctl stop {REBOOT_DETECTOR_SERVICE} ; rm -f {REBOOT_DETECTOR_CONFIG}"
        );
        self.shell.run(&cmd, RunOptions::default()).await.map_err(|e| {
            error!(device = %self.shell.host_string(), error = %e, "unable to stop reboot detector");
            e
        })?;
        Ok(())
    }
}

/// Up/down state machine over detector messages
#[derive(Debug)]
struct RebootTracker {
    up: bool,
    reboots: u32,
}

impl Default for RebootTracker {
    fn default() -> Self {
        Self { up: true, reboots: 0 }
    }
}

impl RebootTracker {
    /// Apply one message and return the reboot count so far
    fn record(&mut self, message: &str) -> Result<u32> {
        match message {
            "shutdown" => {
                if !self.up {
                    return Err(Error::assertion("received shutdown while already shut down"));
                }
                self.up = false;
            }
            // A spontaneous reboot may skip the shutdown message
            "startup" => {
                self.up = true;
                self.reboots += 1;
            }
            other => {
                return Err(Error::assertion(format!(
                    "unexpected message '{other}' from {REBOOT_DETECTOR_SERVICE}"
                )));
            }
        }
        Ok(self.reboots)
    }
}
