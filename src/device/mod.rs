//! # Device Control over SSH
//!
//! Emulated devices run an SSH server with password-less root login. Commands
//! are executed with the system `ssh` client and files copied with `scp`.
//! Devices reboot during updates and are slow to come up, so every command is
//! retried with exponential backoff until its wait budget is spent.

mod reboot;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::poll::{retry_with_backoff, RetryConfig};
use crate::process::run_command;

pub use reboot::{RebootDetector, REBOOT_DETECTOR_CONFIG, REBOOT_DETECTOR_SERVICE, REBOOT_WAIT};

/// Default retry budget of a remote command
pub const DEFAULT_RUN_WAIT: Duration = Duration::from_secs(25 * 60);

/// Default wait for a device's SSH server to come up
pub const SSH_OPEN_WAIT: Duration = Duration::from_secs(60 * 60);

/// Client configuration holding the server URL and tenant token
pub const CLIENT_CONFIG: &str = "/etc/mender/mender.conf";

/// Exit status `ssh` uses for its own failures
const SSH_CONNECTION_ERROR: i32 = 255;

const SSH_COMMON_OPTIONS: [&str; 9] = [
    "-C",
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "BatchMode=yes",
    "-o",
    "ConnectTimeout=60",
];

/// `host` or `host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostString {
    pub host: String,
    pub port: Option<u16>,
}

impl std::str::FromStr for HostString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [host] if !host.is_empty() => Ok(Self { host: host.to_string(), port: None }),
            [host, port] if !host.is_empty() => {
                let port = port
                    .parse()
                    .map_err(|_| Error::config(format!("invalid port in host string '{s}'")))?;
                Ok(Self { host: host.to_string(), port: Some(port) })
            }
            _ => Err(Error::config(format!("malformed host string '{s}'"))),
        }
    }
}

impl fmt::Display for HostString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

/// Options for [`RemoteShell::run`]
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Return output even when the command exits non-zero
    pub hide: bool,
    /// Total time to keep retrying
    pub wait: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { hide: false, wait: DEFAULT_RUN_WAIT }
    }
}

impl RunOptions {
    pub fn hidden() -> Self {
        Self { hide: true, ..Self::default() }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }
}

/// Command execution and file transfer on a remote machine
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// `host:port` the shell is connected to
    fn host_string(&self) -> String;

    /// Run `cmd` and return its standard output
    async fn run(&self, cmd: &str, options: RunOptions) -> Result<String>;

    /// Copy a local file to `remote_path`
    async fn put(&self, local: &Path, remote_path: &str) -> Result<()>;
}

/// SSH accessible device running the update client
#[derive(Debug, Clone)]
pub struct Device {
    host: HostString,
    user: String,
    ssh: String,
    scp: String,
    service_name: OnceCell<String>,
}

impl Device {
    pub fn new(host_string: &str, user: impl Into<String>) -> Result<Self> {
        Ok(Self {
            host: host_string.parse()?,
            user: user.into(),
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
            service_name: OnceCell::new(),
        })
    }

    /// Use other executables in place of `ssh` and `scp`
    pub fn with_tools(mut self, ssh: impl Into<String>, scp: impl Into<String>) -> Self {
        self.ssh = ssh.into();
        self.scp = scp.into();
        self
    }

    pub fn host(&self) -> &HostString {
        &self.host
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host.host)
    }

    fn ssh_args(&self, cmd: &str) -> Vec<String> {
        let mut args: Vec<String> = SSH_COMMON_OPTIONS.iter().map(|s| s.to_string()).collect();
        if let Some(port) = self.host.port {
            args.extend(["-p".to_string(), port.to_string()]);
        }
        args.extend([self.destination(), cmd.to_string()]);
        args
    }

    fn scp_args(&self, local: &Path, remote_path: &str) -> Vec<String> {
        let mut args: Vec<String> = SSH_COMMON_OPTIONS.iter().map(|s| s.to_string()).collect();
        // Legacy protocol; the devices' dropbear has no SFTP subsystem
        args.push("-O".to_string());
        if let Some(port) = self.host.port {
            args.extend(["-P".to_string(), port.to_string()]);
        }
        args.extend([local.display().to_string(), format!("{}:{}", self.destination(), remote_path)]);
        args
    }

    async fn run_once(&self, cmd: &str, hide: bool) -> Result<String> {
        let output = run_command(&self.ssh, self.ssh_args(cmd)).await?;
        match output.status.code() {
            Some(0) => Ok(output.stdout),
            Some(SSH_CONNECTION_ERROR) | None => Err(Error::ssh(
                self.host.to_string(),
                format!("could not connect: {}", output.stderr.trim()),
            )),
            Some(_) if hide => Ok(output.stdout),
            Some(code) => Err(Error::ssh(
                self.host.to_string(),
                format!("`{cmd}` exited with {code}: {}", output.stderr.trim()),
            )),
        }
    }

    /// Wait until the SSH server accepts connections
    pub async fn ssh_is_opened(&self, wait: Duration) -> Result<()> {
        self.run("true", RunOptions::hidden().with_wait(wait)).await?;
        info!(host = %self.host, "SSH connection established");
        Ok(())
    }

    /// Name of the installed artifact as reported by the client
    pub async fn installed_artifact(&self) -> Result<String> {
        Ok(self.run("mender show-artifact", RunOptions::hidden()).await?.trim().to_string())
    }

    /// Block device mounted as `/`
    pub async fn active_partition(&self) -> Result<String> {
        let cmd = r"mount | awk '/on \/ / { print $1}'";
        Ok(self.run(cmd, RunOptions::hidden()).await?.trim().to_string())
    }

    /// The other rootfs partition, i.e. the one of equal size that is not mounted
    pub async fn passive_partition(&self) -> Result<String> {
        let active = self.active_partition().await?;
        let cmd = format!(
            "fdisk -l | grep $(blockdev --getsz {active}) | grep -v {active} | awk '{{ print $1}}'"
        );
        Ok(self.run(&cmd, RunOptions::hidden()).await?.trim().to_string())
    }

    /// `mender` or `mender-client`, depending on the client version
    pub async fn client_service_name(&self) -> Result<&str> {
        let name = self
            .service_name
            .get_or_try_init(|| async {
                let cmd = "if test -e /lib/systemd/system/mender.service; \
                           then echo mender; else echo mender-client; fi";
                Ok::<_, Error>(self.run(cmd, RunOptions::default()).await?.trim().to_string())
            })
            .await?;
        Ok(name.as_str())
    }

    /// Point the client at an organization and restart it so it requests
    /// authorization with the new token
    pub async fn set_tenant_token(&self, token: &str) -> Result<()> {
        let current = self.run(&format!("cat {CLIENT_CONFIG}"), RunOptions::default()).await?;
        let updated = with_tenant_token(&current, token)?;

        let mut file = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(&mut file, updated.as_bytes())?;
        self.put(file.path(), CLIENT_CONFIG).await?;

        let service = self.client_service_name().await?;
        self.run(&format!("systemctl restart {service}"), RunOptions::default()).await?;
        info!(host = %self.host, "client configured with tenant token");
        Ok(())
    }

    /// Detector for reboots of this device, reporting to `host_ip`
    pub async fn reboot_detector(&self, host_ip: &str) -> Result<RebootDetector<'_, Self>> {
        RebootDetector::start(self, host_ip).await
    }
}

#[async_trait]
impl RemoteShell for Device {
    fn host_string(&self) -> String {
        self.host.to_string()
    }

    async fn run(&self, cmd: &str, options: RunOptions) -> Result<String> {
        let config = RetryConfig::with_budget(options.wait)
            .with_description(format!("`{cmd}` on {}", self.host));

        // Connection failures and non-zero exits are both retried: devices
        // are often still booting or applying an update
        let output = retry_with_backoff(
            &config,
            || self.run_once(cmd, options.hide),
            |e| matches!(e, Error::Ssh { .. }),
        )
        .await?;

        debug!(host = %self.host, cmd, bytes = output.len(), "remote command finished");
        Ok(output)
    }

    async fn put(&self, local: &Path, remote_path: &str) -> Result<()> {
        run_command(&self.scp, self.scp_args(local, remote_path)).await?.check()?;
        debug!(host = %self.host, local = %local.display(), remote_path, "file copied");
        Ok(())
    }
}

/// Client configuration `conf` with `TenantToken` set to `token`
fn with_tenant_token(conf: &str, token: &str) -> Result<String> {
    let mut value: serde_json::Value = serde_json::from_str(conf)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| Error::config(format!("{CLIENT_CONFIG} is not a JSON object")))?;
    object.insert("TenantToken".to_string(), serde_json::Value::String(token.to_string()));
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Several devices driven one after another
#[derive(Debug, Default)]
pub struct DeviceGroup {
    devices: Vec<Device>,
}

impl DeviceGroup {
    pub fn new<S: AsRef<str>>(host_strings: &[S], user: &str) -> Result<Self> {
        let devices = host_strings
            .iter()
            .map(|h| Device::new(h.as_ref(), user))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { devices })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Run `cmd` on every device; output keyed by host string
    pub async fn run(&self, cmd: &str, options: RunOptions) -> Result<BTreeMap<String, String>> {
        let mut outputs = BTreeMap::new();
        for device in &self.devices {
            let output = device.run(cmd, options).await?;
            outputs.insert(device.host_string(), output);
        }
        Ok(outputs)
    }

    pub async fn ssh_is_opened(&self, wait: Duration) -> Result<()> {
        for device in &self.devices {
            device.ssh_is_opened(wait).await?;
        }
        Ok(())
    }

    pub async fn set_tenant_token(&self, token: &str) -> Result<()> {
        for device in self.iter() {
            device.set_tenant_token(token).await?;
        }
        Ok(())
    }

    /// Service name of the first device; all devices run the same client
    pub async fn client_service_name(&self) -> Result<&str> {
        let first = self
            .devices
            .first()
            .ok_or_else(|| Error::config("device group is empty"))?;
        first.client_service_name().await
    }
}
