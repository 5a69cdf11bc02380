//! # Update Artifacts
//!
//! Builds `.mender` artifacts with the `mender-artifact` tool for upload to
//! the deployments service.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::info;

use crate::errors::Result;
use crate::process::run_command;

const ROOTFS_IMAGE: &str = "rootfs-image";

/// Description of an artifact to build
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub device_types: Vec<String>,
    /// Payload file content; empty for a no-op update
    pub payload: Vec<u8>,
    /// Existing payload on disk (e.g. a rootfs image), used instead of
    /// `payload`
    pub payload_file: Option<PathBuf>,
    /// `rootfs-image` or an update module name
    pub payload_type: String,
    /// State scripts bundled with the artifact (`-s`)
    pub scripts: Vec<PathBuf>,
    /// Artifact format version (`-v`); the tool's default when unset
    pub format_version: Option<u32>,
    /// Tool to invoke, `mender-artifact` unless overridden
    pub tool: String,
}

/// Built artifact; the file is removed when this is dropped
#[derive(Debug)]
pub struct ArtifactFile {
    path: PathBuf,
    _dir: TempDir,
}

impl ArtifactFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Artifact {
    pub fn new(name: impl Into<String>, device_types: &[&str], payload_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_types: device_types.iter().map(|s| s.to_string()).collect(),
            payload: Vec::new(),
            payload_file: None,
            payload_type: payload_type.into(),
            scripts: Vec::new(),
            format_version: None,
            tool: "mender-artifact".to_string(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_payload_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.payload_file = Some(path.into());
        self
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.scripts.push(script.into());
        self
    }

    pub fn with_format_version(mut self, version: u32) -> Self {
        self.format_version = Some(version);
        self
    }

    /// Arguments for `mender-artifact` writing `payload` into `output`
    pub fn write_args(&self, payload: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["write".to_string()];
        if self.payload_type == ROOTFS_IMAGE {
            args.push(ROOTFS_IMAGE.to_string());
        } else {
            args.extend(["module-image".to_string(), "-T".to_string(), self.payload_type.clone()]);
        }
        args.extend(["-n".to_string(), self.name.clone()]);
        for device_type in &self.device_types {
            args.extend(["-t".to_string(), device_type.clone()]);
        }
        for script in &self.scripts {
            args.extend(["-s".to_string(), script.display().to_string()]);
        }
        if let Some(version) = self.format_version {
            args.extend(["-v".to_string(), version.to_string()]);
        }
        args.extend([
            "-f".to_string(),
            payload.display().to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ]);
        args
    }

    /// Build the artifact in a scratch directory, writing the in-memory
    /// payload there first unless a payload file was given
    pub async fn make(&self) -> Result<ArtifactFile> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("artifact.mender");
        let payload = match &self.payload_file {
            Some(path) => path.clone(),
            None => {
                let path = dir.path().join("payload");
                tokio::fs::write(&path, &self.payload).await?;
                path
            }
        };

        run_command(&self.tool, self.write_args(&payload, &output)).await?.check()?;

        info!(name = %self.name, payload_type = %self.payload_type, path = %output.display(), "artifact built");
        Ok(ArtifactFile { path: output, _dir: dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rootfs_artifact_arguments() {
        let artifact = Artifact::new("rootfs-noop-update", &["qemux86-64"], "rootfs-image");
        let args = artifact.write_args(Path::new("/tmp/p"), Path::new("/tmp/a.mender"));
        assert_eq!(
            args,
            [
                "write", "rootfs-image", "-n", "rootfs-noop-update", "-t", "qemux86-64", "-f",
                "/tmp/p", "-o", "/tmp/a.mender"
            ]
        );
    }

    #[test]
    fn module_artifact_names_its_type() {
        let artifact = Artifact::new("script", &["a", "b"], "script");
        let args = artifact.write_args(Path::new("p"), Path::new("o"));
        assert_eq!(&args[..4], ["write", "module-image", "-T", "script"]);
        assert_eq!(args.iter().filter(|a| *a == "-t").count(), 2);
    }

    #[test]
    fn scripts_and_version_come_before_payload() {
        let artifact = Artifact::new("with-scripts", &["qemux86-64"], "rootfs-image")
            .with_script("/scripts/ArtifactInstall_Enter_00")
            .with_format_version(3);
        let args = artifact.write_args(Path::new("p"), Path::new("o"));
        let script = args.iter().position(|a| a == "-s").unwrap();
        assert_eq!(args[script + 1], "/scripts/ArtifactInstall_Enter_00");
        let version = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[version + 1], "3");
        assert!(version < args.iter().position(|a| a == "-f").unwrap());
    }

    #[tokio::test]
    async fn failing_tool_surfaces_command_error() {
        let mut artifact = Artifact::new("x", &["qemux86-64"], "rootfs-image");
        artifact.tool = "false".to_string();
        let err = artifact.make().await.unwrap_err();
        assert!(matches!(err, crate::errors::Error::Command { .. }));
    }
}
