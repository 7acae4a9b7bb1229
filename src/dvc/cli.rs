use regex::Regex;
use semver::{Version, VersionReq};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{LazyLock, OnceLock};
use tracing::debug;

use super::{DvcBackend, DvcError};
use crate::config::Settings;

/// [`DvcBackend`] that runs the `dvc` executable as a subprocess.
///
/// Arguments are passed directly, never through a shell, so paths with
/// spaces or quotes need no escaping. The installed version is checked
/// once, before the first real command.
pub struct DvcCli {
    executable: PathBuf,
    required: VersionReq,
    check_version: bool,
    verified: OnceLock<Version>,
}

impl DvcCli {
    pub fn new(settings: &Settings) -> Self {
        Self {
            executable: settings.dvc_executable.clone(),
            required: settings.dvc_version.clone(),
            check_version: settings.check_dvc_version,
            verified: OnceLock::new(),
        }
    }

    fn spawn(&self, workdir: &Path, args: &[&str]) -> Result<String, DvcError> {
        let command = format!("dvc {}", args.join(" "));
        debug!(%command, cwd = %workdir.display(), "spawn dvc");

        let out = Command::new(&self.executable)
            .args(args)
            .current_dir(workdir)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    DvcError::MissingExecutable(self.executable.clone())
                }
                _ => DvcError::Io(e),
            })?;

        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(DvcError::CommandFailed {
                command,
                code: out.status.code(),
                output: format!("{}{}", stdout, stderr).trim().to_string(),
                workdir: workdir.to_path_buf(),
            });
        }
        Ok(stdout)
    }

    fn ensure_version(&self) -> Result<(), DvcError> {
        if !self.check_version || self.verified.get().is_some() {
            return Ok(());
        }
        let found = self.version()?;
        if !self.required.matches(&found) {
            return Err(DvcError::UnsupportedVersion {
                found: found.to_string(),
                required: self.required.to_string(),
            });
        }
        let _ = self.verified.set(found);
        Ok(())
    }

    fn run(&self, workdir: &Path, args: &[&str]) -> Result<String, DvcError> {
        self.ensure_version()?;
        self.spawn(workdir, args)
    }
}

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("valid regex"));

/// Pull `MAJOR.MINOR.PATCH` out of `dvc version` output.
///
/// Handles both the bare `3.48.0` form and `DVC version: 2.8.1 (pip)`.
fn parse_version(output: &str) -> Option<Version> {
    let caps = VERSION.captures(output)?;
    Some(Version::new(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

impl DvcBackend for DvcCli {
    fn version(&self) -> Result<Version, DvcError> {
        let out = self.spawn(Path::new("."), &["version"]).map_err(|e| match e {
            DvcError::CommandFailed { .. } => DvcError::MissingExecutable(self.executable.clone()),
            other => other,
        })?;
        parse_version(&out).ok_or_else(|| DvcError::MissingExecutable(self.executable.clone()))
    }

    fn init(&self, workdir: &Path) -> Result<(), DvcError> {
        self.run(workdir, &["init"]).map(drop)
    }

    fn remote_add_default(&self, workdir: &Path, name: &str, url: &str) -> Result<(), DvcError> {
        self.run(workdir, &["remote", "add", "-d", name, url]).map(drop)
    }

    fn remote_modify(
        &self,
        workdir: &Path,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DvcError> {
        self.run(workdir, &["remote", "modify", name, key, value])
            .map(drop)
    }

    fn add(&self, workdir: &Path, path: &str) -> Result<(), DvcError> {
        self.run(workdir, &["add", path]).map(drop)
    }

    fn remove(&self, workdir: &Path, path: &str) -> Result<(), DvcError> {
        let pointer = format!("{}.dvc", path);
        self.run(workdir, &["remove", &pointer]).map(drop)
    }

    fn pull(&self, workdir: &Path, path: &str) -> Result<(), DvcError> {
        self.run(workdir, &["pull", path]).map(drop)
    }

    fn push(&self, workdir: &Path) -> Result<(), DvcError> {
        self.run(workdir, &["push"]).map(drop)
    }

    fn gc(&self, workdir: &Path) -> Result<(), DvcError> {
        self.run(
            workdir,
            &["gc", "--workspace", "--cloud", "--all-branches", "--force"],
        )
        .map(drop)
    }
}
