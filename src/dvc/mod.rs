//! DVC command layer.
//!
//! Everything the client needs from DVC goes through [`DvcBackend`]. The
//! production implementation, [`DvcCli`], spawns the `dvc` executable; the
//! rest of the crate never builds a command line itself.

mod cli;

use std::path::{Path, PathBuf};

pub use cli::DvcCli;

#[derive(Debug, thiserror::Error)]
pub enum DvcError {
    #[error("dvc executable not found or not runnable: {}", .0.display())]
    MissingExecutable(PathBuf),

    #[error("dvc {found} does not satisfy the required version {required}")]
    UnsupportedVersion { found: String, required: String },

    #[error("`{command}` failed in {} (exit code {code:?}): {output}", .workdir.display())]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
        workdir: PathBuf,
    },

    #[error("dvc I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operations performed against a DVC-enabled working tree.
///
/// `workdir` is the root of the git checkout; `path` arguments are relative
/// to it and name the data file, never the `.dvc` pointer.
pub trait DvcBackend {
    /// Installed DVC version.
    fn version(&self) -> Result<semver::Version, DvcError>;

    /// `dvc init` in a fresh repository.
    fn init(&self, workdir: &Path) -> Result<(), DvcError>;

    /// Register `url` as the default remote called `name`.
    fn remote_add_default(&self, workdir: &Path, name: &str, url: &str) -> Result<(), DvcError>;

    /// Set an option on an existing remote.
    fn remote_modify(
        &self,
        workdir: &Path,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DvcError>;

    /// Start tracking `path`, writing `<path>.dvc` and updating `.gitignore`.
    fn add(&self, workdir: &Path, path: &str) -> Result<(), DvcError>;

    /// Stop tracking `path` by deleting `<path>.dvc`.
    fn remove(&self, workdir: &Path, path: &str) -> Result<(), DvcError>;

    /// Materialize `path` from the remote.
    fn pull(&self, workdir: &Path, path: &str) -> Result<(), DvcError>;

    /// Upload every cached object to the remote.
    fn push(&self, workdir: &Path) -> Result<(), DvcError>;

    /// Delete remote objects no longer referenced from any branch.
    fn gc(&self, workdir: &Path) -> Result<(), DvcError>;
}
