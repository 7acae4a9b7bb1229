use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// Storage backing the default DVC remote of a new repository.
pub trait RemoteStorage {
    /// Prepare the storage before DVC is pointed at it.
    fn init_storage(&self) -> Result<()>;

    /// Delete everything stored in it.
    fn remove(&self) -> Result<()>;

    /// Remote URL handed to `dvc remote add`.
    fn url(&self) -> String;
}

/// Storage that already exists and is managed elsewhere.
#[derive(Debug, Clone)]
pub struct ExternalRemote {
    url: String,
}

impl ExternalRemote {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl RemoteStorage for ExternalRemote {
    fn init_storage(&self) -> Result<()> {
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        Ok(())
    }

    fn url(&self) -> String {
        self.url.clone()
    }
}

/// A directory on a local or mounted filesystem.
#[derive(Debug, Clone)]
pub struct LocalRemote {
    dir: PathBuf,
}

impl LocalRemote {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl RemoteStorage for LocalRemote {
    fn init_storage(&self) -> Result<()> {
        debug!(path = %self.dir.display(), "create local DVC storage");
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn url(&self) -> String {
        self.dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_remote_lifecycle() {
        let td = tempfile::tempdir().unwrap();
        let remote = LocalRemote::new(td.path().join("store/dvc"));
        remote.init_storage().unwrap();
        assert!(remote.path().is_dir());
        fs::write(remote.path().join("obj"), "x").unwrap();
        assert_eq!(remote.url(), td.path().join("store/dvc").display().to_string());

        remote.remove().unwrap();
        assert!(!remote.path().exists());
        remote.remove().unwrap();
    }

    #[test]
    fn external_remote_is_left_alone() {
        let remote = ExternalRemote::new("s3://bucket/dvc");
        remote.init_storage().unwrap();
        remote.remove().unwrap();
        assert_eq!(remote.url(), "s3://bucket/dvc");
    }
}
