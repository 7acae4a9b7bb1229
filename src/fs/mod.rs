//! Filesystem view over a DVC repository.
//!
//! [`FileSystem`] is the capability set a storage consumer programs
//! against; [`DvcFs`] implements it on top of [`Client`](crate::Client).
//! Errors cross this boundary as [`FsError`], whose variant is the
//! [`ErrorKind`] of the underlying [`Error`].

mod dvcfs;
mod opener;

pub use dvcfs::DvcFs;
pub use opener::{open_fs, open_fs_with, parse_fs_url};

use crate::error::{Error, ErrorKind};
use crate::transfer::EntryMeta;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("{path}: not found: {source}")]
    NotFound {
        path: String,
        #[source]
        source: Error,
    },

    #[error("{path}: permission denied: {source}")]
    PermissionDenied {
        path: String,
        #[source]
        source: Error,
    },

    #[error("{path}: {source}")]
    ResourceError {
        path: String,
        #[source]
        source: Error,
    },

    #[error("filesystem is closed")]
    Closed,
}

impl FsError {
    /// Wrap `source`, raised while operating on `path`, into the variant
    /// matching its kind.
    pub fn new(path: impl Into<String>, source: Error) -> Self {
        let path = path.into();
        match source.kind() {
            ErrorKind::NotFound => FsError::NotFound { path, source },
            ErrorKind::PermissionDenied => FsError::PermissionDenied { path, source },
            ErrorKind::ResourceError => FsError::ResourceError { path, source },
            ErrorKind::Closed => FsError::Closed,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::NotFound { .. } => ErrorKind::NotFound,
            FsError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            FsError::ResourceError { .. } => ErrorKind::ResourceError,
            FsError::Closed => ErrorKind::Closed,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            FsError::NotFound { path, .. }
            | FsError::PermissionDenied { path, .. }
            | FsError::ResourceError { path, .. } => Some(path),
            FsError::Closed => None,
        }
    }
}

/// Attach the path an operation was working on to a crate [`Error`].
pub(crate) trait AtPath<T> {
    fn at(self, path: &str) -> Result<T, FsError>;
}

impl<T> AtPath<T> for Result<T, Error> {
    fn at(self, path: &str) -> Result<T, FsError> {
        self.map_err(|e| FsError::new(path, e))
    }
}

/// Minimal filesystem capability set.
///
/// Paths are `/`-separated and relative to the filesystem root; a leading
/// `/` is accepted. Methods take `&mut self` because the first call may
/// have to set up backing state (for [`DvcFs`], clone the repository).
pub trait FileSystem {
    fn read_bytes(&mut self, path: &str) -> Result<Vec<u8>, FsError>;

    /// Read `path` as UTF-8 text. Undecodable content is a resource error.
    fn read_text(&mut self, path: &str) -> Result<String, FsError> {
        let data = self.read_bytes(path)?;
        String::from_utf8(data).map_err(|_| FsError::ResourceError {
            path: path.to_string(),
            source: Error::InvalidText(path.to_string()),
        })
    }

    fn write_bytes(&mut self, path: &str, data: &[u8]) -> Result<(), FsError>;

    fn write_text(&mut self, path: &str, text: &str) -> Result<(), FsError> {
        self.write_bytes(path, text.as_bytes())
    }

    /// Names of the entries directly under `path`.
    fn list_dir(&mut self, path: &str) -> Result<Vec<String>, FsError> {
        Ok(self.scan_dir(path)?.into_iter().map(|e| e.name).collect())
    }

    fn scan_dir(&mut self, path: &str) -> Result<Vec<EntryMeta>, FsError>;

    /// Every file below `path`, recursively, as `/`-prefixed paths.
    fn walk_files(&mut self, path: &str) -> Result<Vec<String>, FsError>;

    fn exists(&mut self, path: &str) -> Result<bool, FsError>;

    fn is_dir(&mut self, path: &str) -> Result<bool, FsError>;

    fn is_file(&mut self, path: &str) -> Result<bool, FsError>;

    fn remove(&mut self, path: &str) -> Result<(), FsError>;

    /// Release every resource. Closing twice is allowed.
    fn close(&mut self) -> Result<(), FsError>;

    fn is_closed(&self) -> bool;
}
