//! Error types for the client and the DVC / git layers.
//!
//! [`Error`] keeps the detail of what went wrong; [`Error::kind`] folds it
//! onto the four kinds a filesystem caller cares about.

use std::path::PathBuf;
use std::sync::LazyLock;

use git2::{ErrorClass, ErrorCode};
use regex::Regex;

use crate::dvc::DvcError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of every error this crate produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    ResourceError,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file {path} is missing in DVC repository {repo}")]
    FileMissing { repo: String, path: String },

    #[error("local file not found: {}", .0.display())]
    LocalMissing(PathBuf),

    #[error("path escapes the repository root: {0}")]
    OutsideRepository(String),

    #[error("git repository {repo} is not accessible: {source}")]
    RepoNotAccessible {
        repo: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to publish [{}] to {repo}: {source}", .files.join(", "))]
    Publish {
        repo: String,
        files: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Dvc(#[from] DvcError),

    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} does not contain valid UTF-8 text")]
    InvalidText(String),

    #[error("invalid filesystem URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(
        "cannot find a GitHub token; pass one explicitly or set one of: {}",
        .0.join(", ")
    )]
    MissingGithubToken(Vec<&'static str>),

    #[error("GitHub API: {0}")]
    Github(#[from] reqwest::Error),

    #[error("S3 bucket {bucket}: {message}")]
    Storage {
        bucket: String,
        status: Option<u16>,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("resource is closed")]
    Closed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FileMissing { .. } | Error::LocalMissing(_) | Error::OutsideRepository(_) => {
                ErrorKind::NotFound
            }
            Error::RepoNotAccessible { source, .. } | Error::Git(source) => git_kind(source),
            Error::Publish { source, .. } => source.kind(),
            Error::Dvc(e) => dvc_kind(e),
            Error::Io(e) => io_kind(e),
            Error::Github(e) => match e.status().map(|s| s.as_u16()) {
                Some(401) | Some(403) => ErrorKind::PermissionDenied,
                Some(404) => ErrorKind::NotFound,
                _ => ErrorKind::ResourceError,
            },
            Error::Storage { status, .. } => match status {
                Some(401) | Some(403) => ErrorKind::PermissionDenied,
                Some(404) => ErrorKind::NotFound,
                _ => ErrorKind::ResourceError,
            },
            Error::MissingGithubToken(_) => ErrorKind::PermissionDenied,
            Error::InvalidText(_) | Error::InvalidUrl { .. } | Error::Config(_) => {
                ErrorKind::ResourceError
            }
            Error::Closed => ErrorKind::Closed,
        }
    }
}

fn git_kind(e: &git2::Error) -> ErrorKind {
    match e.code() {
        ErrorCode::Auth | ErrorCode::Certificate => return ErrorKind::PermissionDenied,
        ErrorCode::NotFound => return ErrorKind::NotFound,
        _ => {}
    }
    if e.class() == ErrorClass::Http || e.class() == ErrorClass::Ssh {
        return classify_output(e.message()).unwrap_or(ErrorKind::ResourceError);
    }
    ErrorKind::ResourceError
}

fn io_kind(e: &std::io::Error) -> ErrorKind {
    match e.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound,
        std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        _ => ErrorKind::ResourceError,
    }
}

fn dvc_kind(e: &DvcError) -> ErrorKind {
    match e {
        DvcError::CommandFailed { output, .. } => {
            classify_output(output).unwrap_or(ErrorKind::ResourceError)
        }
        DvcError::Io(e) => io_kind(e),
        DvcError::MissingExecutable(_) | DvcError::UnsupportedVersion { .. } => {
            ErrorKind::ResourceError
        }
    }
}

static DENIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(authenticat|permission denied|access denied|forbidden|\b40[13]\b|credential)")
        .expect("valid regex")
});

static MISSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(does not exist|not found|no such file|\b404\b|is missing)")
        .expect("valid regex")
});

/// Guess an error kind from the text a tool printed.
fn classify_output(text: &str) -> Option<ErrorKind> {
    if DENIED.is_match(text) {
        return Some(ErrorKind::PermissionDenied);
    }
    if MISSING.is_match(text) {
        return Some(ErrorKind::NotFound);
    }
    None
}
