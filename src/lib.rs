//! Crate entry point for **dvcfs**.
//!
//! Read and write files tracked by DVC in a git repository as if they were
//! an ordinary filesystem. A [`Client`] keeps one temporary clone of the
//! repository; uploads are `dvc add`-ed, pushed to the DVC remote and
//! committed, reads pull the data on demand.
//!
//! The `pub use` re-exports make the main types accessible directly from
//! the crate root.

mod client;
mod config;
mod dvc;
mod error;
mod fs;
mod git;
pub mod management;
mod paths;
mod repo_url;
mod transfer;

#[cfg(test)]
mod testutil;

pub use client::{Client, ClientBuilder};
pub use config::{Author, Settings, load_settings};
pub use dvc::{DvcBackend, DvcCli, DvcError};
pub use error::{Error, ErrorKind, Result};
pub use fs::{DvcFs, FileSystem, FsError, open_fs, open_fs_with, parse_fs_url};
pub use paths::{config_file, config_home};
pub use repo_url::{Credentials, RepoUrl};
pub use transfer::{
    CommitInfo, CommitOptions, EntryMeta, Transfer, TransferKind, TransferOutcome, UpdateReport,
};
