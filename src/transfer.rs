use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Local file → tracked repository.
    Upload,
    /// Tracked repository → local file.
    Download,
}

/// A request to move one file between local storage and the repository.
///
/// `repo_path` is relative to the repository root (a leading `/` is
/// accepted and ignored).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub repo_path: String,
    pub local_path: PathBuf,
    pub kind: TransferKind,
}

impl Transfer {
    pub fn upload(repo_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            local_path: local_path.into(),
            kind: TransferKind::Upload,
        }
    }

    pub fn download(repo_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            local_path: local_path.into(),
            kind: TransferKind::Download,
        }
    }
}

/// Result of a single transfer inside a batch; `Ok` carries the byte count.
#[derive(Debug)]
pub struct TransferOutcome {
    pub transfer: Transfer,
    pub result: Result<u64, Error>,
}

/// The commit a batch produced.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub files: Vec<String>,
    pub time: SystemTime,
}

/// Overrides for the generated commit message.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Replaces the default `DVC Automatically ...` message.
    pub message: Option<String>,
    /// Appended on its own line after the message.
    pub extra: Option<String>,
}

impl CommitOptions {
    pub(crate) fn render(&self, verb: &str, files: &[String]) -> String {
        let mut msg = match &self.message {
            Some(m) => m.clone(),
            None => {
                let names: Vec<&str> = files
                    .iter()
                    .map(|f| f.rsplit('/').next().unwrap_or(f))
                    .collect();
                format!("DVC Automatically {} files: {}", verb, names.join(", "))
            }
        };
        if let Some(extra) = &self.extra {
            msg.push('\n');
            msg.push_str(extra);
        }
        msg
    }
}

/// Per-item results of [`Client::update`](crate::Client::update).
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub outcomes: Vec<TransferOutcome>,
    pub commit: Option<CommitInfo>,
    pub duration: Duration,
}

impl UpdateReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// One entry of a directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Repository-relative path, without a leading `/`.
    pub path: String,
    pub name: String,
    pub is_dir: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_lists_basenames() {
        let files = vec!["data/1.txt".to_string(), "2.csv".to_string()];
        assert_eq!(
            CommitOptions::default().render("updated", &files),
            "DVC Automatically updated files: 1.txt, 2.csv"
        );
    }

    #[test]
    fn custom_message_and_extra() {
        let opts = CommitOptions {
            message: Some("nightly sync".into()),
            extra: Some("run 42".into()),
        };
        assert_eq!(opts.render("updated", &[]), "nightly sync\nrun 42");

        let opts = CommitOptions {
            message: None,
            extra: Some("[skip ci]".into()),
        };
        assert_eq!(
            opts.render("removed", &["x/y.bin".into()]),
            "DVC Automatically removed files: y.bin\n[skip ci]"
        );
    }
}
