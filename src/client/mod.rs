//! High-level DVC client.
//!
//! A [`Client`] owns at most one working checkout of the repository. The
//! checkout is cloned on the first operation that needs it and removed on
//! [`Client::close`] or when the client is dropped:
//!
//! ```text
//! uninitialized --(first operation)--> ready --(close)--> closed
//! ```
//!
//! Every operation on a closed client fails with [`Error::Closed`]. A
//! failed publish drops the checkout back to uninitialized, so the next
//! operation sees the remote state again.

mod session;
mod stage;

use git2::Repository;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::Settings;
use crate::dvc::{DvcBackend, DvcCli};
use crate::error::{Error, ErrorKind, Result};
use crate::git;
use crate::repo_url::{Credentials, RepoUrl};
use crate::transfer::{
    CommitInfo, CommitOptions, EntryMeta, Transfer, TransferKind, TransferOutcome, UpdateReport,
};

use session::Session;
use stage::normalize;

/// A temporary clone of the repository.
pub(crate) struct Checkout {
    temp: TempDir,
    root: PathBuf,
    repo: Repository,
}

impl Checkout {
    fn create(url: &RepoUrl, settings: &Settings) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("dvcfs-");
        let temp = match &settings.temp_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        let root = temp.path().join("repo");

        info!(repo = %url, path = %root.display(), "clone working checkout");
        let repo = git::clone_checkout(url, &root).map_err(|source| Error::RepoNotAccessible {
            repo: url.redacted(),
            source,
        })?;
        Ok(Self { temp, root, repo })
    }
}

enum State {
    Uninitialized,
    Ready(Checkout),
    Closed,
}

/// Configures and creates a [`Client`].
pub struct ClientBuilder {
    repo: RepoUrl,
    settings: Settings,
    dvc: Option<Box<dyn DvcBackend>>,
}

impl ClientBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Parent directory for the working checkout.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.temp_dir = Some(dir.into());
        self
    }

    /// Credentials for HTTPS remotes, written into the repository URL.
    pub fn credentials(mut self, creds: Credentials) -> Self {
        self.repo = self.repo.with_credentials(&creds);
        self
    }

    /// Replace the `dvc` subprocess backend.
    pub fn dvc_backend(mut self, dvc: Box<dyn DvcBackend>) -> Self {
        self.dvc = Some(dvc);
        self
    }

    pub fn build(self) -> Client {
        let dvc = self
            .dvc
            .unwrap_or_else(|| Box::new(DvcCli::new(&self.settings)));
        Client {
            repo: self.repo,
            settings: self.settings,
            dvc,
            state: State::Uninitialized,
        }
    }
}

/// Interface for all high-level DVC operations on one repository.
pub struct Client {
    repo: RepoUrl,
    settings: Settings,
    dvc: Box<dyn DvcBackend>,
    state: State,
}

impl Client {
    /// Client with default [`Settings`] and the `dvc` executable.
    pub fn new(repo: impl Into<RepoUrl>) -> Self {
        Self::builder(repo).build()
    }

    pub fn builder(repo: impl Into<RepoUrl>) -> ClientBuilder {
        ClientBuilder {
            repo: repo.into(),
            settings: Settings::default(),
            dvc: None,
        }
    }

    pub fn repo_url(&self) -> &RepoUrl {
        &self.repo
    }

    /// Root of the working checkout, once it has been cloned.
    pub fn checkout_path(&self) -> Option<&Path> {
        match &self.state {
            State::Ready(c) => Some(&c.root),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    fn session(&mut self) -> Result<Session<'_>> {
        match self.state {
            State::Closed => return Err(Error::Closed),
            State::Uninitialized => {
                let checkout = Checkout::create(&self.repo, &self.settings)?;
                self.state = State::Ready(checkout);
            }
            State::Ready(_) => {}
        }
        match &self.state {
            State::Ready(checkout) => Ok(Session {
                checkout,
                dvc: &*self.dvc,
                settings: &self.settings,
                url: &self.repo,
            }),
            _ => Err(Error::Closed),
        }
    }

    /// Throw away a checkout holding changes that never reached the
    /// remote. The next operation clones again.
    fn discard_checkout(&mut self) {
        if let State::Ready(checkout) = std::mem::replace(&mut self.state, State::Uninitialized) {
            warn!(repo = %self.repo, "discard working checkout after failed publish");
            let Checkout { temp, repo, .. } = checkout;
            drop(repo);
            if let Err(e) = temp.close() {
                warn!(error = %e, "failed to remove working checkout");
            }
        }
    }

    /// Apply `transfers` and publish the uploads; see [`Client::update_with`].
    pub fn update(&mut self, transfers: Vec<Transfer>) -> Result<UpdateReport> {
        self.update_with(transfers, &CommitOptions::default())
    }

    /// Apply every transfer in order, then publish the successful uploads
    /// with a single `dvc push`, commit and `git push`.
    ///
    /// A failing transfer is recorded in the report and the batch goes on.
    /// The commit covers only the uploads that succeeded; when none did,
    /// nothing is pushed or committed. If publishing fails the checkout is
    /// discarded, so the staged files do not show up in later reads.
    ///
    /// # Errors
    /// - `Error::Closed` after [`Client::close`].
    /// - `Error::RepoNotAccessible` if the checkout cannot be cloned.
    /// - `Error::Publish` if pushing data, committing or pushing git fails.
    pub fn update_with(
        &mut self,
        transfers: Vec<Transfer>,
        opts: &CommitOptions,
    ) -> Result<UpdateReport> {
        let start = Instant::now();
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if transfers.is_empty() {
            return Ok(UpdateReport {
                duration: start.elapsed(),
                ..UpdateReport::default()
            });
        }

        let s = self.session()?;
        info!(repo = %s.url, count = transfers.len(), "Add files to DVC");

        let mut outcomes = Vec::with_capacity(transfers.len());
        let mut uploaded = Vec::new();
        for t in transfers {
            let result = match t.kind {
                TransferKind::Upload => s.upload(&t).map(|(rel, n)| {
                    uploaded.push(rel);
                    n
                }),
                TransferKind::Download => s.download(&t),
            };
            if let Err(e) = &result {
                warn!(path = %t.repo_path, error = %e, "transfer failed");
            }
            outcomes.push(TransferOutcome { transfer: t, result });
        }

        let commit = if uploaded.is_empty() {
            None
        } else {
            let message = opts.render("updated", &uploaded);
            let published = s
                .publish(&uploaded, false, &message)
                .map_err(|source| Error::Publish {
                    repo: s.url.redacted(),
                    files: uploaded.clone(),
                    source: Box::new(source),
                });
            match published {
                Ok(info) => Some(info),
                Err(e) => {
                    self.discard_checkout();
                    return Err(e);
                }
            }
        };

        Ok(UpdateReport {
            outcomes,
            commit,
            duration: start.elapsed(),
        })
    }

    /// Run `transfers` as downloads regardless of their declared kind.
    pub fn download(&mut self, transfers: Vec<Transfer>) -> Result<UpdateReport> {
        let transfers = transfers
            .into_iter()
            .map(|t| Transfer {
                kind: TransferKind::Download,
                ..t
            })
            .collect();
        self.update(transfers)
    }

    /// Contents of a tracked file, pulled from the DVC remote if needed.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let s = self.session()?;
        let rel = normalize(path)?;
        let p = s.materialize(&rel)?;
        Ok(fs::read(p)?)
    }

    /// Like [`Client::read`], but a missing file reads as empty.
    pub fn read_or_empty(&mut self, path: &str) -> Result<Vec<u8>> {
        match self.read(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            other => other,
        }
    }

    /// Store `data` at `path` and publish it as a one-item upload.
    pub fn write(&mut self, path: &str, data: &[u8]) -> Result<Option<CommitInfo>> {
        let s = self.session()?;
        let rel = normalize(path)?;
        if rel.is_empty() {
            return Err(Error::OutsideRepository(path.to_string()));
        }
        let staged = s.abs(&rel);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&staged, data)?;

        let mut report = self.update(vec![Transfer::upload(rel, staged)])?;
        match report.outcomes.pop() {
            Some(TransferOutcome { result: Err(e), .. }) => Err(e),
            _ => Ok(report.commit),
        }
    }

    pub fn remove(&mut self, paths: &[&str]) -> Result<Option<CommitInfo>> {
        self.remove_with(paths, &CommitOptions::default())
    }

    /// Stop tracking `paths` and publish the removal as one commit.
    ///
    /// Every path must be tracked; otherwise nothing is changed and
    /// `Error::FileMissing` is returned. Data already on the DVC remote
    /// stays there until [`Client::cleanup_remote`].
    pub fn remove_with(
        &mut self,
        paths: &[&str],
        opts: &CommitOptions,
    ) -> Result<Option<CommitInfo>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if paths.is_empty() {
            return Ok(None);
        }
        let s = self.session()?;
        let rels = paths
            .iter()
            .map(|p| normalize(p))
            .collect::<Result<Vec<_>>>()?;
        if let Some(missing) = rels.iter().find(|r| !s.is_tracked(r)) {
            return Err(s.missing(missing));
        }

        info!(count = rels.len(), "Remove files from DVC");
        let message = opts.render("removed", &rels);
        let published = rels
            .iter()
            .try_for_each(|rel| s.dvc.remove(&s.checkout.root, rel))
            .map_err(Error::from)
            .and_then(|()| {
                s.publish(&rels, true, &message)
                    .map_err(|source| Error::Publish {
                        repo: s.url.redacted(),
                        files: rels.clone(),
                        source: Box::new(source),
                    })
            });
        match published {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                self.discard_checkout();
                Err(e)
            }
        }
    }

    pub fn scan_dir(&mut self, path: &str) -> Result<Vec<EntryMeta>> {
        let s = self.session()?;
        s.scan_dir(&normalize(path)?)
    }

    /// Names of the entries under `path`.
    pub fn list_files(&mut self, path: &str) -> Result<Vec<String>> {
        Ok(self.scan_dir(path)?.into_iter().map(|e| e.name).collect())
    }

    pub fn walk_files(&mut self, path: &str) -> Result<Vec<String>> {
        let s = self.session()?;
        s.walk_files(&normalize(path)?)
    }

    /// Whether `path` is a tracked file or a data directory.
    pub fn exists(&mut self, path: &str) -> Result<bool> {
        let s = self.session()?;
        let rel = match normalize(path) {
            Ok(rel) => rel,
            Err(Error::OutsideRepository(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(s.is_dir(&rel) || s.is_tracked(&rel))
    }

    pub fn is_dir(&mut self, path: &str) -> Result<bool> {
        let s = self.session()?;
        Ok(s.is_dir(&normalize(path)?))
    }

    pub fn is_file(&mut self, path: &str) -> Result<bool> {
        let s = self.session()?;
        Ok(s.is_tracked(&normalize(path)?))
    }

    /// Newest modification time among `paths`, taken from the git history
    /// of their `.dvc` pointers.
    pub fn modified_time(&mut self, paths: &[&str]) -> Result<SystemTime> {
        let s = self.session()?;
        let mut newest: Option<i64> = None;
        for p in paths {
            let pointer = stage::pointer_of(&normalize(p)?);
            if let Some(t) = git::last_modified(&s.checkout.repo, &pointer)? {
                newest = Some(newest.map_or(t.seconds(), |n| n.max(t.seconds())));
            }
        }
        match newest {
            Some(secs) => Ok(SystemTime::UNIX_EPOCH
                + Duration::from_secs(u64::try_from(secs).unwrap_or(0))),
            None => Err(s.missing(&paths.join(", "))),
        }
    }

    /// Garbage-collect the DVC remote: objects not referenced from any
    /// branch are deleted.
    pub fn cleanup_remote(&mut self) -> Result<()> {
        let s = self.session()?;
        info!(repo = %s.url, "Collect garbage on DVC remote");
        s.dvc.gc(&s.checkout.root)?;
        Ok(())
    }

    /// Release the working checkout. Later operations fail with
    /// `Error::Closed`; closing again is a no-op.
    ///
    /// # Errors
    /// Returns `Error::Io` if the checkout cannot be deleted and
    /// `ignore_clean_errors` is off.
    pub fn close(&mut self) -> Result<()> {
        if let State::Ready(checkout) = std::mem::replace(&mut self.state, State::Closed) {
            info!(repo = %self.repo, "Perform cleanup");
            let Checkout { temp, repo, .. } = checkout;
            drop(repo);
            if let Err(e) = temp.close() {
                if !self.settings.ignore_clean_errors {
                    return Err(e.into());
                }
                warn!(error = %e, "failed to remove working checkout");
            }
        }
        Ok(())
    }
}
