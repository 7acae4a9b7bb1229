//! Fixtures shared by the unit tests: a bare git remote seeded with a DVC
//! layout, and an in-process stand-in for the `dvc` executable.

use git2::{Repository, Signature, build::RepoBuilder};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

use crate::client::Client;
use crate::config::Settings;
use crate::dvc::{DvcBackend, DvcError};

/// A bare repository plus the directory acting as the DVC remote.
pub struct Remote {
    _dir: TempDir,
    pub url: String,
    pub bare: PathBuf,
    pub store: PathBuf,
}

/// A remote whose history already carries a DVC layout.
pub fn seeded_remote() -> Remote {
    remote_with(&[(".dvc/config", "[core]\n    remote = storage\n")], "init dvc")
}

/// A remote as a hosting service creates it with auto-init: a single
/// commit holding a README.
pub fn plain_remote() -> Remote {
    remote_with(&[("README.md", "# data\n")], "Initial commit")
}

fn remote_with(files: &[(&str, &str)], message: &str) -> Remote {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("seed");
    let repo = Repository::init(&seed).unwrap();

    let mut index = repo.index().unwrap();
    for (path, body) in files {
        let p = seed.join(path);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, body).unwrap();
        index.add_path(Path::new(path)).unwrap();
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("seed", "seed@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
        .unwrap();

    let bare = dir.path().join("remote.git");
    RepoBuilder::new()
        .bare(true)
        .clone(seed.to_str().unwrap(), &bare)
        .unwrap();

    let store = dir.path().join("store");
    fs::create_dir_all(&store).unwrap();

    Remote {
        url: bare.display().to_string(),
        bare,
        store,
        _dir: dir,
    }
}

/// Emulates the parts of DVC the client relies on.
///
/// `add` hashes the file into `store` and writes a pointer; `pull` copies
/// the object back; `remove` deletes the pointer and its `.gitignore`
/// line, and the `.gitignore` itself once it is empty. Pushes are counted,
/// the store already is the remote; [`FakeDvc::fail_pushes`] makes them
/// fail instead.
#[derive(Clone)]
pub struct FakeDvc {
    pub store: PathBuf,
    pub pushes: Arc<AtomicUsize>,
    pub pulls: Arc<AtomicUsize>,
    pub push_fails: Arc<AtomicBool>,
}

impl FakeDvc {
    pub fn new(store: &Path) -> Self {
        Self {
            store: store.to_path_buf(),
            pushes: Arc::new(AtomicUsize::new(0)),
            pulls: Arc::new(AtomicUsize::new(0)),
            push_fails: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn fail_pushes(&self, fail: bool) {
        self.push_fails.store(fail, Ordering::SeqCst);
    }
}

fn failed(cmd: &str, workdir: &Path, output: String) -> DvcError {
    DvcError::CommandFailed {
        command: cmd.to_string(),
        code: Some(1),
        output,
        workdir: workdir.to_path_buf(),
    }
}

fn split(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", path),
    }
}

impl DvcBackend for FakeDvc {
    fn version(&self) -> Result<semver::Version, DvcError> {
        Ok(semver::Version::new(3, 48, 0))
    }

    fn init(&self, workdir: &Path) -> Result<(), DvcError> {
        fs::create_dir_all(workdir.join(".dvc"))?;
        fs::write(workdir.join(".dvc/config"), "")?;
        Ok(())
    }

    fn remote_add_default(&self, workdir: &Path, name: &str, url: &str) -> Result<(), DvcError> {
        let cfg = format!("[core]\n    remote = {name}\n['remote \"{name}\"']\n    url = {url}\n");
        fs::write(workdir.join(".dvc/config"), cfg)?;
        Ok(())
    }

    fn remote_modify(&self, workdir: &Path, _: &str, key: &str, value: &str) -> Result<(), DvcError> {
        let mut cfg = fs::read_to_string(workdir.join(".dvc/config"))?;
        cfg.push_str(&format!("    {key} = {value}\n"));
        fs::write(workdir.join(".dvc/config"), cfg)?;
        Ok(())
    }

    fn add(&self, workdir: &Path, path: &str) -> Result<(), DvcError> {
        let data = fs::read(workdir.join(path))
            .map_err(|e| failed("dvc add", workdir, format!("ERROR: {path} does not exist: {e}")))?;
        let digest = hex::encode(Sha256::digest(&data));
        fs::write(self.store.join(&digest), &data)?;

        let (dir, name) = split(path);
        fs::write(
            workdir.join(format!("{path}.dvc")),
            format!("outs:\n- sha256: {digest}\n  size: {}\n  path: {name}\n", data.len()),
        )?;

        let ignore = workdir.join(dir).join(".gitignore");
        let mut lines = fs::read_to_string(&ignore).unwrap_or_default();
        let entry = format!("/{name}");
        if !lines.lines().any(|l| l == entry) {
            lines.push_str(&entry);
            lines.push('\n');
            fs::write(&ignore, lines)?;
        }
        Ok(())
    }

    fn remove(&self, workdir: &Path, path: &str) -> Result<(), DvcError> {
        let pointer = workdir.join(format!("{path}.dvc"));
        fs::remove_file(&pointer)
            .map_err(|e| failed("dvc remove", workdir, format!("ERROR: {path}.dvc does not exist: {e}")))?;

        let (dir, name) = split(path);
        let ignore = workdir.join(dir).join(".gitignore");
        if let Ok(lines) = fs::read_to_string(&ignore) {
            let entry = format!("/{name}");
            let kept: String = lines
                .lines()
                .filter(|l| *l != entry)
                .map(|l| format!("{l}\n"))
                .collect();
            if kept.trim().is_empty() {
                fs::remove_file(&ignore)?;
            } else {
                fs::write(&ignore, kept)?;
            }
        }
        Ok(())
    }

    fn pull(&self, workdir: &Path, path: &str) -> Result<(), DvcError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let pointer = fs::read_to_string(workdir.join(format!("{path}.dvc")))
            .map_err(|e| failed("dvc pull", workdir, format!("ERROR: {path} does not exist: {e}")))?;
        let digest = pointer
            .lines()
            .find_map(|l| l.trim_start_matches("- ").strip_prefix("sha256: "))
            .ok_or_else(|| failed("dvc pull", workdir, "ERROR: malformed pointer".into()))?;
        fs::copy(self.store.join(digest.trim()), workdir.join(path))?;
        Ok(())
    }

    fn push(&self, workdir: &Path) -> Result<(), DvcError> {
        if self.push_fails.load(Ordering::SeqCst) {
            return Err(failed("dvc push", workdir, "ERROR: failed to push data to the cloud".into()));
        }
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn gc(&self, _workdir: &Path) -> Result<(), DvcError> {
        Ok(())
    }
}

/// A client bound to `remote` that uses [`FakeDvc`].
pub fn fake_client(remote: &Remote) -> (Client, FakeDvc) {
    let dvc = FakeDvc::new(&remote.store);
    let client = Client::builder(remote.url.as_str())
        .settings(Settings::default())
        .dvc_backend(Box::new(dvc.clone()))
        .build();
    (client, dvc)
}
