use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::info;

use super::Checkout;
use super::stage::{copy_file, gitignore_of, normalize, pointer_of};
use crate::config::Settings;
use crate::dvc::DvcBackend;
use crate::error::{Error, Result};
use crate::git;
use crate::repo_url::RepoUrl;
use crate::transfer::{CommitInfo, EntryMeta, Transfer};

/// Directories that belong to the tooling, never to the data.
pub const EXCLUDED_DIRS: &[&str] = &[".git", ".dvc"];

/// Borrowed view of a ready client: the checkout plus everything needed to
/// act on it.
pub struct Session<'a> {
    pub checkout: &'a Checkout,
    pub dvc: &'a dyn DvcBackend,
    pub settings: &'a Settings,
    pub url: &'a RepoUrl,
}

fn is_excluded(rel: &str) -> bool {
    rel.split('/').any(|seg| EXCLUDED_DIRS.contains(&seg))
}

impl Session<'_> {
    pub fn abs(&self, rel: &str) -> PathBuf {
        self.checkout.root.join(rel)
    }

    pub fn missing(&self, rel: &str) -> Error {
        Error::FileMissing {
            repo: self.url.redacted(),
            path: rel.to_string(),
        }
    }

    pub fn is_tracked(&self, rel: &str) -> bool {
        !rel.is_empty() && !is_excluded(rel) && self.abs(&pointer_of(rel)).is_file()
    }

    pub fn is_dir(&self, rel: &str) -> bool {
        rel.is_empty() || (!is_excluded(rel) && self.abs(rel).is_dir())
    }

    /// Make sure the data behind `rel` is on disk, pulling it if needed.
    pub fn materialize(&self, rel: &str) -> Result<PathBuf> {
        if !self.is_tracked(rel) {
            return Err(self.missing(rel));
        }
        let p = self.abs(rel);
        if !p.is_file() {
            self.dvc.pull(&self.checkout.root, rel)?;
        }
        if !p.is_file() {
            return Err(self.missing(rel));
        }
        Ok(p)
    }

    /// Stage one upload: copy into the checkout and `dvc add` it.
    ///
    /// Returns the normalized repository path and the file size.
    pub fn upload(&self, t: &Transfer) -> Result<(String, u64)> {
        let rel = normalize(&t.repo_path)?;
        if rel.is_empty() || is_excluded(&rel) {
            return Err(Error::OutsideRepository(t.repo_path.clone()));
        }
        if !t.local_path.is_file() {
            return Err(Error::LocalMissing(t.local_path.clone()));
        }
        let n = copy_file(&t.local_path, &self.abs(&rel))?;
        self.dvc.add(&self.checkout.root, &rel)?;
        Ok((rel, n))
    }

    pub fn download(&self, t: &Transfer) -> Result<u64> {
        let rel = normalize(&t.repo_path)?;
        let src = self.materialize(&rel)?;
        Ok(copy_file(&src, &t.local_path)?)
    }

    /// Push DVC data, commit the pointer changes for `files` and push git.
    ///
    /// With `removed` set the pointers are taken out of the index;
    /// otherwise they are added. Sibling `.gitignore` files are staged
    /// when they exist and dropped from the index when DVC deleted them.
    pub fn publish(&self, files: &[String], removed: bool, message: &str) -> Result<CommitInfo> {
        let root = &self.checkout.root;

        info!("Push DVC");
        self.dvc.push(root)?;

        let pointers: Vec<String> = files.iter().map(|f| pointer_of(f)).collect();
        let (kept, gone): (BTreeSet<String>, BTreeSet<String>) = files
            .iter()
            .map(|f| gitignore_of(f))
            .partition(|g| root.join(g).is_file());

        let mut added: Vec<String> = kept.into_iter().collect();
        let mut dropped: Vec<String> = gone.into_iter().collect();
        if removed {
            dropped.extend(pointers);
        } else {
            added.extend(pointers);
        }

        info!(files = files.len(), "Commit");
        let repo = &self.checkout.repo;
        let oid = git::commit_paths(repo, &added, &dropped, message, &self.settings.author)?;

        info!(repo = %self.url, "Git push");
        git::push_head(repo, self.url)?;

        let secs = repo.find_commit(oid)?.time().seconds();
        Ok(CommitInfo {
            sha: oid.to_string(),
            message: message.to_string(),
            files: files.to_vec(),
            time: SystemTime::UNIX_EPOCH + Duration::from_secs(u64::try_from(secs).unwrap_or(0)),
        })
    }

    /// Entries directly under `rel`: subdirectories and tracked files.
    pub fn scan_dir(&self, rel: &str) -> Result<Vec<EntryMeta>> {
        if !self.is_dir(rel) {
            return Err(self.missing(rel));
        }
        let join = |name: &str| {
            if rel.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", rel, name)
            }
        };

        let mut out = Vec::new();
        for ent in fs::read_dir(self.abs(rel))? {
            let ent = ent?;
            let name = ent.file_name().to_string_lossy().into_owned();
            let ft = ent.file_type()?;
            if ft.is_dir() {
                if !EXCLUDED_DIRS.contains(&name.as_str()) {
                    out.push(EntryMeta {
                        path: join(&name),
                        name,
                        is_dir: true,
                    });
                }
            } else if ft.is_file()
                && let Some(stem) = name.strip_suffix(".dvc")
                && !stem.is_empty()
            {
                out.push(EntryMeta {
                    path: join(stem),
                    name: stem.to_string(),
                    is_dir: false,
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Every tracked file below `rel`, as `/`-prefixed paths.
    pub fn walk_files(&self, rel: &str) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![rel.to_string()];
        while let Some(dir) = pending.pop() {
            for e in self.scan_dir(&dir)? {
                if e.is_dir {
                    pending.push(e.path);
                } else {
                    files.push(format!("/{}", e.path));
                }
            }
        }
        files.sort();
        Ok(files)
    }
}
