use git2::{
    Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, Index, IndexAddOption, Oid,
    PushOptions, RemoteCallbacks, Repository, Signature, Time, build::RepoBuilder,
};
use std::path::Path;

use crate::config::Author;
use crate::repo_url::{Credentials, RepoUrl};

/// How many times libgit2 may ask for credentials before we give up.
const MAX_AUTH_ATTEMPTS: usize = 3;

/// Build callbacks that answer credential requests.
///
/// - HTTPS: the credentials embedded in the URL as user/password.
/// - SSH: the user's SSH agent.
/// - Anything else: libgit2's default credentials.
///
/// After [`MAX_AUTH_ATTEMPTS`] the callback fails with `ErrorCode::Auth`
/// instead of letting libgit2 retry forever.
fn callbacks_with_creds(creds: Option<Credentials>) -> RemoteCallbacks<'static> {
    let mut cb = RemoteCallbacks::new();
    let mut attempts = 0;
    cb.credentials(move |_url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_AUTH_ATTEMPTS {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Net,
                "authentication failed: credentials rejected",
            ));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT)
            && let Some(c) = &creds
        {
            return Cred::userpass_plaintext(&c.username, &c.password);
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
        }
        Cred::default()
    });
    cb
}

/// Clone `url` into `dest` and check out the remote's default branch.
///
/// # Errors
/// Returns the raw `git2::Error` so callers can classify authentication
/// and not-found failures.
pub fn clone_checkout(url: &RepoUrl, dest: &Path) -> Result<Repository, git2::Error> {
    let mut fo = FetchOptions::new();
    fo.remote_callbacks(callbacks_with_creds(url.credentials()));

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fo);
    builder.clone(url.as_str(), dest)
}

/// Identity for new commits: the repository's configured one, or `fallback`.
fn signature(repo: &Repository, fallback: &Author) -> Result<Signature<'static>, git2::Error> {
    repo.signature()
        .or_else(|_| Signature::now(&fallback.name, &fallback.email))
}

/// Stage `added` and unstage `removed`, then commit on top of HEAD.
///
/// Paths are relative to the working tree. Every path in `added` must
/// exist on disk. An unborn HEAD (empty repository) produces a root
/// commit.
///
/// # Errors
/// Returns an error if staging, writing the tree, or creating the commit
/// fails.
pub fn commit_paths(
    repo: &Repository,
    added: &[String],
    removed: &[String],
    message: &str,
    author: &Author,
) -> Result<Oid, git2::Error> {
    let mut index = repo.index()?;
    for p in added {
        index.add_path(Path::new(p))?;
    }
    for p in removed {
        index.remove_path(Path::new(p))?;
    }
    commit_index(repo, &mut index, message, author)
}

/// Stage everything under `dirs` that is not ignored, then commit on top
/// of HEAD.
pub fn commit_dirs(
    repo: &Repository,
    dirs: &[&str],
    message: &str,
    author: &Author,
) -> Result<Oid, git2::Error> {
    let mut index = repo.index()?;
    index.add_all(dirs.iter().copied(), IndexAddOption::DEFAULT, None)?;
    commit_index(repo, &mut index, message, author)
}

fn commit_index(
    repo: &Repository,
    index: &mut Index,
    message: &str,
    author: &Author,
) -> Result<Oid, git2::Error> {
    index.write()?;

    let tree = repo.find_tree(index.write_tree()?)?;
    let sig = signature(repo, author)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => None,
        Err(e) => return Err(e),
    };
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
}

/// Push the branch HEAD points at to the same name on `origin`.
///
/// # Errors
/// Returns an error if HEAD is detached, the remote is unreachable, or the
/// remote rejects the update (for example a non-fast-forward).
pub fn push_head(repo: &Repository, url: &RepoUrl) -> Result<(), git2::Error> {
    let head = repo.head()?;
    if !head.is_branch() {
        return Err(git2::Error::from_str("HEAD is detached; nothing to push"));
    }
    let name = head
        .name()
        .ok_or_else(|| git2::Error::from_str("invalid HEAD reference name"))?
        .to_string();

    let mut cb = callbacks_with_creds(url.credentials());
    cb.push_update_reference(|refname, status| match status {
        Some(msg) => Err(git2::Error::from_str(&format!(
            "remote rejected {}: {}",
            refname, msg
        ))),
        None => Ok(()),
    });
    let mut po = PushOptions::new();
    po.remote_callbacks(cb);

    let mut remote = repo.find_remote("origin")?;
    remote.push(&[format!("{}:{}", name, name)], Some(&mut po))
}

/// Time of the newest commit reachable from HEAD that changed `path`.
///
/// A commit "changes" a path when the blob at that path differs from its
/// first parent's (including being added or deleted). Returns `None` when
/// no commit touches the path.
pub fn last_modified(repo: &Repository, path: &str) -> Result<Option<Time>, git2::Error> {
    let mut walk = repo.revwalk()?;
    walk.set_sorting(git2::Sort::TIME)?;
    walk.push_head()?;

    let p = Path::new(path);
    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        let here = commit.tree()?.get_path(p).ok().map(|e| e.id());
        let before = match commit.parent(0) {
            Ok(parent) => parent.tree()?.get_path(p).ok().map(|e| e.id()),
            Err(_) => None,
        };
        if here != before {
            return Ok(Some(commit.time()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded_remote;
    use std::fs;

    #[test]
    fn commit_and_push_reach_the_remote() {
        let remote = seeded_remote();
        let td = tempfile::tempdir().unwrap();
        let url = RepoUrl::new(remote.url.clone());
        let repo = clone_checkout(&url, &td.path().join("repo")).unwrap();
        let root = repo.workdir().unwrap().to_path_buf();

        fs::write(root.join("a.txt.dvc"), "outs:\n- path: a.txt\n").unwrap();
        let oid = commit_paths(
            &repo,
            &["a.txt.dvc".to_string()],
            &[],
            "add a",
            &Author::default(),
        )
        .unwrap();
        push_head(&repo, &url).unwrap();

        let bare = Repository::open_bare(&remote.bare).unwrap();
        let tip = bare.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(tip.id(), oid);
        assert_eq!(tip.message(), Some("add a"));
        assert!(tip.tree().unwrap().get_path(Path::new("a.txt.dvc")).is_ok());
    }

    #[test]
    fn last_modified_tracks_the_newest_change() {
        let remote = seeded_remote();
        let td = tempfile::tempdir().unwrap();
        let url = RepoUrl::new(remote.url.clone());
        let repo = clone_checkout(&url, &td.path().join("repo")).unwrap();
        let root = repo.workdir().unwrap().to_path_buf();

        assert!(last_modified(&repo, "x.dvc").unwrap().is_none());

        fs::write(root.join("x.dvc"), "1").unwrap();
        let first = commit_paths(&repo, &["x.dvc".into()], &[], "x1", &Author::default()).unwrap();
        fs::write(root.join("y.dvc"), "1").unwrap();
        commit_paths(&repo, &["y.dvc".into()], &[], "y1", &Author::default()).unwrap();

        let t = last_modified(&repo, "x.dvc").unwrap().unwrap();
        assert_eq!(t.seconds(), repo.find_commit(first).unwrap().time().seconds());
    }

    #[test]
    fn commit_dirs_skips_ignored_files() {
        let remote = seeded_remote();
        let td = tempfile::tempdir().unwrap();
        let url = RepoUrl::new(remote.url.clone());
        let repo = clone_checkout(&url, &td.path().join("repo")).unwrap();
        let root = repo.workdir().unwrap().to_path_buf();

        fs::write(root.join(".dvc/.gitignore"), "/tmp\n").unwrap();
        fs::create_dir_all(root.join(".dvc/tmp")).unwrap();
        fs::write(root.join(".dvc/tmp/lock"), "x").unwrap();
        let oid = commit_dirs(&repo, &[".dvc"], "dvc layout", &Author::default()).unwrap();

        let tree = repo.find_commit(oid).unwrap().tree().unwrap();
        assert!(tree.get_path(Path::new(".dvc/.gitignore")).is_ok());
        assert!(tree.get_path(Path::new(".dvc/config")).is_ok());
        assert!(tree.get_path(Path::new(".dvc/tmp/lock")).is_err());
    }

    #[test]
    fn clone_of_missing_repository_fails() {
        let td = tempfile::tempdir().unwrap();
        let url = RepoUrl::new(td.path().join("nope.git").display().to_string());
        assert!(clone_checkout(&url, &td.path().join("repo")).is_err());
    }
}
