//! Provisioning of DVC repositories hosted on GitHub.
//!
//! [`create_github_dvc_repo`] creates the repository through the GitHub
//! API, lays out DVC in it pointing at a [`RemoteStorage`], and returns a
//! [`GithubDvcRepo`] giving filesystem access to it.

mod github;
mod remotes;
mod s3;

pub use github::{GithubApi, TOKEN_ENV_VARS, resolve_token};
pub use remotes::{ExternalRemote, LocalRemote, RemoteStorage};
pub use s3::{DEFAULT_REGION, S3Credentials, S3Remote};

use sha2::{Digest, Sha256};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::client::Client;
use crate::config::Settings;
use crate::dvc::{DvcBackend, DvcCli};
use crate::error::{Error, Result};
use crate::fs::DvcFs;
use crate::git;
use crate::repo_url::{Credentials, RepoUrl};
use crate::transfer::{CommitOptions, Transfer};

/// Name of the default DVC remote configured in new repositories.
pub const STORAGE_REMOTE: &str = "storage";

const INIT_MESSAGE: &str = "Create new DVC repository (dvcfs)";
const INITIAL_FILES_MESSAGE: &str = "Commit initial files (dvcfs)";

/// Parameters for [`create_github_dvc_repo`].
pub struct NewRepo {
    pub owner: String,
    pub name: String,
    /// Delete the GitHub repository and the storage on
    /// [`GithubDvcRepo::destroy`].
    pub temporary: bool,
    /// Skip the creation call; the repository is already on GitHub.
    pub repo_exists: bool,
    pub remote: Option<Box<dyn RemoteStorage>>,
    /// Extra `dvc remote modify` options for the storage remote.
    pub remote_options: Vec<(String, String)>,
    pub initial_files: Vec<Transfer>,
    /// Falls back to [`resolve_token`] when `None`.
    pub token: Option<String>,
}

impl NewRepo {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            temporary: false,
            repo_exists: false,
            remote: None,
            remote_options: Vec::new(),
            initial_files: Vec::new(),
            token: None,
        }
    }

    /// A temporary repository named `prefix` plus a random suffix.
    pub fn temporary(owner: impl Into<String>, prefix: &str) -> Self {
        Self {
            temporary: true,
            ..Self::new(owner, format!("{}{}", prefix, random_suffix()))
        }
    }

    /// A temporary repository whose DVC data lives in a fresh S3 bucket.
    /// The bucket is named after the random suffix of the repository.
    pub fn temporary_with_s3(owner: impl Into<String>, prefix: &str) -> Self {
        let suffix = random_suffix();
        Self {
            temporary: true,
            remote: Some(Box::new(S3Remote::new(suffix.as_str()))),
            ..Self::new(owner, format!("{}{}", prefix, suffix))
        }
    }
}

/// 20 lowercase hex characters, unique per process and instant.
fn random_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let digest = Sha256::digest(format!("{}-{}", process::id(), nanos));
    hex::encode(digest)[..20].to_string()
}

/// A DVC repository hosted on GitHub.
pub struct GithubDvcRepo {
    pub owner: String,
    pub name: String,
    pub temporary: bool,
    fs: DvcFs,
    api: GithubApi,
    remote: Option<Box<dyn RemoteStorage>>,
}

impl GithubDvcRepo {
    pub fn fs(&mut self) -> &mut DvcFs {
        &mut self.fs
    }

    /// Close the filesystem. For a temporary repository, also delete the
    /// remote storage and the GitHub repository.
    pub fn destroy(mut self) -> Result<()> {
        self.fs.client_mut().close()?;
        if !self.temporary {
            return Ok(());
        }
        info!(owner = %self.owner, name = %self.name, "Remove temporary DVC repository");
        if let Some(remote) = &self.remote {
            remote.remove()?;
        }
        self.api.delete_repo(&self.owner, &self.name)
    }
}

/// Create a GitHub repository and initialize DVC in it.
///
/// Steps: create the repository (unless `repo_exists`), clone it with the
/// token, `dvc init`, configure [`STORAGE_REMOTE`] as the default remote,
/// commit and push `.dvc`, then upload `initial_files` if any.
///
/// # Errors
/// - `Error::MissingGithubToken` if no token can be found.
/// - `Error::Github` if an API call fails.
/// - `Error::RepoNotAccessible`, `Error::Git` or `Error::Dvc` if setting
///   up the clone fails.
pub fn create_github_dvc_repo(req: NewRepo, settings: &Settings) -> Result<GithubDvcRepo> {
    let token = resolve_token(req.token.as_deref())?;
    let api = GithubApi::new(&token, &settings.github_api_url)?;
    let url = RepoUrl::new(format!("https://github.com/{}/{}.git", req.owner, req.name))
        .with_credentials(&Credentials::token(token));
    provision(api, url, req, settings, &|| -> Box<dyn DvcBackend> {
        Box::new(DvcCli::new(settings))
    })
}

fn provision(
    api: GithubApi,
    url: RepoUrl,
    req: NewRepo,
    settings: &Settings,
    make_dvc: &dyn Fn() -> Box<dyn DvcBackend>,
) -> Result<GithubDvcRepo> {
    if req.repo_exists {
        debug!(name = %req.name, "repository exists; not creating it");
    } else {
        info!(owner = %req.owner, name = %req.name, "Create new repository");
        api.create_org_repo(&req.owner, &req.name)?;
    }

    init_layout(&url, &req, settings, &*make_dvc())?;

    let client = Client::builder(url)
        .settings(settings.clone())
        .dvc_backend(make_dvc())
        .build();
    let mut fs = DvcFs::new(client);
    if !req.initial_files.is_empty() {
        let opts = CommitOptions {
            message: Some(INITIAL_FILES_MESSAGE.to_string()),
            extra: None,
        };
        let report = fs.client_mut().update_with(req.initial_files, &opts)?;
        if let Some(failed) = report.outcomes.into_iter().find_map(|o| o.result.err()) {
            return Err(failed);
        }
    }

    Ok(GithubDvcRepo {
        owner: req.owner,
        name: req.name,
        temporary: req.temporary,
        fs,
        api,
        remote: req.remote,
    })
}

/// Clone `url` into a scratch directory, lay out DVC and push it.
fn init_layout(url: &RepoUrl, req: &NewRepo, settings: &Settings, dvc: &dyn DvcBackend) -> Result<()> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("dvcfs-init-");
    let scratch = match &settings.temp_dir {
        Some(dir) => builder.tempdir_in(dir)?,
        None => builder.tempdir()?,
    };
    let root = scratch.path().join("repo");

    debug!(repo = %url, "Clone created repository");
    let repo = git::clone_checkout(url, &root).map_err(|source| Error::RepoNotAccessible {
        repo: url.redacted(),
        source,
    })?;

    debug!("Init DVC storage");
    dvc.init(&root)?;
    if let Some(remote) = &req.remote {
        remote.init_storage()?;
        dvc.remote_add_default(&root, STORAGE_REMOTE, &remote.url())?;
        for (key, value) in &req.remote_options {
            dvc.remote_modify(&root, STORAGE_REMOTE, key, value)?;
        }
    }

    debug!("Commit");
    git::commit_dirs(&repo, &[".dvc"], INIT_MESSAGE, &settings.author)?;
    debug!("Git push");
    git::push_head(&repo, url)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileSystem;
    use crate::testutil::{FakeDvc, plain_remote};
    use git2::Repository;
    use httpmock::prelude::*;
    use std::fs;
    use std::path::Path;

    #[test]
    fn temporary_names_get_a_suffix() {
        let a = NewRepo::temporary("acme", "tmp-");
        assert!(a.temporary);
        assert!(a.name.starts_with("tmp-"));
        assert_eq!(a.name.len(), "tmp-".len() + 20);
    }

    #[test]
    fn s3_temporary_repo_shares_its_suffix_with_the_bucket() {
        let req = NewRepo::temporary_with_s3("acme", "tmp-");
        assert!(req.temporary);
        let suffix = req.name.strip_prefix("tmp-").unwrap();
        assert_eq!(suffix.len(), 20);
        let remote = req.remote.as_ref().unwrap();
        assert_eq!(remote.url(), format!("s3://{}/dvc", suffix));
    }

    #[test]
    fn provision_creates_the_s3_bucket_before_pointing_dvc_at_it() {
        let remote = plain_remote();
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/orgs/acme/repos");
            then.status(201);
        });
        let head = server.mock(|when, then| {
            when.method(httpmock::Method::HEAD).path("/bucket01");
            then.status(404);
        });
        let create = server.mock(|when, then| {
            when.method(PUT).path("/bucket01");
            then.status(200);
        });

        let mut req = NewRepo::new("acme", "data");
        req.remote = Some(Box::new(
            S3Remote::new("bucket01")
                .endpoint(server.base_url())
                .credentials(S3Credentials::new("AKID", "secret")),
        ));
        let dvc = FakeDvc::new(&remote.store);
        let api = GithubApi::new("tok", &server.base_url()).unwrap();
        let repo = provision(
            api,
            RepoUrl::new(remote.url.clone()),
            req,
            &Settings::default(),
            &|| -> Box<dyn DvcBackend> { Box::new(dvc.clone()) },
        )
        .unwrap();
        head.assert();
        create.assert();

        let bare = Repository::open_bare(&remote.bare).unwrap();
        let tree = bare.head().unwrap().peel_to_tree().unwrap();
        let entry = tree.get_path(Path::new(".dvc/config")).unwrap();
        let blob = bare.find_blob(entry.id()).unwrap();
        let text = std::str::from_utf8(blob.content()).unwrap();
        assert!(text.contains("url = s3://bucket01/dvc"));
        repo.destroy().unwrap();
    }

    #[test]
    fn provision_lays_out_dvc_and_uploads_initial_files() {
        let remote = plain_remote();
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST).path("/orgs/acme/repos");
            then.status(201);
        });
        let delete = server.mock(|when, then| {
            when.method(DELETE).path("/repos/acme/data");
            then.status(204);
        });

        let td = tempfile::tempdir().unwrap();
        let storage = td.path().join("storage");
        let local = td.path().join("seed.txt");
        fs::write(&local, "seed").unwrap();

        let mut req = NewRepo::new("acme", "data");
        req.temporary = true;
        req.remote = Some(Box::new(LocalRemote::new(&storage)));
        req.remote_options = vec![("timeout".into(), "30".into())];
        req.initial_files = vec![Transfer::upload("init/seed.txt", &local)];

        let dvc = FakeDvc::new(&remote.store);
        let api = GithubApi::new("tok", &server.base_url()).unwrap();
        let mut repo = provision(
            api,
            RepoUrl::new(remote.url.clone()),
            req,
            &Settings::default(),
            &|| -> Box<dyn DvcBackend> { Box::new(dvc.clone()) },
        )
        .unwrap();
        create.assert();
        assert!(storage.is_dir());

        assert_eq!(repo.fs().read_text("init/seed.txt").unwrap(), "seed");

        let bare = Repository::open_bare(&remote.bare).unwrap();
        let tip = bare.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(tip.message(), Some(INITIAL_FILES_MESSAGE));
        let layout = tip.parent(0).unwrap();
        assert_eq!(layout.message(), Some(INIT_MESSAGE));
        let config = layout.tree().unwrap();
        let entry = config.get_path(Path::new(".dvc/config")).unwrap();
        let blob = bare.find_blob(entry.id()).unwrap();
        let text = std::str::from_utf8(blob.content()).unwrap();
        assert!(text.contains(&storage.display().to_string()));
        assert!(text.contains("timeout = 30"));

        repo.destroy().unwrap();
        delete.assert();
        assert!(!storage.exists());
    }

    #[test]
    fn existing_repository_is_not_created_again() {
        let remote = plain_remote();
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST).path("/orgs/acme/repos");
            then.status(500);
        });

        let mut req = NewRepo::new("acme", "data");
        req.repo_exists = true;
        let dvc = FakeDvc::new(&remote.store);
        let api = GithubApi::new("tok", &server.base_url()).unwrap();
        let mut repo = provision(
            api,
            RepoUrl::new(remote.url.clone()),
            req,
            &Settings::default(),
            &|| -> Box<dyn DvcBackend> { Box::new(dvc.clone()) },
        )
        .unwrap();
        create.assert_hits(0);
        assert!(repo.fs().walk_files("/").unwrap().is_empty());
        repo.destroy().unwrap();
    }
}
