use percent_encoding::percent_decode_str;
use std::env;
use url::Url;

use super::DvcFs;
use crate::client::Client;
use crate::config::{Settings, load_settings};
use crate::error::{Error, Result};
use crate::repo_url::{Credentials, RepoUrl};

pub const SCHEME: &str = "dvc";

/// Environment variable consulted when the URL carries no token.
pub const TOKEN_ENV: &str = "GIT_TOKEN";

fn invalid(url: &str, reason: &str) -> Error {
    let shown = match Url::parse(url) {
        Ok(mut u) if !u.username().is_empty() => {
            let _ = u.set_password(None);
            let _ = u.set_username("***");
            u.to_string()
        }
        _ => url.to_string(),
    };
    Error::InvalidUrl {
        url: shown,
        reason: reason.to_string(),
    }
}

/// Translate `dvc://[TOKEN@]host/owner/repo` into a git address.
///
/// - The token `ssh` selects `git@host:owner/repo.git`.
/// - Any other token is used as HTTPS credentials.
/// - Without a token, `$GIT_TOKEN` is used when set, and the URL stays
///   anonymous otherwise.
///
/// # Errors
/// Returns `Error::InvalidUrl` for another scheme, a missing host, owner or
/// repository name, or extra path segments.
pub fn parse_fs_url(fs_url: &str) -> Result<RepoUrl> {
    let u = Url::parse(fs_url).map_err(|e| invalid(fs_url, &e.to_string()))?;
    if u.scheme() != SCHEME {
        return Err(invalid(fs_url, "expected the dvc:// scheme"));
    }
    let host = match u.host_str() {
        Some(h) if !h.is_empty() => h,
        _ => return Err(invalid(fs_url, "missing host")),
    };
    let authority = match u.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let segs: Vec<&str> = u
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let (owner, name) = match segs.as_slice() {
        [owner, name] => (*owner, *name),
        [] | [_] => return Err(invalid(fs_url, "missing owner or repository name")),
        _ => return Err(invalid(fs_url, "subdirectories are not supported")),
    };

    let mut username = decode(u.username());
    if username.is_empty() {
        username = env::var(TOKEN_ENV).unwrap_or_default();
    }
    let password = u.password().map(decode).unwrap_or_default();

    if username == "ssh" {
        return Ok(RepoUrl::new(format!("git@{}:{}/{}.git", host, owner, name)));
    }

    let https = RepoUrl::new(format!("https://{}/{}/{}", authority, owner, name));
    if username.is_empty() {
        return Ok(https);
    }
    Ok(https.with_credentials(&Credentials { username, password }))
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Open a [`DvcFs`] from a `dvc://` URL with the settings from
/// [`load_settings`]; see [`parse_fs_url`].
pub fn open_fs(fs_url: &str) -> Result<DvcFs> {
    open_fs_with(fs_url, load_settings()?)
}

pub fn open_fs_with(fs_url: &str, settings: Settings) -> Result<DvcFs> {
    let repo = parse_fs_url(fs_url)?;
    Ok(DvcFs::new(Client::builder(repo).settings(settings).build()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_token() {
        unsafe { env::remove_var(TOKEN_ENV) };
    }

    #[test]
    #[serial]
    fn token_in_url_becomes_https_credentials() {
        clear_token();
        let repo = parse_fs_url("dvc://abc123@github.com/acme/data").unwrap();
        assert_eq!(repo.as_str(), "https://abc123@github.com/acme/data");
        assert_eq!(repo.credentials().unwrap().username, "abc123");
    }

    #[test]
    #[serial]
    fn anonymous_url_without_env_token() {
        clear_token();
        let repo = parse_fs_url("dvc://github.com/acme/data").unwrap();
        assert_eq!(repo.as_str(), "https://github.com/acme/data");
        assert!(repo.credentials().is_none());
    }

    #[test]
    #[serial]
    fn env_token_fills_in() {
        unsafe { env::set_var(TOKEN_ENV, "from-env") };
        let repo = parse_fs_url("dvc://git.example.org:8443/acme/data/").unwrap();
        clear_token();
        assert_eq!(repo.as_str(), "https://from-env@git.example.org:8443/acme/data");
    }

    #[test]
    #[serial]
    fn ssh_token_selects_scp_address() {
        clear_token();
        let repo = parse_fs_url("dvc://ssh@github.com/acme/data").unwrap();
        assert_eq!(repo.as_str(), "git@github.com:acme/data.git");
    }

    #[test]
    #[serial]
    fn malformed_urls_are_rejected() {
        clear_token();
        for bad in [
            "https://github.com/acme/data",
            "dvc://github.com/acme",
            "dvc://github.com/",
            "dvc://github.com/acme/data/sub",
            "not a url",
        ] {
            let err = parse_fs_url(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidUrl { .. }), "{bad}: {err}");
        }
    }

    #[test]
    #[serial]
    fn invalid_url_error_is_redacted() {
        let err = parse_fs_url("dvc://tok@github.com/acme").unwrap_err();
        assert!(!err.to_string().contains("tok@"));
    }

    #[test]
    #[serial]
    fn open_fs_is_lazy() {
        clear_token();
        let dfs = open_fs_with("dvc://github.com/acme/data", Settings::default()).unwrap();
        assert_eq!(dfs.client().repo_url().as_str(), "https://github.com/acme/data");
        assert!(dfs.client().checkout_path().is_none());
    }
}
