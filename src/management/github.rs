use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use std::env;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variables searched, in order, for a personal access token.
pub const TOKEN_ENV_VARS: &[&str] = &["GITHUB_TOKEN", "DVC_GITHUB_REPO_TOKEN"];

/// `explicit` if given, else the first of [`TOKEN_ENV_VARS`] that is set.
///
/// # Errors
/// Returns `Error::MissingGithubToken` listing the variables searched.
pub fn resolve_token(explicit: Option<&str>) -> Result<String> {
    if let Some(tok) = explicit {
        return Ok(tok.to_string());
    }
    TOKEN_ENV_VARS
        .iter()
        .find_map(|var| env::var(var).ok())
        .ok_or_else(|| Error::MissingGithubToken(TOKEN_ENV_VARS.to_vec()))
}

#[derive(Serialize)]
struct CreateRepo<'a> {
    name: &'a str,
    private: bool,
    auto_init: bool,
}

/// The few GitHub REST endpoints needed to provision repositories.
pub struct GithubApi {
    http: Client,
    base: String,
}

impl GithubApi {
    /// Client authenticated with `token` against `base_url`
    /// (`https://api.github.com` for github.com).
    pub fn new(token: &str, base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("dvcfs"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| Error::Config("GitHub token is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a private, auto-initialized repository in organization `org`.
    pub fn create_org_repo(&self, org: &str, name: &str) -> Result<()> {
        debug!(org, name, "create GitHub repository");
        let url = format!("{}/orgs/{}/repos", self.base, org);
        let body = CreateRepo {
            name,
            private: true,
            auto_init: true,
        };
        self.http.post(url).json(&body).send()?.error_for_status()?;
        Ok(())
    }

    pub fn delete_repo(&self, owner: &str, name: &str) -> Result<()> {
        debug!(owner, name, "delete GitHub repository");
        let url = format!("{}/repos/{}/{}", self.base, owner, name);
        self.http.delete(url).send()?.error_for_status()?;
        Ok(())
    }
}
