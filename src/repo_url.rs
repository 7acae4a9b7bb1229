use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

/// Username/password pair for HTTPS remotes.
///
/// A personal access token is passed as the username with an empty
/// password, which is what the `https://TOKEN@host/...` form expands to.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            username: token.into(),
            password: String::new(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

/// Address of a git repository configured for DVC.
///
/// Kept verbatim as given: an HTTPS URL (optionally with credentials in the
/// userinfo part), an scp-style ssh address such as
/// `git@github.com:owner/repo.git`, or a local path.
#[derive(Clone, PartialEq, Eq)]
pub struct RepoUrl {
    raw: String,
}

impl RepoUrl {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn parsed(&self) -> Option<Url> {
        Url::parse(&self.raw)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
    }

    /// Credentials embedded in the URL, if any.
    pub fn credentials(&self) -> Option<Credentials> {
        let u = self.parsed()?;
        if u.username().is_empty() {
            return None;
        }
        Some(Credentials {
            username: decode(u.username()),
            password: u.password().map(decode).unwrap_or_default(),
        })
    }

    /// Return a copy with `creds` written into the userinfo part.
    ///
    /// Non-HTTP addresses are returned unchanged; ssh and local remotes do
    /// not carry credentials in the URL.
    pub fn with_credentials(&self, creds: &Credentials) -> Self {
        let Some(mut u) = self.parsed() else {
            return self.clone();
        };
        if u.set_username(&creds.username).is_err() {
            return self.clone();
        }
        let password = (!creds.password.is_empty()).then_some(creds.password.as_str());
        if u.set_password(password).is_err() {
            return self.clone();
        }
        Self::new(u.to_string())
    }

    /// The address with any userinfo replaced by `***`, safe for logs.
    pub fn redacted(&self) -> String {
        match self.parsed() {
            Some(mut u) if !u.username().is_empty() => {
                let _ = u.set_password(None);
                let _ = u.set_username("***");
                u.to_string()
            }
            _ => self.raw.clone(),
        }
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

impl fmt::Debug for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoUrl({})", self.redacted())
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl From<&str> for RepoUrl {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RepoUrl {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_in_url_is_extracted_and_redacted() {
        let u = RepoUrl::new("https://ghp_secret@github.com/acme/data.git");
        let c = u.credentials().unwrap();
        assert_eq!(c.username, "ghp_secret");
        assert_eq!(c.password, "");
        assert_eq!(u.redacted(), "https://***@github.com/acme/data.git");
        assert!(!format!("{:?}", u).contains("ghp_secret"));
    }

    #[test]
    fn ssh_and_local_addresses_are_left_alone() {
        let ssh = RepoUrl::new("git@github.com:acme/data.git");
        assert!(ssh.credentials().is_none());
        assert_eq!(ssh.redacted(), "git@github.com:acme/data.git");

        let local = RepoUrl::new("/srv/git/data.git");
        assert!(local.credentials().is_none());
        assert_eq!(local.with_credentials(&Credentials::token("t")), local);
    }

    #[test]
    fn structured_credentials_land_in_the_url() {
        let u = RepoUrl::new("https://github.com/acme/data.git")
            .with_credentials(&Credentials::token("abc"));
        assert_eq!(u.as_str(), "https://abc@github.com/acme/data.git");

        let u = RepoUrl::new("https://github.com/acme/data.git").with_credentials(&Credentials {
            username: "bot".into(),
            password: "p w".into(),
        });
        let c = u.credentials().unwrap();
        assert_eq!(c.username, "bot");
        assert_eq!(c.password, "p w");
    }
}
