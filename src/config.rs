use semver::VersionReq;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths::config_file;

/// Runtime settings shared by the client, the DVC command layer and the
/// GitHub management helpers.
///
/// Every key is optional; missing keys take the values of
/// [`Settings::default`].
///
/// Example TOML:
/// ```toml
/// dvc_executable = "/opt/dvc/bin/dvc"
/// dvc_version    = ">=3.0.0"
/// temp_dir       = "/var/tmp"
///
/// [author]
/// name  = "data-bot"
/// email = "data-bot@example.com"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dvc_executable: PathBuf,
    pub dvc_version: VersionReq,
    pub check_dvc_version: bool,
    pub temp_dir: Option<PathBuf>,
    pub ignore_clean_errors: bool,
    pub github_api_url: String,
    pub author: Author,
}

/// Identity used for commits when the clone carries no `user.name` /
/// `user.email` of its own.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "dvcfs".to_string(),
            email: "dvcfs@localhost".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dvc_executable: PathBuf::from("dvc"),
            dvc_version: VersionReq::parse(">=2.0.0").unwrap_or(VersionReq::STAR),
            check_dvc_version: true,
            temp_dir: None,
            ignore_clean_errors: true,
            github_api_url: "https://api.github.com".to_string(),
            author: Author::default(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(txt: &str) -> Result<Self> {
        toml::from_str(txt).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read settings from `path`. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(txt) => Self::from_toml_str(&txt)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Load settings from the location resolved by [`config_file`].
///
/// # Errors
/// - Returns `Error::Config` if the file exists but is not valid TOML or
///   contains a malformed version requirement.
/// - Returns `Error::Io` if the file exists but cannot be read.
pub fn load_settings() -> Result<Settings> {
    Settings::from_file(&config_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    #[test]
    fn defaults_accept_modern_dvc() {
        let s = Settings::default();
        assert_eq!(s.dvc_executable, PathBuf::from("dvc"));
        assert!(s.dvc_version.matches(&Version::new(3, 48, 0)));
        assert!(!s.dvc_version.matches(&Version::new(1, 11, 16)));
        assert!(s.ignore_clean_errors);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let s = Settings::from_toml_str(
            r#"
            dvc_version = ">=3.0.0"
            [author]
            name = "bot"
            "#,
        )
        .unwrap();
        assert!(!s.dvc_version.matches(&Version::new(2, 58, 2)));
        assert_eq!(s.author.name, "bot");
        assert_eq!(s.author.email, "dvcfs@localhost");
        assert_eq!(s.github_api_url, "https://api.github.com");
    }

    #[test]
    fn bad_version_requirement_is_a_config_error() {
        let err = Settings::from_toml_str(r#"dvc_version = "three""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let td = tempfile::tempdir().unwrap();
        let s = Settings::from_file(&td.path().join("nope.toml")).unwrap();
        assert!(s.check_dvc_version);
    }
}
