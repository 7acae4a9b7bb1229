use std::{env, path::PathBuf};

/// Directory holding the dvcfs configuration file.
///
/// Resolves to `$XDG_CONFIG_HOME/dvcfs`, or `$HOME/.config/dvcfs` when the
/// XDG variable is unset.
pub fn config_home() -> PathBuf {
    let xdg = env::var_os("XDG_CONFIG_HOME");
    let base = xdg
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env::var_os("HOME").unwrap_or_default()).join(".config"));
    base.join("dvcfs")
}

/// Location of the settings file.
///
/// `$DVCFS_CONFIG` wins over the default `config_home()/config.toml`.
pub fn config_file() -> PathBuf {
    match env::var_os("DVCFS_CONFIG") {
        Some(p) => PathBuf::from(p),
        None => config_home().join("config.toml"),
    }
}
