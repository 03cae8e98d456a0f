use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// sqlcmd binary used to talk to the server
    #[serde(default = "default_sqlcmd_bin")]
    pub sqlcmd_bin: String,
    /// Seconds to wait for a login; sqlcmd's default when unset
    #[serde(default)]
    pub login_timeout: Option<u32>,
    /// Seconds a single statement may run; unlimited when unset
    #[serde(default)]
    pub query_timeout: Option<u32>,
    /// Appended to the database name for `/DIR` backups
    #[serde(default = "default_backup_extension")]
    pub backup_extension: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sqlcmd_bin: default_sqlcmd_bin(),
            login_timeout: None,
            query_timeout: None,
            backup_extension: default_backup_extension(),
        }
    }
}

pub fn default_sqlcmd_bin() -> String {
    "sqlcmd".to_string()
}

pub fn default_backup_extension() -> String {
    ".db.bak".to_string()
}

/// Config locations tried when no `--config` is given, in order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("sqlbackup").join("config.toml"));
    }

    if let Ok(home) = env::var("HOME") {
        paths.push(
            PathBuf::from(home)
                .join(".config")
                .join("sqlbackup")
                .join("config.toml"),
        );
    }

    paths.push(PathBuf::from("sqlbackup.toml"));
    paths
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Cannot read config file {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("Invalid TOML in {}", path.display()))?;
    Ok(cfg)
}

/// An explicit path must load. Otherwise the default locations are tried
/// in order and a missing file simply means defaults.
pub fn load_config_resolved(cli_path: Option<PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = cli_path {
        let cfg = load_config(&path)?;
        return Ok((cfg, Some(path)));
    }

    for path in default_config_paths() {
        match load_config(&path) {
            Ok(cfg) => return Ok((cfg, Some(path))),
            Err(err) => {
                let not_found = err
                    .downcast_ref::<std::io::Error>()
                    .map(|ioe| ioe.kind() == ErrorKind::NotFound)
                    .unwrap_or(false);
                if not_found {
                    continue;
                }
                // any other error should surface immediately
                return Err(err);
            }
        }
    }

    Ok((Config::default(), None))
}
