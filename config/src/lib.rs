//! Load configuration from XDG `config.toml` and project `.env`, then
//! apply to the process environment with priority:
//! **existing env > .env > XDG**.
//!
//! Also resolves the resolver's runtime directories: the durable data dir
//! (`WEFT_DATA_DIR`) and the per-request run dir (`WEFT_RUN_DIR`), with
//! platform fallbacks.

mod env_file;
mod xdg;

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    EnvFileRead(std::io::Error),
}

/// Loads config from XDG `config.toml` and an optional project `.env`,
/// setting environment variables only for keys **not** already present
/// (existing env always wins).
///
/// Precedence for an unset key:
/// 1. Value from the project `.env` (current directory, or `override_dir`).
/// 2. Value from `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]`.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg::load_env_map(app_name)?;
    let env_map = env_file::load_env_map(override_dir).map_err(LoadError::EnvFileRead)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(env_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        let value = env_map.get(&key).or_else(|| xdg_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

/// The resolver's runtime directories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Durable reader stores (`memory.db`, `tool.db`, `pklres.db`).
    pub data_dir: PathBuf,
    /// Per-request files: session/item stores, stamp, `response.json`.
    pub run_dir: PathBuf,
}

impl RuntimePaths {
    /// Resolves from `WEFT_DATA_DIR` / `WEFT_RUN_DIR`, falling back to the
    /// platform data dir and the system temp dir. Call after
    /// [`load_and_apply`] so `.env`/XDG values are visible.
    pub fn resolve() -> Self {
        let data_dir = std::env::var_os("WEFT_DATA_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::data_local_dir().map(|d| d.join("weft")))
            .unwrap_or_else(|| std::env::temp_dir().join("weft"));
        let run_dir = std::env::var_os("WEFT_RUN_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("weft").join("runs"));
        Self { data_dir, run_dir }
    }
}
