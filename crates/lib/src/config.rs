//! Cache and error directory resolution.
//!
//! Each directory is resolved in priority order:
//! 1. an explicit path from the caller
//! 2. an environment variable (`MODCACHE_CACHE_DIR` / `MODCACHE_ERROR_DIR`)
//! 3. a default under `<base>/.cache/modcache/`
//!
//! `<base>` is the active virtual environment (`VIRTUAL_ENV`, then
//! `CONDA_PREFIX`) if any, otherwise the user's home directory. Under the home
//! directory a runtime tag is appended, since compiled modules are not
//! compatible across runtimes and targets.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::consts::{APP_NAME, CACHE_DIR_ENV, ERROR_DIR_ENV};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("cannot determine home directory (HOME / USERPROFILE not set)")]
  NoHome,

  #[error("failed to create directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Resolved directories for one [`crate::ModuleCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
  /// Shared root holding published entries and lock files.
  pub cache_dir: PathBuf,
  /// Root holding quarantined failed builds.
  pub error_dir: PathBuf,
  /// Directory searched for entries before the cache root, usually the
  /// current working directory.
  pub local_dir: Option<PathBuf>,
}

impl CacheConfig {
  /// Resolve both directories, creating them if necessary.
  ///
  /// The current working directory is used as the local lookup directory.
  pub fn resolve(cache_dir: Option<&Path>, error_dir: Option<&Path>) -> Result<Self, ConfigError> {
    let cache_dir = resolve_dir(cache_dir, CACHE_DIR_ENV, "cache")?;
    let error_dir = resolve_dir(error_dir, ERROR_DIR_ENV, "error")?;
    let local_dir = std::env::current_dir().ok();

    debug!(cache_dir = ?cache_dir, error_dir = ?error_dir, "resolved cache configuration");
    Ok(Self {
      cache_dir,
      error_dir,
      local_dir,
    })
  }

  /// Configuration rooted at explicit directories, without a local lookup directory.
  pub fn at(cache_dir: &Path, error_dir: &Path) -> Result<Self, ConfigError> {
    Ok(Self {
      cache_dir: ensure_dir(cache_dir)?,
      error_dir: ensure_dir(error_dir)?,
      local_dir: None,
    })
  }

  pub fn with_local_dir(mut self, dir: Option<PathBuf>) -> Self {
    self.local_dir = dir;
    self
  }
}

/// Tag separating caches of binary-incompatible targets.
pub fn runtime_tag() -> String {
  format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// The active virtual environment, if one is set.
fn active_env() -> Option<PathBuf> {
  ["VIRTUAL_ENV", "CONDA_PREFIX"]
    .iter()
    .filter_map(|var| std::env::var(var).ok())
    .find(|value| !value.is_empty())
    .map(PathBuf::from)
}

#[cfg(windows)]
fn home_dir() -> Option<PathBuf> {
  std::env::var("USERPROFILE").ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

#[cfg(not(windows))]
fn home_dir() -> Option<PathBuf> {
  std::env::var("HOME").ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// `<base>/.cache/modcache[/<runtime tag>]`.
pub fn app_dir() -> Result<PathBuf, ConfigError> {
  if let Some(env) = active_env() {
    return Ok(env.join(".cache").join(APP_NAME));
  }

  let home = home_dir().ok_or(ConfigError::NoHome)?;
  Ok(home.join(".cache").join(APP_NAME).join(runtime_tag()))
}

pub fn default_cache_dir() -> Result<PathBuf, ConfigError> {
  Ok(app_dir()?.join("cache"))
}

pub fn default_error_dir() -> Result<PathBuf, ConfigError> {
  Ok(app_dir()?.join("error"))
}

fn resolve_dir(explicit: Option<&Path>, env_var: &str, leaf: &str) -> Result<PathBuf, ConfigError> {
  let path = match explicit {
    Some(path) => path.to_path_buf(),
    // An empty variable counts as unset.
    None => match std::env::var(env_var) {
      Ok(value) if !value.is_empty() => PathBuf::from(value),
      _ => app_dir()?.join(leaf),
    },
  };
  ensure_dir(&path)
}

fn ensure_dir(path: &Path) -> Result<PathBuf, ConfigError> {
  std::fs::create_dir_all(path).map_err(|source| ConfigError::CreateDir {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
}
