use std::path::PathBuf;

use thiserror::Error;

use crate::build::BuildSystem;
use crate::build::inputs::InputError;
use crate::config::ConfigError;
use crate::lock::LockError;
use crate::store::StoreError;

/// Errors surfaced by [`crate::ModuleCache`].
#[derive(Debug, Error)]
pub enum CacheError {
  #[error(transparent)]
  Input(#[from] InputError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("no builder registered for build system '{0}'")]
  NoBuilder(BuildSystem),

  #[error("failed to stage module '{name}' in {path}: {source}")]
  Stage {
    name: String,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("module '{name}' failed to build with status {status}, see {}", .log_path.display())]
  BuildFailed {
    name: String,
    status: i32,
    /// `compile.log` of the failed build, inside the quarantine when there is one.
    log_path: PathBuf,
    quarantine: Option<PathBuf>,
  },

  #[error("failed to load module '{name}': {source}")]
  Load {
    name: String,
    #[source]
    source: crate::loader::LoadError,
  },
}
