//! Keeping failed builds around for inspection.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::util::fs::copy_dir_all;

#[derive(Debug, Error)]
pub enum QuarantineError {
  #[error("failed to remove previous quarantine {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to copy {from} into quarantine at {to}: {source}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Copy a failed working directory to `error_root/<name>`.
///
/// A previous quarantine of the same module is replaced, so the directory
/// always shows the most recent failure. The copy is made next to the
/// destination and swapped in only once complete; if copying fails the
/// previous quarantine is left as it was. Callers hold the module's lock on
/// `error_root`.
pub fn quarantine(working_dir: &Path, error_root: &Path, name: &str) -> Result<PathBuf, QuarantineError> {
  let dest = error_root.join(name);
  let copy_err = |source| QuarantineError::Copy {
    from: working_dir.to_path_buf(),
    to: dest.clone(),
    source,
  };

  fs::create_dir_all(error_root).map_err(copy_err)?;
  let staging = tempfile::Builder::new()
    .prefix(&format!(".{}-", name))
    .tempdir_in(error_root)
    .map_err(copy_err)?;
  copy_dir_all(working_dir, staging.path()).map_err(copy_err)?;

  if dest.exists() {
    warn!(path = ?dest, "replacing previous failed build");
    fs::remove_dir_all(&dest).map_err(|source| QuarantineError::Remove {
      path: dest.clone(),
      source,
    })?;
  }

  fs::rename(staging.path(), &dest).map_err(copy_err)?;
  drop(staging);

  info!(name = %name, path = ?dest, "quarantined failed build");
  Ok(dest)
}
