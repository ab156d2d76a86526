//! Loading compiled modules.
//!
//! The cache only needs a handle it can clone and hand out; what "loading"
//! means is up to the [`Loader`]. [`ArtifactLoader`] resolves the compiled
//! library inside an entry directory without opening it.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Extensions recognized as compiled module artifacts.
pub const ARTIFACT_EXTENSIONS: &[&str] = &["so", "dylib", "dll", "pyd"];

/// How deep below the entry directory artifacts are searched for.
const SEARCH_DEPTH: usize = 4;

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("no compiled artifact for module '{name}' in {dir}")]
  NoArtifact { name: String, dir: PathBuf },

  #[error("failed to load {path}: {message}")]
  Failed { path: PathBuf, message: String },

  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Turns a complete module directory into a usable handle.
pub trait Loader: Send + Sync {
  type Handle: Clone + Send + Sync;

  fn load(&self, module_dir: &Path, name: &str) -> Result<Self::Handle, LoadError>;
}

/// A located module artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
  pub name: String,
  /// Directory the module was loaded from.
  pub dir: PathBuf,
  /// The compiled library.
  pub artifact: PathBuf,
}

/// Finds `<name>.<ext>` or `lib<name>.<ext>` (any suffix after the name is
/// allowed, as in `name.cpython-312-x86_64-linux-gnu.so`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactLoader;

fn is_artifact_for(path: &Path, name: &str) -> bool {
  let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
    return false;
  };
  if !ARTIFACT_EXTENSIONS.contains(&ext) {
    return false;
  }
  let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
    return false;
  };
  let stem = file_name.strip_prefix("lib").unwrap_or(file_name);
  [file_name, stem]
    .iter()
    .any(|candidate| candidate.strip_prefix(name).is_some_and(|rest| rest.starts_with('.')))
}

impl Loader for ArtifactLoader {
  type Handle = LoadedModule;

  fn load(&self, module_dir: &Path, name: &str) -> Result<LoadedModule, LoadError> {
    for dirent in WalkDir::new(module_dir).max_depth(SEARCH_DEPTH).sort_by_file_name() {
      let dirent = dirent.map_err(|err| LoadError::Io {
        path: module_dir.to_path_buf(),
        source: err.into(),
      })?;
      if dirent.file_type().is_file() && is_artifact_for(dirent.path(), name) {
        debug!(name = %name, artifact = ?dirent.path(), "found module artifact");
        return Ok(LoadedModule {
          name: name.to_string(),
          dir: module_dir.to_path_buf(),
          artifact: dirent.into_path(),
        });
      }
    }

    Err(LoadError::NoArtifact {
      name: name.to_string(),
      dir: module_dir.to_path_buf(),
    })
  }
}
