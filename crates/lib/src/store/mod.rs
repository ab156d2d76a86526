//! Disk cache of published modules.
//!
//! # Layout
//!
//! ```text
//! <cache_root>/
//! ├── <name>.lock               # per-module lock file
//! └── <name>/                   # cache entry
//!     ├── <sources and generated files>
//!     ├── <compiled artifact>
//!     ├── compile.log
//!     ├── <name>.checksum       # compilation checksum
//!     └── finished_copying      # completion marker, written last
//! ```
//!
//! An entry directory without its completion marker is never considered
//! present. The marker is written only after every file has been copied, so a
//! lock-free reader may observe a half-published entry but never trust it.

pub mod inspect;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::{COMPLETE_MARKER, LOCK_EXT};
use crate::util::fs::copy_dir_all;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("cannot publish non-existing directory {0}")]
  MissingWorkingDir(PathBuf),

  #[error("failed to copy {from} into cache at {to}: {source}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write completion marker in {path}: {source}")]
  WriteMarker {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to remove {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read cache directory: {0}")]
  ReadDir(#[from] io::Error),
}

/// Result of looking for an entry on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
  /// A complete entry at the given directory.
  Found(PathBuf),
  Missing,
}

/// Result of publishing a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
  /// The working directory is now the cache entry at this path.
  Fresh(PathBuf),
  /// Another builder published this entry first; it was left untouched.
  AlreadyPresent(PathBuf),
}

impl Published {
  pub fn path(&self) -> &Path {
    match self {
      Published::Fresh(path) | Published::AlreadyPresent(path) => path,
    }
  }
}

/// A directory found in the cache root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub name: String,
  pub path: PathBuf,
  pub complete: bool,
}

/// A publish staging directory in the cache root.
///
/// Publishing copies into `.<name>-<random>` before renaming it into place,
/// so one of these outliving its publisher means the publisher died.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingDir {
  pub name: String,
  pub path: PathBuf,
}

/// Whether `entry_dir` carries a completion marker.
pub fn is_complete(entry_dir: &Path) -> bool {
  entry_dir.join(COMPLETE_MARKER).is_file()
}

#[derive(Debug, Clone)]
pub struct DiskCache {
  root: PathBuf,
  local_dir: Option<PathBuf>,
}

impl DiskCache {
  pub fn new(root: PathBuf) -> Self {
    Self { root, local_dir: None }
  }

  /// Also look for entries under `dir` (checked before the cache root).
  ///
  /// This lets a module built in the caller's directory be reused without
  /// touching the shared cache.
  pub fn with_local_dir(mut self, dir: PathBuf) -> Self {
    self.local_dir = Some(dir);
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn entry_path(&self, name: &str) -> PathBuf {
    self.root.join(name)
  }

  /// Look for a complete entry named `name`.
  pub fn probe(&self, name: &str) -> Probe {
    for base in self.local_dir.iter().chain(std::iter::once(&self.root)) {
      let entry = base.join(name);
      if is_complete(&entry) {
        debug!(name = %name, path = ?entry, "found module on disk");
        return Probe::Found(entry);
      }
      if entry.is_dir() {
        debug!(name = %name, path = ?entry, "ignoring entry without completion marker");
      }
    }
    Probe::Missing
  }

  /// Copy `working_dir` into the cache as `name` and mark it complete.
  ///
  /// Must be called while holding the module's lock. If a complete entry
  /// already exists another builder won the race; the existing entry is kept.
  pub fn publish(&self, working_dir: &Path, name: &str) -> Result<Published, StoreError> {
    let dest = self.entry_path(name);

    if is_complete(&dest) {
      warn!(
        path = ?dest,
        "module already exists in cache but wasn't found previously, keeping the existing entry"
      );
      return Ok(Published::AlreadyPresent(dest));
    }

    if !working_dir.is_dir() {
      return Err(StoreError::MissingWorkingDir(working_dir.to_path_buf()));
    }

    if dest.exists() {
      warn!(path = ?dest, "removing incomplete cache entry");
      fs::remove_dir_all(&dest).map_err(|source| StoreError::Remove {
        path: dest.clone(),
        source,
      })?;
    }

    fs::create_dir_all(&self.root).map_err(|source| StoreError::Copy {
      from: working_dir.to_path_buf(),
      to: dest.clone(),
      source,
    })?;

    // Copy next to the destination first so the entry appears in one rename.
    let copy_err = |source| StoreError::Copy {
      from: working_dir.to_path_buf(),
      to: dest.clone(),
      source,
    };
    let staging = tempfile::Builder::new()
      .prefix(&format!(".{}-", name))
      .tempdir_in(&self.root)
      .map_err(copy_err)?;
    debug!(from = ?working_dir, to = ?dest, "copying built module into cache");
    copy_dir_all(working_dir, staging.path()).map_err(copy_err)?;
    fs::rename(staging.path(), &dest).map_err(copy_err)?;
    // The staging path no longer exists, so dropping the handle removes nothing.
    drop(staging);

    let marker = dest.join(COMPLETE_MARKER);
    fs::File::create(&marker)
      .and_then(|file| file.sync_all())
      .map_err(|source| StoreError::WriteMarker { path: dest.clone(), source })?;

    info!(name = %name, path = ?dest, "published module");
    Ok(Published::Fresh(dest))
  }

  /// All entry directories in the cache root, sorted by name.
  ///
  /// Lock files and publish staging directories are skipped.
  pub fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
    if !self.root.is_dir() {
      return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dirent in fs::read_dir(&self.root)? {
      let dirent = dirent?;
      let path = dirent.path();
      if !path.is_dir() {
        continue;
      }
      let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
        continue;
      };
      if name.starts_with('.') {
        continue;
      }
      entries.push(CacheEntry {
        complete: is_complete(&path),
        name,
        path,
      });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
  }

  /// Names of all complete entries.
  pub fn cached_modules(&self) -> Result<Vec<String>, StoreError> {
    Ok(
      self
        .entries()?
        .into_iter()
        .filter(|entry| entry.complete)
        .map(|entry| entry.name)
        .collect(),
    )
  }

  /// Remove an entry. Must be called under the module's lock.
  ///
  /// The lock file stays; it is still held by the caller.
  pub fn remove(&self, name: &str) -> Result<(), StoreError> {
    let dest = self.entry_path(name);
    if dest.exists() {
      // Drop the marker first so readers stop trusting the entry immediately.
      let marker = dest.join(COMPLETE_MARKER);
      if marker.exists() {
        fs::remove_file(&marker).map_err(|source| StoreError::Remove {
          path: marker.clone(),
          source,
        })?;
      }
      fs::remove_dir_all(&dest).map_err(|source| StoreError::Remove { path: dest, source })?;
    }
    Ok(())
  }

  /// Publish staging directories, sorted by module name.
  ///
  /// A live publisher holds the module's lock for as long as its staging
  /// directory exists, so any of these seen while holding that lock is stale.
  pub fn staging_dirs(&self) -> Result<Vec<StagingDir>, StoreError> {
    if !self.root.is_dir() {
      return Ok(Vec::new());
    }

    let mut staging = Vec::new();
    for dirent in fs::read_dir(&self.root)? {
      let path = dirent?.path();
      if !path.is_dir() {
        continue;
      }
      let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        continue;
      };
      if let Some((name, _)) = file_name.strip_prefix('.').and_then(|rest| rest.rsplit_once('-'))
        && !name.is_empty()
      {
        staging.push(StagingDir {
          name: name.to_string(),
          path: path.clone(),
        });
      }
    }

    staging.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    Ok(staging)
  }

  /// Remove a staging directory. Must be called under its module's lock.
  pub fn remove_staging(&self, staging: &StagingDir) -> Result<(), StoreError> {
    match fs::remove_dir_all(&staging.path) {
      Ok(()) => {
        debug!(name = %staging.name, path = ?staging.path, "removed stale staging directory");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StoreError::Remove {
        path: staging.path.clone(),
        source,
      }),
    }
  }

  /// Lock files whose entry directory no longer exists.
  pub fn stray_lock_files(&self) -> Result<Vec<PathBuf>, StoreError> {
    if !self.root.is_dir() {
      return Ok(Vec::new());
    }

    let mut stray = Vec::new();
    for dirent in fs::read_dir(&self.root)? {
      let path = dirent?.path();
      if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXT) {
        continue;
      }
      if let Some(stem) = path.file_stem()
        && !self.root.join(stem).exists()
      {
        stray.push(path);
      }
    }
    stray.sort();
    Ok(stray)
  }
}
