//! Filesystem helpers for staging and copying module directories.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Recursively copy the contents of `src` into `dst`, creating `dst` if needed.
///
/// Symlinks are copied as the files they point to. Returns the relative paths
/// of all copied files.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<Vec<PathBuf>> {
  std::fs::create_dir_all(dst)?;

  let mut copied = Vec::new();
  for entry in WalkDir::new(src).follow_links(true).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }

    let target = dst.join(rel);
    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&target)?;
    } else if entry.file_type().is_file() {
      if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::copy(entry.path(), &target)?;
      copied.push(rel.to_path_buf());
    }
  }

  Ok(copied)
}

/// Copy `files` (relative to `source`) into `dest`.
///
/// Existing files in `dest` are replaced with a warning. A missing source
/// file is an error. Copying a directory onto itself is a no-op.
pub fn copy_files(source: &Path, dest: &Path, files: &[String]) -> io::Result<()> {
  if dest.exists() {
    let overwriting: Vec<&String> = files.iter().filter(|f| dest.join(f).exists()).collect();
    if !overwriting.is_empty() {
      warn!(path = ?dest, files = ?overwriting, "path already exists, overwriting existing files");
    }
  } else {
    std::fs::create_dir_all(dest)?;
  }

  if source == dest {
    return Ok(());
  }

  debug!(files = ?files, from = ?source, to = ?dest, "copying files");
  for file in files {
    if Path::new(file).is_absolute() {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("input file '{}' must be relative to the source directory", file),
      ));
    }

    let from = source.join(file);
    let to = dest.join(file);
    if !from.is_file() {
      return Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("missing source file '{}'", from.display()),
      ));
    }
    if let Some(parent) = to.parent() {
      std::fs::create_dir_all(parent)?;
    }
    if to.is_file() {
      std::fs::remove_file(&to)?;
    }
    std::fs::copy(&from, &to)?;
  }

  Ok(())
}
