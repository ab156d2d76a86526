//! Checksums for module identities and compilation inputs.
//!
//! This module provides:
//! - `Checksum`: a full 64-character SHA-256 digest in lowercase hex
//! - `compute_checksum()`: digest of framed text fields plus the contents of a file set
//! - `hash_file()`: single file hashing
//! - `hash_bytes()`: arbitrary byte hashing
//!
//! File paths never contribute to a checksum, only their bytes do. The file
//! list is sorted before hashing so callers may pass files in any order.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// A full 64-character SHA-256 digest.
///
/// # Format
///
/// The digest is a lowercase hexadecimal string, e.g. `"9f86d081884c7d65..."`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checksum(pub String);

impl Checksum {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Checksum {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while reading a file that takes part in a checksum.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
  #[error("can't open file {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("i/o error reading {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Compute the checksum of `fields` followed by the contents of `files`.
///
/// The encoding is unambiguous: the field and file counts come first, each
/// field is prefixed by its length in bytes (`u64`, little endian) and each
/// file contributes the fixed-size digest of its contents. Moving bytes from
/// one field or file to the next therefore always changes the result.
///
/// Files are visited in sorted path order. An unreadable file fails the whole
/// computation; it is never skipped.
///
/// # Example
///
/// ```
/// use modcache_lib::util::hash::compute_checksum;
///
/// let a = compute_checksum(&["int f() { return 1; }"], &[] as &[&str]).unwrap();
/// let b = compute_checksum(&["int f() { return 1; }", ""], &[] as &[&str]).unwrap();
/// assert_ne!(a, b);
/// ```
pub fn compute_checksum<S: AsRef<str>, P: AsRef<Path>>(fields: &[S], files: &[P]) -> Result<Checksum, ChecksumError> {
  let mut hasher = Sha256::new();
  hasher.update((fields.len() as u64).to_le_bytes());
  hasher.update((files.len() as u64).to_le_bytes());

  for field in fields {
    let bytes = field.as_ref().as_bytes();
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
  }

  let mut sorted: Vec<&Path> = files.iter().map(AsRef::as_ref).collect();
  sorted.sort();

  for path in sorted {
    debug!(path = ?path, "adding file to checksum");
    let mut file_hasher = Sha256::new();
    update_from_file(&mut file_hasher, path)?;
    hasher.update(file_hasher.finalize());
  }

  Ok(Checksum(hex::encode(hasher.finalize())))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<Checksum, ChecksumError> {
  let mut hasher = Sha256::new();
  update_from_file(&mut hasher, path)?;
  Ok(Checksum(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Checksum {
  let mut hasher = Sha256::new();
  hasher.update(data);
  Checksum(hex::encode(hasher.finalize()))
}

fn update_from_file(hasher: &mut Sha256, path: &Path) -> Result<(), ChecksumError> {
  let mut file = fs::File::open(path).map_err(|source| ChecksumError::Open {
    path: path.to_path_buf(),
    source,
  })?;

  let mut buffer = [0u8; 8192];
  loop {
    let bytes_read = file.read(&mut buffer).map_err(|source| ChecksumError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(())
}
