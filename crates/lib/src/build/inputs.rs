//! Build parameters.
//!
//! Two checksums are derived from a [`BuildInputs`]:
//!
//! - the *identity checksum* covers every parameter that affects the compiled
//!   module plus the contents of the user's files, and names the cache entry
//! - the *compilation checksum* covers the staged and generated files plus the
//!   compile and link parameters, and decides whether a working directory
//!   needs to be rebuilt at all
//!
//! File names never enter either checksum, only their contents.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::build::BuildSystem;
use crate::config::runtime_tag;
use crate::identity::{IdentityError, validate_explicit_name};
use crate::util::hash::{Checksum, ChecksumError, compute_checksum};

/// Extensions accepted for `sources`.
pub const SOURCE_EXTENSIONS: &[&str] = &["c", "C", "cpp", "cxx"];

#[derive(Debug, Error)]
pub enum InputError {
  #[error("a module cannot have both an explicit name and a signature")]
  NameAndSignature,

  #[error("source file '{0}' must end in .c, .C, .cpp or .cxx")]
  UnsupportedSource(String),

  #[error("input file not found: {0}")]
  MissingFile(PathBuf),

  #[error(transparent)]
  Name(#[from] IdentityError),

  #[error(transparent)]
  Checksum(#[from] ChecksumError),
}

/// Parameters for one module build.
///
/// Paths in `sources`, `wrap_headers`, `local_headers` and `object_files` are
/// relative to `source_directory` and are copied into the working directory
/// before building.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInputs {
  pub code: String,
  pub init_code: String,
  pub additional_definitions: String,
  pub additional_declarations: String,
  pub sources: Vec<String>,
  pub wrap_headers: Vec<String>,
  pub local_headers: Vec<String>,
  pub system_headers: Vec<String>,
  pub include_dirs: Vec<String>,
  pub library_dirs: Vec<String>,
  pub libraries: Vec<String>,
  pub cppargs: Vec<String>,
  pub lddargs: Vec<String>,
  pub object_files: Vec<String>,
  pub build_system: BuildSystem,
  pub signature: Option<String>,
  pub modulename: Option<String>,
  pub source_directory: PathBuf,
}

fn strings<I, S>(items: I) -> Vec<String>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  items.into_iter().map(|s| s.as_ref().trim().to_string()).collect()
}

impl BuildInputs {
  pub fn new() -> Self {
    Self {
      source_directory: PathBuf::from("."),
      ..Default::default()
    }
  }

  pub fn with_code(mut self, code: impl Into<String>) -> Self {
    self.code = code.into();
    self
  }

  pub fn with_init_code(mut self, code: impl Into<String>) -> Self {
    self.init_code = code.into();
    self
  }

  pub fn with_additional_definitions(mut self, text: impl Into<String>) -> Self {
    self.additional_definitions = text.into();
    self
  }

  pub fn with_additional_declarations(mut self, text: impl Into<String>) -> Self {
    self.additional_declarations = text.into();
    self
  }

  pub fn with_sources<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, files: I) -> Self {
    self.sources = strings(files);
    self
  }

  pub fn with_wrap_headers<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, files: I) -> Self {
    self.wrap_headers = strings(files);
    self
  }

  pub fn with_local_headers<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, files: I) -> Self {
    self.local_headers = strings(files);
    self
  }

  pub fn with_system_headers<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, headers: I) -> Self {
    self.system_headers = strings(headers);
    self
  }

  pub fn with_include_dirs<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, dirs: I) -> Self {
    self.include_dirs = strings(dirs);
    self
  }

  pub fn with_library_dirs<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, dirs: I) -> Self {
    self.library_dirs = strings(dirs);
    self
  }

  pub fn with_libraries<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, libs: I) -> Self {
    self.libraries = strings(libs);
    self
  }

  pub fn with_cppargs<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, args: I) -> Self {
    self.cppargs = strings(args);
    self
  }

  pub fn with_lddargs<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, args: I) -> Self {
    self.lddargs = strings(args);
    self
  }

  pub fn with_object_files<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, files: I) -> Self {
    self.object_files = strings(files);
    self
  }

  pub fn with_build_system(mut self, system: BuildSystem) -> Self {
    self.build_system = system;
    self
  }

  /// Name the module by the checksum of `signature` instead of the inputs.
  pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
    self.signature = Some(signature.into());
    self
  }

  /// Build under a fixed name in the local directory, bypassing the cache.
  pub fn with_modulename(mut self, name: impl Into<String>) -> Self {
    self.modulename = Some(name.into());
    self
  }

  pub fn with_source_directory(mut self, dir: impl Into<PathBuf>) -> Self {
    self.source_directory = dir.into();
    self
  }

  /// Reject inconsistent parameters before anything touches the disk.
  pub fn validate(&self) -> Result<(), InputError> {
    if self.modulename.is_some() && self.signature.is_some() {
      return Err(InputError::NameAndSignature);
    }
    if let Some(name) = &self.modulename {
      validate_explicit_name(name)?;
    }

    for source in &self.sources {
      let ext = Path::new(source).extension().and_then(|e| e.to_str());
      if !ext.is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext)) {
        return Err(InputError::UnsupportedSource(source.clone()));
      }
    }

    for file in self.files_to_copy() {
      let path = self.source_directory.join(&file);
      if !path.is_file() {
        return Err(InputError::MissingFile(path));
      }
    }
    Ok(())
  }

  /// User files whose contents name the module.
  pub fn checksum_files(&self) -> Vec<String> {
    self
      .sources
      .iter()
      .chain(&self.wrap_headers)
      .chain(&self.local_headers)
      .cloned()
      .collect()
  }

  /// User files staged into the working directory.
  pub fn files_to_copy(&self) -> Vec<String> {
    let mut files = self.checksum_files();
    files.extend(self.object_files.iter().cloned());
    files
  }

  /// Text fields of the identity checksum, one per parameter.
  ///
  /// The runtime tag is included so modules built for another target never
  /// share a name.
  pub fn identity_fields(&self) -> Vec<String> {
    vec![
      self.code.clone(),
      self.init_code.clone(),
      self.additional_definitions.clone(),
      self.additional_declarations.clone(),
      list(&self.system_headers),
      list(&self.include_dirs),
      list(&self.library_dirs),
      list(&self.libraries),
      list(&self.cppargs),
      list(&self.lddargs),
      list(&self.object_files),
      self.build_system.to_string(),
      runtime_tag(),
    ]
  }

  /// Checksum naming the module built from these inputs.
  pub fn identity_checksum(&self) -> Result<Checksum, InputError> {
    let files: Vec<PathBuf> = self
      .checksum_files()
      .iter()
      .map(|f| self.source_directory.join(f))
      .collect();
    Ok(compute_checksum(&self.identity_fields(), &files)?)
  }

  /// Text fields of the compilation checksum.
  pub fn compilation_fields(&self) -> Vec<String> {
    vec![
      list(&self.system_headers),
      list(&self.include_dirs),
      list(&self.library_dirs),
      list(&self.libraries),
      list(&self.cppargs),
      list(&self.lddargs),
      list(&self.object_files),
    ]
  }

  /// Checksum of a staged working directory.
  ///
  /// Covers the staged user files and every generated file, read from
  /// `working_dir`.
  pub fn compilation_checksum(&self, working_dir: &Path, generated: &[PathBuf]) -> Result<Checksum, InputError> {
    let files: Vec<PathBuf> = self
      .checksum_files()
      .iter()
      .map(PathBuf::from)
      .chain(generated.iter().cloned())
      .map(|f| working_dir.join(f))
      .collect();
    Ok(compute_checksum(&self.compilation_fields(), &files)?)
  }
}

fn list<T: Debug>(items: &[T]) -> String {
  format!("{:?}", items)
}
