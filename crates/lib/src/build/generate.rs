//! Source generation.

use std::io;
use std::path::{Path, PathBuf};

use crate::build::inputs::BuildInputs;

/// Emits generated sources (wrappers, build scripts) into a working directory.
///
/// Runs after the user's files are staged and before the build. The returned
/// paths are relative to `working_dir` and feed the compilation checksum, so
/// a generator must be deterministic for rebuild skipping to work.
pub trait Generator: Send + Sync {
  fn generate(&self, inputs: &BuildInputs, name: &str, working_dir: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Generates nothing; the staged files are built as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGenerator;

impl Generator for NoopGenerator {
  fn generate(&self, _inputs: &BuildInputs, _name: &str, _working_dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(Vec::new())
  }
}
