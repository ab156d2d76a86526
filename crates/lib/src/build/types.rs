use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::build::inputs::BuildInputs;

/// How a working directory is turned into a compiled module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSystem {
  /// Compile the staged sources directly.
  #[default]
  Direct,
  /// Generate a project (makefiles and the like) first, then build it.
  ProjectGenerator,
}

impl std::fmt::Display for BuildSystem {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      BuildSystem::Direct => write!(f, "direct"),
      BuildSystem::ProjectGenerator => write!(f, "project_generator"),
    }
  }
}

/// Everything a [`Builder`] gets to see.
#[derive(Debug)]
pub struct BuildContext<'a> {
  pub name: &'a str,
  /// Private directory holding the staged inputs; the build runs here.
  pub working_dir: &'a Path,
  pub inputs: &'a BuildInputs,
  /// Files emitted by the generator, relative to `working_dir`.
  pub generated: &'a [PathBuf],
}

/// Exit status and combined stdout/stderr of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
  pub status: i32,
  pub output: String,
}

impl BuildOutput {
  pub fn success(&self) -> bool {
    self.status == 0
  }
}

/// Compiles a staged working directory.
///
/// An `Err` means the build could not be run at all; a build that ran and
/// failed reports a nonzero [`BuildOutput::status`] instead.
pub trait Builder: Send + Sync {
  fn build(&self, ctx: &BuildContext<'_>) -> io::Result<BuildOutput>;
}

/// Builders keyed by [`BuildSystem`].
#[derive(Default, Clone)]
pub struct BuilderRegistry {
  builders: HashMap<BuildSystem, Arc<dyn Builder>>,
}

impl BuilderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `builder` for `system`, replacing any previous one.
  pub fn register(&mut self, system: BuildSystem, builder: Arc<dyn Builder>) {
    self.builders.insert(system, builder);
  }

  pub fn get(&self, system: BuildSystem) -> Option<Arc<dyn Builder>> {
    self.builders.get(&system).cloned()
  }

  pub fn contains(&self, system: BuildSystem) -> bool {
    self.builders.contains_key(&system)
  }
}

impl std::fmt::Debug for BuilderRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut systems: Vec<_> = self.builders.keys().collect();
    systems.sort_by_key(|s| s.to_string());
    f.debug_struct("BuilderRegistry").field("systems", &systems).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Fixed(i32);

  impl Builder for Fixed {
    fn build(&self, _ctx: &BuildContext<'_>) -> io::Result<BuildOutput> {
      Ok(BuildOutput {
        status: self.0,
        output: String::new(),
      })
    }
  }

  #[test]
  fn registry_dispatches_by_system() {
    let mut registry = BuilderRegistry::new();
    registry.register(BuildSystem::Direct, Arc::new(Fixed(0)));
    registry.register(BuildSystem::ProjectGenerator, Arc::new(Fixed(3)));

    let inputs = BuildInputs::new();
    let ctx = BuildContext {
      name: "m",
      working_dir: Path::new("."),
      inputs: &inputs,
      generated: &[],
    };

    let direct = registry.get(BuildSystem::Direct).unwrap().build(&ctx).unwrap();
    let project = registry.get(BuildSystem::ProjectGenerator).unwrap().build(&ctx).unwrap();
    assert!(direct.success());
    assert_eq!(project.status, 3);
  }

  #[test]
  fn missing_system_is_none() {
    let registry = BuilderRegistry::new();
    assert!(registry.get(BuildSystem::Direct).is_none());
    assert!(!registry.contains(BuildSystem::ProjectGenerator));
  }

  #[test]
  fn build_system_serializes_snake_case() {
    let json = serde_json::to_string(&BuildSystem::ProjectGenerator).unwrap();
    assert_eq!(json, "\"project_generator\"");
  }
}
