//! Shared fakes for library integration tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use modcache_lib::build::{BuildContext, BuildOutput};
use modcache_lib::loader::LoadError;
use modcache_lib::{BuildInputs, BuildSystem, Builder, CacheConfig, Loader, ModuleCache};
use tempfile::TempDir;

/// Writes `<name>.so` and counts invocations.
#[derive(Clone, Default)]
pub struct CountingBuilder {
  pub calls: Arc<AtomicUsize>,
  pub delay: Duration,
}

impl CountingBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sleep during every build to widen race windows.
  pub fn slow(delay: Duration) -> Self {
    Self {
      delay,
      ..Self::default()
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Builder for CountingBuilder {
  fn build(&self, ctx: &BuildContext<'_>) -> io::Result<BuildOutput> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    thread::sleep(self.delay);
    fs::write(ctx.working_dir.join(format!("{}.so", ctx.name)), b"\x7fELF")?;
    Ok(BuildOutput {
      status: 0,
      output: format!("built {}\n", ctx.name),
    })
  }
}

/// Fails every build with the given status and message.
pub struct FailingBuilder {
  pub status: i32,
  pub message: &'static str,
}

impl Builder for FailingBuilder {
  fn build(&self, _ctx: &BuildContext<'_>) -> io::Result<BuildOutput> {
    Ok(BuildOutput {
      status: self.status,
      output: self.message.to_string(),
    })
  }
}

/// Succeeds without producing an artifact.
pub struct EmptyBuilder;

impl Builder for EmptyBuilder {
  fn build(&self, _ctx: &BuildContext<'_>) -> io::Result<BuildOutput> {
    Ok(BuildOutput {
      status: 0,
      output: String::new(),
    })
  }
}

/// Loads a module as the directory holding `<name>.so`, counting loads.
#[derive(Clone, Default)]
pub struct PathLoader {
  pub loads: Arc<AtomicUsize>,
}

impl PathLoader {
  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }
}

impl Loader for PathLoader {
  type Handle = PathBuf;

  fn load(&self, module_dir: &Path, name: &str) -> Result<PathBuf, LoadError> {
    if !module_dir.join(format!("{}.so", name)).is_file() {
      return Err(LoadError::NoArtifact {
        name: name.to_string(),
        dir: module_dir.to_path_buf(),
      });
    }
    self.loads.fetch_add(1, Ordering::SeqCst);
    Ok(module_dir.to_path_buf())
  }
}

/// Isolated cache, error and local directories.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn config(&self) -> CacheConfig {
    CacheConfig::at(&self.temp.path().join("cache"), &self.temp.path().join("error"))
      .unwrap()
      .with_local_dir(Some(self.local_dir()))
  }

  pub fn local_dir(&self) -> PathBuf {
    self.temp.path().join("local")
  }

  /// Directory for user source files.
  pub fn src_dir(&self) -> PathBuf {
    let dir = self.temp.path().join("src");
    fs::create_dir_all(&dir).unwrap();
    dir
  }

  pub fn write_source(&self, name: &str, content: &str) {
    fs::write(self.src_dir().join(name), content).unwrap();
  }

  /// A fresh cache over this environment's directories.
  pub fn cache(&self, builder: impl Builder + 'static) -> ModuleCache<PathLoader> {
    self.cache_with_loader(builder, PathLoader::default())
  }

  pub fn cache_with_loader(&self, builder: impl Builder + 'static, loader: PathLoader) -> ModuleCache<PathLoader> {
    ModuleCache::new(self.config(), loader).with_builder(BuildSystem::Direct, builder)
  }

  /// Inputs with one source file from [`Self::src_dir`].
  pub fn inputs(&self, code: &str) -> BuildInputs {
    self.write_source("module.c", "double add(double a, double b) { return a + b; }");
    BuildInputs::new()
      .with_code(code)
      .with_source_directory(self.src_dir())
      .with_sources(["module.c"])
  }
}
