//! The build coordinator.
//!
//! [`ModuleCache`] answers "give me the module for these inputs":
//!
//! ```text
//! resolve identity -> memory -> disk -> lock -> disk again -> stage -> build
//!                                                              |        |
//!                                              quarantine <- failure  success -> publish -> load
//! ```
//!
//! Everything after the lock runs while holding it, so for one identity only
//! a single thread of a single process ever stages, builds or publishes. Other
//! callers wait on the lock and then find the published entry on the second
//! disk check.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::build::generate::{Generator, NoopGenerator};
use crate::build::inputs::{BuildInputs, InputError};
use crate::build::{BuildContext, BuildOutput, BuildSystem, Builder, BuilderRegistry};
use crate::config::CacheConfig;
use crate::consts::{CHECKSUM_EXT, COMPILE_LOG, DISPLAY_COMPILE_LOG_ENV};
use crate::error::CacheError;
use crate::identity::{Identity, ModuleId, Resolved, Signed, resolve};
use crate::loader::Loader;
use crate::lock::{LockBackend, LockManager, platform_backend};
use crate::memory::MemoryCache;
use crate::quarantine::quarantine;
use crate::store::{DiskCache, Probe};
use crate::util::fs::copy_files;

/// A content-addressed cache of compiled modules.
///
/// Owns the in-process state (loaded modules and lock nesting). Several
/// instances may share one cache root, in this process or in others.
pub struct ModuleCache<L: Loader> {
  config: CacheConfig,
  disk: DiskCache,
  memory: MemoryCache<L::Handle>,
  locks: Arc<LockManager>,
  builders: BuilderRegistry,
  generator: Arc<dyn Generator>,
  loader: L,
}

impl<L: Loader> ModuleCache<L> {
  pub fn new(config: CacheConfig, loader: L) -> Self {
    let mut disk = DiskCache::new(config.cache_dir.clone());
    if let Some(local) = &config.local_dir {
      disk = disk.with_local_dir(local.clone());
    }

    Self {
      disk,
      config,
      memory: MemoryCache::new(),
      locks: LockManager::new(platform_backend()),
      builders: BuilderRegistry::new(),
      generator: Arc::new(NoopGenerator),
      loader,
    }
  }

  /// Cache rooted at the directories from the environment (see [`CacheConfig::resolve`]).
  pub fn from_env(loader: L) -> Result<Self, CacheError> {
    Ok(Self::new(CacheConfig::resolve(None, None)?, loader))
  }

  pub fn with_builder(mut self, system: BuildSystem, builder: impl Builder + 'static) -> Self {
    self.builders.register(system, Arc::new(builder));
    self
  }

  pub fn with_builders(mut self, builders: BuilderRegistry) -> Self {
    self.builders = builders;
    self
  }

  pub fn with_generator(mut self, generator: impl Generator + 'static) -> Self {
    self.generator = Arc::new(generator);
    self
  }

  pub fn with_lock_backend(mut self, backend: Arc<dyn LockBackend>) -> Self {
    self.locks = LockManager::new(backend);
    self
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  pub fn disk(&self) -> &DiskCache {
    &self.disk
  }

  pub fn locks(&self) -> &Arc<LockManager> {
    &self.locks
  }

  /// Number of aliases registered in the memory cache.
  pub fn loaded_aliases(&self) -> usize {
    self.memory.len()
  }

  /// Names of all complete entries in the cache root.
  pub fn cached_modules(&self) -> Result<Vec<String>, CacheError> {
    Ok(self.disk.cached_modules()?)
  }

  /// Look a module up in memory, then on disk. Never builds.
  pub fn import_module<'a>(&self, id: impl Into<ModuleId<'a>>) -> Result<Option<L::Handle>, CacheError> {
    match resolve(id.into(), |key| self.memory.get(key)) {
      Resolved::Hit(handle) => Ok(Some(handle)),
      Resolved::Miss(identity) => self.load_from_disk(&identity),
    }
  }

  /// Return the module for `inputs`, building it if no cached copy exists.
  ///
  /// Without a signature the module is named by the checksum of `inputs`.
  /// With an explicit module name nothing is cached: the module is built in
  /// `<local dir>/<name>` and loaded from there.
  pub fn build_module(&self, inputs: &BuildInputs) -> Result<L::Handle, CacheError> {
    inputs.validate()?;
    let builder = self.builder_for(inputs.build_system)?;

    if let Some(name) = &inputs.modulename {
      return self.build_uncached(inputs, name, builder.as_ref());
    }

    let resolved = match &inputs.signature {
      Some(signature) => resolve(ModuleId::Text(signature), |key| self.memory.get(key)),
      None => {
        let identity = Identity::from_checksum(&inputs.identity_checksum()?);
        resolve(ModuleId::Text(identity.name()), |key| self.memory.get(key))
      }
    };

    match resolved {
      Resolved::Hit(handle) => Ok(handle),
      Resolved::Miss(identity) => self.build_cached(inputs, &identity, builder.as_ref()),
    }
  }

  /// Like [`Self::build_module`], named by the signature of `object`.
  ///
  /// The memory cache is probed with the object's key before its signature
  /// is computed.
  pub fn build_module_for(&self, object: &dyn Signed, inputs: &BuildInputs) -> Result<L::Handle, CacheError> {
    if inputs.modulename.is_some() || inputs.signature.is_some() {
      return Err(InputError::NameAndSignature.into());
    }
    inputs.validate()?;
    let builder = self.builder_for(inputs.build_system)?;

    match resolve(ModuleId::Object(object), |key| self.memory.get(key)) {
      Resolved::Hit(handle) => Ok(handle),
      Resolved::Miss(identity) => self.build_cached(inputs, &identity, builder.as_ref()),
    }
  }

  fn builder_for(&self, system: BuildSystem) -> Result<Arc<dyn Builder>, CacheError> {
    self.builders.get(system).ok_or(CacheError::NoBuilder(system))
  }

  fn load_from_disk(&self, identity: &Identity) -> Result<Option<L::Handle>, CacheError> {
    match self.disk.probe(identity.name()) {
      Probe::Found(dir) => Ok(Some(self.load_and_register(&dir, identity)?)),
      Probe::Missing => Ok(None),
    }
  }

  fn load_and_register(&self, dir: &Path, identity: &Identity) -> Result<L::Handle, CacheError> {
    let handle = self.loader.load(dir, identity.name()).map_err(|source| CacheError::Load {
      name: identity.name().to_string(),
      source,
    })?;
    self.memory.put(identity.keys(), handle.clone());
    Ok(handle)
  }

  fn build_cached(
    &self,
    inputs: &BuildInputs,
    identity: &Identity,
    builder: &dyn Builder,
  ) -> Result<L::Handle, CacheError> {
    let name = identity.name();
    if let Some(handle) = self.load_from_disk(identity)? {
      return Ok(handle);
    }

    let _lock = self.locks.acquire(self.disk.root(), name)?;

    // Someone else may have published while we waited.
    if let Some(handle) = self.load_from_disk(identity)? {
      debug!(name = %name, "module appeared while waiting for lock");
      return Ok(handle);
    }

    let staging = tempfile::Builder::new()
      .prefix(&format!("{}-", name))
      .tempdir()
      .map_err(|source| CacheError::Stage {
        name: name.to_string(),
        path: std::env::temp_dir(),
        source,
      })?;
    let working_dir = staging.path().join(name);

    self.compile(inputs, name, &working_dir, builder)?;
    let published = self.disk.publish(&working_dir, name)?;
    self.load_and_register(published.path(), identity)
  }

  fn build_uncached(&self, inputs: &BuildInputs, name: &str, builder: &dyn Builder) -> Result<L::Handle, CacheError> {
    let base = match &self.config.local_dir {
      Some(dir) => dir.clone(),
      None => std::env::current_dir().map_err(|source| CacheError::Stage {
        name: name.to_string(),
        path: PathBuf::from("."),
        source,
      })?,
    };
    let working_dir = base.join(name);
    info!(name = %name, path = ?working_dir, "building uncached module");

    self.compile(inputs, name, &working_dir, builder)?;
    self.loader.load(&working_dir, name).map_err(|source| CacheError::Load {
      name: name.to_string(),
      source,
    })
  }

  /// Stage `inputs` into `working_dir` and build them there.
  ///
  /// The build is skipped when the compilation checksum matches the one
  /// recorded by the last successful build in the same directory. On failure
  /// the recorded checksum is removed and the directory is quarantined.
  fn compile(
    &self,
    inputs: &BuildInputs,
    name: &str,
    working_dir: &Path,
    builder: &dyn Builder,
  ) -> Result<(), CacheError> {
    let stage_err = |source: io::Error| CacheError::Stage {
      name: name.to_string(),
      path: working_dir.to_path_buf(),
      source,
    };

    copy_files(&inputs.source_directory, working_dir, &inputs.files_to_copy()).map_err(stage_err)?;
    let generated = self.generator.generate(inputs, name, working_dir).map_err(stage_err)?;

    let checksum = inputs.compilation_checksum(working_dir, &generated)?;
    let checksum_file = working_dir.join(format!("{}.{}", name, CHECKSUM_EXT));
    if fs::read_to_string(&checksum_file).is_ok_and(|previous| previous == checksum.as_str()) {
      debug!(name = %name, "compilation checksum unchanged, skipping build");
      return Ok(());
    }

    info!(name = %name, build_system = %inputs.build_system, "compiling module");
    let ctx = BuildContext {
      name,
      working_dir,
      inputs,
      generated: &generated,
    };
    let output = builder.build(&ctx).unwrap_or_else(|err| BuildOutput {
      status: -1,
      output: format!("failed to run build: {}\n", err),
    });

    let log_path = working_dir.join(COMPILE_LOG);
    fs::write(&log_path, &output.output).map_err(stage_err)?;

    if output.success() {
      fs::write(&checksum_file, checksum.as_str()).map_err(stage_err)?;
      return Ok(());
    }

    if let Err(e) = fs::remove_file(&checksum_file)
      && e.kind() != io::ErrorKind::NotFound
    {
      warn!(path = ?checksum_file, error = %e, "failed to remove stale compilation checksum");
    }
    Err(self.fail(name, working_dir, output, log_path))
  }

  fn fail(&self, name: &str, working_dir: &Path, output: BuildOutput, log_path: PathBuf) -> CacheError {
    if std::env::var_os(DISPLAY_COMPILE_LOG_ENV).is_some() {
      warn!(name = %name, "compile log:\n{}", output.output);
    }

    let error_root = &self.config.error_dir;
    let quarantined = self
      .locks
      .acquire(error_root, name)
      .map_err(|e| e.to_string())
      .and_then(|_lock| quarantine(working_dir, error_root, name).map_err(|e| e.to_string()));

    let quarantine = match quarantined {
      Ok(dir) => Some(dir),
      Err(e) => {
        error!(name = %name, error = %e, "failed to quarantine build");
        None
      }
    };

    let log_path = quarantine.as_ref().map(|dir| dir.join(COMPILE_LOG)).unwrap_or(log_path);
    error!(name = %name, status = output.status, log = ?log_path, "module failed to build");
    CacheError::BuildFailed {
      name: name.to_string(),
      status: output.status,
      log_path,
      quarantine,
    }
  }
}

impl<L: Loader + std::fmt::Debug> std::fmt::Debug for ModuleCache<L> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModuleCache")
      .field("config", &self.config)
      .field("builders", &self.builders)
      .field("loader", &self.loader)
      .finish_non_exhaustive()
  }
}
