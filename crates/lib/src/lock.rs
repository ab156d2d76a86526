//! Per-module locking for the shared cache root.
//!
//! Each module name gets its own lock file, `<cache_root>/<name>.lock`,
//! guarded by an exclusive advisory lock so that processes sharing a cache
//! root (possibly over a network filesystem) never build the same module at
//! the same time.
//!
//! Within one [`LockManager`] a lock is reentrant for the thread holding it:
//! nested acquisitions only bump a counter, and the file lock is dropped when
//! the outermost [`ModuleLock`] is released. Other threads block until then.
//!
//! # Platform support
//!
//! - Unix: `flock(2)` via `rustix`. On Linux NFS mounts this is emulated with
//!   byte-range locks and works across hosts.
//! - Windows: `LockFileEx`.
//! - Anything else: [`NoopBackend`]. Cross-process exclusion is **not**
//!   provided there; concurrent builds of the same module may race.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::LOCK_EXT;

/// Holder details written into a lock file once it is acquired.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub module: String,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to create cache directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {path}: {source}")]
  OpenFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to acquire lock {path}: {source}")]
  LockFailed {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// An exclusive-lock primitive on an open file.
pub trait LockBackend: Send + Sync + std::fmt::Debug {
  fn name(&self) -> &'static str;

  /// Block until `file` is exclusively locked.
  fn lock_exclusive(&self, file: &File) -> io::Result<()>;

  fn unlock(&self, file: &File) -> io::Result<()>;

  /// Whether the backend actually excludes other processes.
  fn is_exclusive(&self) -> bool {
    true
  }
}

#[cfg(unix)]
#[derive(Debug, Default)]
pub struct FlockBackend;

#[cfg(unix)]
impl LockBackend for FlockBackend {
  fn name(&self) -> &'static str {
    "flock"
  }

  fn lock_exclusive(&self, file: &File) -> io::Result<()> {
    use rustix::fs::{FlockOperation, flock};
    use std::os::unix::io::AsFd;

    flock(file.as_fd(), FlockOperation::LockExclusive).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
  }

  fn unlock(&self, file: &File) -> io::Result<()> {
    use rustix::fs::{FlockOperation, flock};
    use std::os::unix::io::AsFd;

    flock(file.as_fd(), FlockOperation::Unlock).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
  }
}

#[cfg(windows)]
#[derive(Debug, Default)]
pub struct LockFileExBackend;

#[cfg(windows)]
impl LockBackend for LockFileExBackend {
  fn name(&self) -> &'static str {
    "LockFileEx"
  }

  fn lock_exclusive(&self, file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LockFileEx};

    let handle = file.as_raw_handle() as HANDLE;

    // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
    // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
    let result = unsafe {
      let mut overlapped = std::mem::zeroed();
      LockFileEx(handle, LOCKFILE_EXCLUSIVE_LOCK, 0, 1, 0, &mut overlapped)
    };

    if result == 0 {
      Err(io::Error::last_os_error())
    } else {
      Ok(())
    }
  }

  fn unlock(&self, file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::UnlockFileEx;

    let handle = file.as_raw_handle() as HANDLE;

    // SAFETY: same as in `lock_exclusive`.
    let result = unsafe {
      let mut overlapped = std::mem::zeroed();
      UnlockFileEx(handle, 0, 1, 0, &mut overlapped)
    };

    if result == 0 {
      Err(io::Error::last_os_error())
    } else {
      Ok(())
    }
  }
}

/// Backend for platforms without a usable file lock.
///
/// Only in-process exclusion remains; separate processes are not excluded.
#[derive(Debug, Default)]
pub struct NoopBackend;

impl LockBackend for NoopBackend {
  fn name(&self) -> &'static str {
    "noop"
  }

  fn lock_exclusive(&self, _file: &File) -> io::Result<()> {
    Ok(())
  }

  fn unlock(&self, _file: &File) -> io::Result<()> {
    Ok(())
  }

  fn is_exclusive(&self) -> bool {
    false
  }
}

/// The best backend available on this platform.
pub fn platform_backend() -> Arc<dyn LockBackend> {
  #[cfg(unix)]
  {
    Arc::new(FlockBackend)
  }

  #[cfg(windows)]
  {
    Arc::new(LockFileExBackend)
  }

  #[cfg(not(any(unix, windows)))]
  {
    Arc::new(NoopBackend)
  }
}

#[derive(Debug)]
struct Slot {
  owner: ThreadId,
  count: usize,
  // None while the owner is still waiting for the file lock.
  file: Option<File>,
}

/// Hands out [`ModuleLock`]s and tracks nesting per lock file.
#[derive(Debug)]
pub struct LockManager {
  backend: Arc<dyn LockBackend>,
  slots: Mutex<HashMap<PathBuf, Slot>>,
  released: Condvar,
}

impl LockManager {
  pub fn new(backend: Arc<dyn LockBackend>) -> Arc<Self> {
    if !backend.is_exclusive() {
      warn!(
        backend = backend.name(),
        "no file locking available on this platform, concurrent processes may build the same module twice"
      );
    }

    Arc::new(Self {
      backend,
      slots: Mutex::new(HashMap::new()),
      released: Condvar::new(),
    })
  }

  pub fn backend(&self) -> &dyn LockBackend {
    self.backend.as_ref()
  }

  /// Path of the lock file for `name` under `cache_root`.
  pub fn lock_path(cache_root: &Path, name: &str) -> PathBuf {
    cache_root.join(format!("{}.{}", name, LOCK_EXT))
  }

  /// Acquire the lock for `name`, blocking until it is available.
  pub fn acquire(self: &Arc<Self>, cache_root: &Path, name: &str) -> Result<ModuleLock, LockError> {
    let lock_path = Self::lock_path(cache_root, name);
    let me = thread::current().id();

    {
      let mut slots = self.slots();
      loop {
        match slots.get_mut(&lock_path) {
          Some(slot) if slot.owner == me => {
            slot.count += 1;
            debug!(lock = ?lock_path, count = slot.count, "re-entered lock");
            return Ok(self.guard(lock_path));
          }
          Some(_) => {
            slots = self.released.wait(slots).unwrap_or_else(|poisoned| poisoned.into_inner());
          }
          None => {
            slots.insert(
              lock_path.clone(),
              Slot {
                owner: me,
                count: 1,
                file: None,
              },
            );
            break;
          }
        }
      }
    }

    debug!(lock = ?lock_path, backend = self.backend.name(), "acquiring lock");
    match self.lock_file(cache_root, &lock_path, name) {
      Ok(file) => {
        if let Some(slot) = self.slots().get_mut(&lock_path) {
          slot.file = Some(file);
        }
        Ok(self.guard(lock_path))
      }
      Err(e) => {
        self.slots().remove(&lock_path);
        self.released.notify_all();
        Err(e)
      }
    }
  }

  /// Nesting depth of the lock for `name` held by any thread of this manager.
  pub fn depth(&self, cache_root: &Path, name: &str) -> usize {
    self
      .slots()
      .get(&Self::lock_path(cache_root, name))
      .map(|slot| slot.count)
      .unwrap_or(0)
  }

  fn guard(self: &Arc<Self>, lock_path: PathBuf) -> ModuleLock {
    ModuleLock {
      manager: Arc::clone(self),
      lock_path,
      released: false,
      _not_send: PhantomData,
    }
  }

  fn slots(&self) -> MutexGuard<'_, HashMap<PathBuf, Slot>> {
    self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn lock_file(&self, cache_root: &Path, lock_path: &Path, name: &str) -> Result<File, LockError> {
    std::fs::create_dir_all(cache_root).map_err(|source| LockError::CreateDir {
      path: cache_root.to_path_buf(),
      source,
    })?;

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(lock_path)
      .map_err(|source| LockError::OpenFile {
        path: lock_path.to_path_buf(),
        source,
      })?;

    self.backend.lock_exclusive(&file).map_err(|source| LockError::LockFailed {
      path: lock_path.to_path_buf(),
      source,
    })?;

    if let Err(e) = write_metadata(&file, name) {
      debug!(lock = ?lock_path, error = %e, "failed to write lock metadata");
    }

    Ok(file)
  }

  fn release(&self, lock_path: &Path) {
    let me = thread::current().id();
    let mut slots = self.slots();

    let slot = slots.get_mut(lock_path);
    assert!(slot.is_some(), "releasing lock {} that is not held", lock_path.display());
    let Some(slot) = slot else { return };
    assert!(
      slot.owner == me,
      "lock {} released by a thread that does not hold it",
      lock_path.display()
    );
    assert!(slot.count > 0, "lock {} released too many times", lock_path.display());

    slot.count -= 1;
    debug!(lock = ?lock_path, count = slot.count, "releasing lock");
    if slot.count > 0 {
      return;
    }

    if let Some(slot) = slots.remove(lock_path)
      && let Some(file) = slot.file
      && let Err(e) = self.backend.unlock(&file)
    {
      warn!(lock = ?lock_path, error = %e, "failed to unlock lock file");
    }
    drop(slots);
    self.released.notify_all();
  }
}

/// A held module lock. Released on drop.
///
/// Not `Send`: a lock belongs to the thread that acquired it.
#[derive(Debug)]
pub struct ModuleLock {
  manager: Arc<LockManager>,
  lock_path: PathBuf,
  released: bool,
  _not_send: PhantomData<*const ()>,
}

impl ModuleLock {
  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  /// Release explicitly instead of waiting for drop.
  pub fn release(mut self) {
    self.released = true;
    self.manager.release(&self.lock_path);
  }

  /// Read holder details from the lock file.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut contents = String::new();
    File::open(&self.lock_path)?.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }
}

impl Drop for ModuleLock {
  fn drop(&mut self) {
    if !self.released {
      self.released = true;
      self.manager.release(&self.lock_path);
    }
  }
}

fn write_metadata(mut file: &File, module: &str) -> io::Result<()> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    module: module.to_string(),
  };

  file.set_len(0)?;
  file.seek(SeekFrom::Start(0))?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer(&mut writer, &metadata).map_err(io::Error::other)?;
  writer.flush()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::mpsc;
  use std::time::Duration;
  use tempfile::TempDir;

  #[test]
  fn acquire_creates_lock_file() {
    let temp = TempDir::new().unwrap();
    let manager = LockManager::new(platform_backend());

    let lock = manager.acquire(temp.path(), "mod_a").unwrap();
    assert_eq!(lock.lock_path(), temp.path().join("mod_a.lock"));
    assert!(lock.lock_path().exists());
  }

  #[test]
  fn acquire_creates_missing_cache_root() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("nested").join("cache");
    let manager = LockManager::new(platform_backend());

    let _lock = manager.acquire(&root, "mod_a").unwrap();
    assert!(root.is_dir());
  }

  #[test]
  fn lock_metadata_written() {
    let temp = TempDir::new().unwrap();
    let manager = LockManager::new(platform_backend());
    let lock = manager.acquire(temp.path(), "my_module").unwrap();

    let metadata = lock.read_metadata().unwrap();
    assert_eq!(metadata.version, 1);
    assert_eq!(metadata.module, "my_module");
    assert_eq!(metadata.pid, std::process::id());
  }

  #[test]
  fn reentrant_within_thread() {
    let temp = TempDir::new().unwrap();
    let manager = LockManager::new(platform_backend());

    let outer = manager.acquire(temp.path(), "mod_a").unwrap();
    let inner = manager.acquire(temp.path(), "mod_a").unwrap();
    assert_eq!(manager.depth(temp.path(), "mod_a"), 2);

    inner.release();
    assert_eq!(manager.depth(temp.path(), "mod_a"), 1);
    drop(outer);
    assert_eq!(manager.depth(temp.path(), "mod_a"), 0);
  }

  #[test]
  fn distinct_modules_do_not_contend() {
    let temp = TempDir::new().unwrap();
    let manager = LockManager::new(platform_backend());

    let _a = manager.acquire(temp.path(), "mod_a").unwrap();
    let _b = manager.acquire(temp.path(), "mod_b").unwrap();
    assert_eq!(manager.depth(temp.path(), "mod_a"), 1);
    assert_eq!(manager.depth(temp.path(), "mod_b"), 1);
  }

  #[test]
  fn other_thread_waits_for_release() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();
    let manager = LockManager::new(platform_backend());

    let held = manager.acquire(&root, "mod_a").unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
      let manager = Arc::clone(&manager);
      let root = root.clone();
      thread::spawn(move || {
        let _lock = manager.acquire(&root, "mod_a").unwrap();
        tx.send(()).unwrap();
      })
    };

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    drop(held);
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    waiter.join().unwrap();
  }

  #[cfg(any(unix, windows))]
  #[test]
  fn separate_managers_exclude_each_other() {
    // Two managers open separate file handles, just like two processes would.
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();
    let first = LockManager::new(platform_backend());
    let second = LockManager::new(platform_backend());

    let held = first.acquire(&root, "mod_a").unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
      let _lock = second.acquire(&root, "mod_a").unwrap();
      tx.send(()).unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    held.release();
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    waiter.join().unwrap();
  }

  #[test]
  fn noop_backend_is_not_exclusive() {
    let backend = NoopBackend;
    assert!(!backend.is_exclusive());
    assert_eq!(backend.name(), "noop");
  }

  #[test]
  fn lock_released_on_drop() {
    let temp = TempDir::new().unwrap();
    let manager = LockManager::new(platform_backend());
    {
      let _lock = manager.acquire(temp.path(), "mod_a").unwrap();
    }

    let other = LockManager::new(platform_backend());
    let lock = other.acquire(temp.path(), "mod_a").unwrap();
    assert!(lock.lock_path().exists());
  }
}
