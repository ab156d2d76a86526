//! Clean command implementation.
//!
//! Only complete entries are touched. Each is removed under its module lock,
//! either whole or, with a partial category list, file by file. Afterwards
//! staging directories left by crashed publishers and lock files of entries
//! that no longer exist are removed, each while holding its lock.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use modcache_lib::lock::{LockManager, platform_backend};
use modcache_lib::store::{DiskCache, is_complete};
use modcache_lib::store::inspect::{Category, parse_categories};

use crate::output::{
  OutputFormat, print_info, print_json, print_modules, print_stat, print_success, print_warning, symbols,
};

#[derive(Debug, Default, Serialize)]
struct CleanResult {
  dry_run: bool,
  removed: Vec<String>,
  files_removed: usize,
  staging_removed: usize,
  locks_removed: usize,
}

pub fn cmd_clean(
  disk: &DiskCache,
  module: Option<&str>,
  categories: &str,
  dry_run: bool,
  output: OutputFormat,
) -> Result<()> {
  let categories = parse_categories(categories)?;
  let whole_entries = Category::ALL.iter().all(|c| categories.contains(c));
  let locks = LockManager::new(platform_backend());
  if !locks.backend().is_exclusive() {
    print_warning("No file locking on this platform; don't clean while modules are being built");
  }
  let only = module.map(super::module_name);

  let entries = disk.entries().context("Failed to list cache entries")?;
  let selected: Vec<_> = entries
    .into_iter()
    .filter(|entry| entry.complete && only.as_deref().is_none_or(|name| entry.name == name))
    .collect();

  if let Some(name) = &only
    && selected.is_empty()
  {
    anyhow::bail!("no complete module named '{}' in cache", name);
  }

  let mut result = CleanResult {
    dry_run,
    ..Default::default()
  };

  for entry in &selected {
    let files = if dry_run {
      disk
        .glob(&categories, Some(&entry.name))
        .with_context(|| format!("Failed to list files of module '{}'", entry.name))?
        .into_values()
        .map(|files| files.len())
        .sum()
    } else {
      let _lock = locks
        .acquire(disk.root(), &entry.name)
        .with_context(|| format!("Failed to lock module '{}'", entry.name))?;
      remove_entry(disk, &entry.name, &categories, whole_entries)?
    };
    debug!(name = %entry.name, files, "cleaned cache entry");
    result.files_removed += files;
    result.removed.push(entry.name.clone());
  }

  if only.is_none() {
    result.staging_removed = remove_stale_staging(disk, &locks, dry_run)?;
    result.locks_removed = remove_stray_locks(disk, &locks, dry_run)?;
  }

  if output.is_json() {
    return print_json(&result);
  }

  print_modules(symbols::REMOVE, &result.removed);
  println!();
  if dry_run {
    print_info("Dry run - no changes made");
  } else {
    print_success("Cache cleaned");
  }
  print_stat("Modules removed", &result.removed.len().to_string());
  if !whole_entries {
    print_stat("Files removed", &result.files_removed.to_string());
  }
  print_stat("Staging directories removed", &result.staging_removed.to_string());
  print_stat("Lock files removed", &result.locks_removed.to_string());

  Ok(())
}

/// Remove one entry, or only its files of `categories`. Returns the number
/// of categorized files removed. Caller holds the module lock.
fn remove_entry(disk: &DiskCache, name: &str, categories: &[Category], whole: bool) -> Result<usize> {
  // The entry may have been removed while we waited for the lock.
  if !is_complete(&disk.entry_path(name)) {
    return Ok(0);
  }

  if whole {
    let files = disk
      .glob(&Category::ALL, Some(name))
      .with_context(|| format!("Failed to list files of module '{}'", name))?
      .into_values()
      .map(|files| files.len())
      .sum();
    disk
      .remove(name)
      .with_context(|| format!("Failed to remove module '{}'", name))?;
    Ok(files)
  } else {
    let removed = disk
      .remove_files(name, categories)
      .with_context(|| format!("Failed to remove files of module '{}'", name))?;
    Ok(removed.len())
  }
}

/// Remove staging directories whose publisher is gone, each under its
/// module lock.
fn remove_stale_staging(disk: &DiskCache, locks: &Arc<LockManager>, dry_run: bool) -> Result<usize> {
  let staging = disk.staging_dirs().context("Failed to list staging directories")?;
  if dry_run {
    return Ok(staging.len());
  }

  let mut removed = 0;
  for dir in staging {
    let _lock = locks
      .acquire(disk.root(), &dir.name)
      .with_context(|| format!("Failed to lock module '{}'", dir.name))?;
    match disk.remove_staging(&dir) {
      Ok(()) => removed += 1,
      Err(e) => warn!(path = ?dir.path, error = %e, "failed to remove staging directory"),
    }
  }
  Ok(removed)
}

/// Remove lock files whose entry is gone, each while holding it.
fn remove_stray_locks(disk: &DiskCache, locks: &Arc<LockManager>, dry_run: bool) -> Result<usize> {
  let stray = disk.stray_lock_files().context("Failed to list lock files")?;
  if dry_run {
    return Ok(stray.len());
  }

  let mut removed = 0;
  for path in stray {
    let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
      continue;
    };
    let lock = locks.acquire(disk.root(), name)?;
    // A builder may have created the entry while we waited.
    if disk.entry_path(name).exists() {
      continue;
    }
    match std::fs::remove_file(&path) {
      Ok(()) => removed += 1,
      Err(e) => warn!(path = ?path, error = %e, "failed to remove lock file"),
    }
    drop(lock);
  }
  Ok(removed)
}
