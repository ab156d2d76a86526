//! Copy command implementation.
//!
//! Copies the files of one complete cache entry out of the cache for
//! inspection, optionally only some categories.

use std::path::Path;

use anyhow::{Context, Result};

use modcache_lib::store::DiskCache;
use modcache_lib::store::inspect::parse_categories;

use crate::output::print_success;

pub fn cmd_copy(disk: &DiskCache, module: &str, categories: &str, dest: &Path) -> Result<()> {
  let categories = parse_categories(categories)?;
  let name = super::module_name(module);
  let target = disk
    .checkout(&name, dest, &categories)
    .with_context(|| format!("Failed to copy module '{}'", module))?;

  print_success(&format!("Copied {} to {}", name, target.display()));
  Ok(())
}
