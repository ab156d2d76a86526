use anyhow::{Context, Result};

use modcache_lib::store::DiskCache;
use modcache_lib::store::inspect::parse_categories;

/// Print functions called `name` found in cached sources.
pub fn cmd_grepfunction(
  disk: &DiskCache,
  name: &str,
  categories: &str,
  module: Option<&str>,
  no_body: bool,
) -> Result<()> {
  let categories = parse_categories(categories)?;
  let module = module.map(super::module_name);
  let found = disk
    .grep_function(name, &categories, module.as_deref())
    .context("Failed to search cache")?;

  for hit in &found {
    println!("{}:{}", hit.path.display(), hit.line_number);
    if no_body {
      println!("{:5}: {}", hit.line_number, hit.body.lines().next().unwrap_or_default());
    } else {
      println!("{}", hit.body);
    }
    println!();
  }

  Ok(())
}
