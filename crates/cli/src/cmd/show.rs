//! Show command implementation.
//!
//! Summarizes the files of complete cache entries by category.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::Serialize;

use modcache_lib::store::DiskCache;
use modcache_lib::store::inspect::{Category, parse_categories};

use crate::output::{
  OutputFormat, format_bytes, print_info, print_json, print_modules, print_stat, print_warning, symbols,
};

/// What `show` prints besides JSON.
#[derive(Debug, Clone, Copy)]
pub struct ShowStyle {
  pub files: bool,
  pub summary: bool,
  pub signatures: bool,
}

#[derive(Debug, Serialize)]
struct CategorySummary {
  count: usize,
  bytes: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  files: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ShowOutput {
  cache_dir: String,
  modules: Vec<String>,
  categories: BTreeMap<Category, CategorySummary>,
  #[serde(skip_serializing_if = "Option::is_none")]
  signatures: Option<Vec<String>>,
}

pub fn cmd_show(disk: &DiskCache, categories: &str, style: ShowStyle, output: OutputFormat) -> Result<()> {
  let categories = parse_categories(categories)?;
  let found = disk.glob(&categories, None).context("Failed to list cache entries")?;
  let entries = disk.entries().context("Failed to list cache entries")?;
  let incomplete = entries.iter().filter(|entry| !entry.complete).count();
  let modules: Vec<String> = entries
    .into_iter()
    .filter(|entry| entry.complete)
    .map(|entry| entry.name)
    .collect();
  let signatures = if style.signatures {
    Some(library_modules(disk)?)
  } else {
    None
  };
  let files = style.files;

  let summaries: BTreeMap<Category, CategorySummary> = found
    .into_iter()
    .map(|(category, paths)| {
      let bytes = paths
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();
      let summary = CategorySummary {
        count: paths.len(),
        bytes,
        files: files.then(|| paths.iter().map(|p| p.display().to_string()).collect()),
      };
      (category, summary)
    })
    .collect();

  if output.is_json() {
    return print_json(&ShowOutput {
      cache_dir: disk.root().display().to_string(),
      modules,
      categories: summaries,
      signatures,
    });
  }

  if incomplete > 0 {
    print_warning(&format!("Skipped {} incomplete cache entries", incomplete));
  }

  if let Some(signatures) = &signatures {
    for name in signatures {
      println!("\t{}", name);
    }
  }

  if files {
    for summary in summaries.values() {
      for file in summary.files.iter().flatten() {
        println!("\t{}", file);
      }
    }
  }

  if style.summary {
    print_info(&format!("Cache at {}", disk.root().display()));
    print_stat("Modules", &modules.len().to_string());
    for (category, summary) in &summaries {
      print_stat(
        category.as_str(),
        &format!("{} files, {}", summary.count, format_bytes(summary.bytes)),
      );
    }
    if !modules.is_empty() && !files {
      println!();
      print_modules(symbols::INFO, &modules);
    }
  }

  Ok(())
}

/// Names of complete entries holding a compiled library.
fn library_modules(disk: &DiskCache) -> Result<Vec<String>> {
  let libs = disk.glob(&[Category::Lib], None).context("Failed to list cache entries")?;
  let names: BTreeSet<String> = libs
    .into_values()
    .flatten()
    .filter_map(|path| {
      let entry = path.strip_prefix(disk.root()).ok()?.components().next()?;
      entry.as_os_str().to_str().map(str::to_string)
    })
    .collect();
  Ok(names.into_iter().collect())
}
