//! Grep command implementation.

use anyhow::{Context, Result};

use modcache_lib::store::DiskCache;
use modcache_lib::store::inspect::{LinePattern, parse_categories};

use crate::output::{print_path, print_warning};

/// How matches are reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrepStyle {
  /// Pattern is a regular expression rather than a plain substring.
  pub regex: bool,
  pub line_numbers: bool,
  pub count_only: bool,
  pub files_only: bool,
}

/// Print lines matching `pattern` in cached files.
///
/// `module` restricts the search to one entry, given by name or signature.
pub fn cmd_grep(
  disk: &DiskCache,
  pattern: &str,
  categories: &str,
  module: Option<&str>,
  style: GrepStyle,
) -> Result<()> {
  let categories = parse_categories(categories)?;
  let pattern = if style.regex {
    LinePattern::regex(pattern).context("Failed to compile --pattern")?
  } else {
    LinePattern::literal(pattern)
  };
  if style.files_only && style.count_only {
    print_warning("--filesonly overrides --countonly");
  }
  let module = module.map(super::module_name);
  let matches = disk
    .grep(&pattern, &categories, module.as_deref())
    .context("Failed to search cache")?;

  for (path, hits) in &matches {
    if style.files_only {
      println!("{}", path.display());
    } else if style.count_only {
      println!("{}: {}", path.display(), hits.len());
    } else {
      println!();
      print_path(path);
      for hit in hits {
        if style.line_numbers {
          println!("{:5}:\t{}", hit.line_number, hit.line);
        } else {
          println!("\t{}", hit.line);
        }
      }
    }
  }

  Ok(())
}
