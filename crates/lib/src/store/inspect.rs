//! Read-only queries over published cache entries.
//!
//! Only entries carrying a completion marker are ever visited. Files are
//! grouped into categories by extension; the grouping is purely for display
//! and has no bearing on cache correctness.
//!
//! Lines are matched with a [`LinePattern`]: a plain substring or a regular
//! expression (`regex` syntax, matched anywhere in the line).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use super::{DiskCache, StoreError};
use crate::consts::COMPLETE_MARKER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Inc,
  Src,
  Lib,
  Log,
}

impl Category {
  pub const ALL: [Category; 4] = [Category::Inc, Category::Src, Category::Lib, Category::Log];

  pub fn as_str(self) -> &'static str {
    match self {
      Category::Inc => "inc",
      Category::Src => "src",
      Category::Lib => "lib",
      Category::Log => "log",
    }
  }

  /// Category of a file, judged by its extension.
  pub fn of(path: &Path) -> Option<Category> {
    let ext = path.extension()?.to_str()?;
    match ext {
      "h" | "hh" | "hpp" | "hxx" | "i" => Some(Category::Inc),
      "c" | "C" | "cc" | "cpp" | "cxx" => Some(Category::Src),
      "so" | "dylib" | "dll" | "pyd" | "a" | "lib" => Some(Category::Lib),
      "log" => Some(Category::Log),
      _ => None,
    }
  }
}

impl std::fmt::Display for Category {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
#[error("unknown file category '{0}' (expected inc, src, lib or log)")]
pub struct UnknownCategory(String);

impl FromStr for Category {
  type Err = UnknownCategory;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "inc" => Ok(Category::Inc),
      "src" => Ok(Category::Src),
      "lib" => Ok(Category::Lib),
      "log" => Ok(Category::Log),
      other => Err(UnknownCategory(other.to_string())),
    }
  }
}

/// Parse a comma separated category list; `all` selects every category.
pub fn parse_categories(list: &str) -> Result<Vec<Category>, UnknownCategory> {
  if list.trim() == "all" {
    return Ok(Category::ALL.to_vec());
  }
  list.split(',').filter(|s| !s.trim().is_empty()).map(str::parse).collect()
}

#[derive(Debug, Error)]
pub enum InspectError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("no complete module named '{0}' in cache")]
  NoSuchModule(String),

  #[error("failed to copy module to {path}: {source}")]
  Copy {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid pattern: {0}")]
  Pattern(#[from] regex::Error),
}

/// What `grep` looks for in each line.
#[derive(Debug, Clone)]
pub enum LinePattern {
  Literal(String),
  Regex(Regex),
}

impl LinePattern {
  pub fn literal(pattern: impl Into<String>) -> Self {
    LinePattern::Literal(pattern.into())
  }

  pub fn regex(pattern: &str) -> Result<Self, InspectError> {
    Ok(LinePattern::Regex(Regex::new(pattern)?))
  }

  pub fn is_match(&self, line: &str) -> bool {
    match self {
      LinePattern::Literal(text) => line.contains(text.as_str()),
      LinePattern::Regex(regex) => regex.is_match(line),
    }
  }
}

/// Pattern for lines that look like the start of a function called `name`:
/// the name as a whole word followed by optional spaces and `(`.
pub fn function_pattern(name: &str) -> Result<Regex, InspectError> {
  Ok(Regex::new(&format!(r"\b{}[ ]*\(", regex::escape(name)))?)
}

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineMatch {
  pub line_number: usize,
  pub line: String,
}

/// A function body found in a cached source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionMatch {
  pub path: PathBuf,
  pub line_number: usize,
  pub body: String,
}

impl DiskCache {
  /// Files of complete entries, grouped by category.
  ///
  /// With `module` set, only that entry is visited.
  pub fn glob(
    &self,
    categories: &[Category],
    module: Option<&str>,
  ) -> Result<BTreeMap<Category, Vec<PathBuf>>, InspectError> {
    let mut found: BTreeMap<Category, Vec<PathBuf>> = categories.iter().map(|c| (*c, Vec::new())).collect();

    for entry in self.complete_entries(module)? {
      for dirent in WalkDir::new(&entry).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
        if !dirent.file_type().is_file() {
          continue;
        }
        if let Some(category) = Category::of(dirent.path())
          && let Some(files) = found.get_mut(&category)
        {
          files.push(dirent.path().to_path_buf());
        }
      }
    }

    Ok(found)
  }

  /// Lines containing `pattern` in files of the given categories.
  pub fn grep(
    &self,
    pattern: &LinePattern,
    categories: &[Category],
    module: Option<&str>,
  ) -> Result<BTreeMap<PathBuf, Vec<LineMatch>>, InspectError> {
    let mut matches = BTreeMap::new();

    for path in self.glob(categories, module)?.into_values().flatten() {
      // Compiled libraries are not text; skip anything that doesn't decode.
      let Ok(content) = fs::read_to_string(&path) else {
        continue;
      };
      let hits: Vec<LineMatch> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| pattern.is_match(line))
        .map(|(idx, line)| LineMatch {
          line_number: idx + 1,
          line: line.to_string(),
        })
        .collect();
      if !hits.is_empty() {
        matches.insert(path, hits);
      }
    }

    Ok(matches)
  }

  /// Bodies of functions called `name` in cached sources.
  pub fn grep_function(
    &self,
    name: &str,
    categories: &[Category],
    module: Option<&str>,
  ) -> Result<Vec<FunctionMatch>, InspectError> {
    let signature = function_pattern(name)?;
    let mut found = Vec::new();

    for path in self.glob(categories, module)?.into_values().flatten() {
      let Ok(content) = fs::read_to_string(&path) else {
        continue;
      };
      let lines: Vec<&str> = content.lines().collect();
      for (idx, line) in lines.iter().enumerate() {
        if signature.is_match(line) {
          found.push(FunctionMatch {
            path: path.clone(),
            line_number: idx + 1,
            body: extract_function(&lines[idx..]),
          });
        }
      }
    }

    Ok(found)
  }

  /// Copy the files of the given categories from a complete entry into
  /// `<dest>/<module>`, keeping their layout inside the entry.
  pub fn checkout(&self, module: &str, dest: &Path, categories: &[Category]) -> Result<PathBuf, InspectError> {
    let entry = self.complete_entry(module)?;
    let target = dest.join(module);
    let copy_err = |source| InspectError::Copy {
      path: target.clone(),
      source,
    };

    fs::create_dir_all(&target).map_err(copy_err)?;
    for file in self.glob(categories, Some(module))?.into_values().flatten() {
      let rel = file.strip_prefix(&entry).map_err(|e| copy_err(io::Error::other(e)))?;
      let to = target.join(rel);
      if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(copy_err)?;
      }
      fs::copy(&file, &to).map_err(copy_err)?;
    }
    Ok(target)
  }

  /// Remove the files of the given categories from a complete entry.
  ///
  /// The completion marker goes first, so from then on the entry reads as
  /// missing and is rebuilt on next use. Must be called under the module's
  /// lock.
  pub fn remove_files(&self, module: &str, categories: &[Category]) -> Result<Vec<PathBuf>, InspectError> {
    let entry = self.complete_entry(module)?;
    let files: Vec<PathBuf> = self.glob(categories, Some(module))?.into_values().flatten().collect();

    let marker = entry.join(COMPLETE_MARKER);
    fs::remove_file(&marker).map_err(|source| StoreError::Remove { path: marker, source })?;
    for file in &files {
      fs::remove_file(file).map_err(|source| StoreError::Remove {
        path: file.clone(),
        source,
      })?;
    }

    debug!(name = %module, count = files.len(), "removed files from cache entry");
    Ok(files)
  }

  fn complete_entry(&self, module: &str) -> Result<PathBuf, InspectError> {
    self
      .complete_entries(Some(module))?
      .into_iter()
      .next()
      .ok_or_else(|| InspectError::NoSuchModule(module.to_string()))
  }

  fn complete_entries(&self, module: Option<&str>) -> Result<Vec<PathBuf>, InspectError> {
    let entries = self.entries()?;
    let selected: Vec<PathBuf> = entries
      .into_iter()
      .filter(|e| e.complete && module.is_none_or(|m| e.name == m))
      .map(|e| e.path)
      .collect();

    if let Some(module) = module
      && selected.is_empty()
    {
      return Err(InspectError::NoSuchModule(module.to_string()));
    }
    Ok(selected)
  }
}

/// Text from the first line up to the brace closing the first opened block.
///
/// Returns the lines read so far if the block never closes.
pub fn extract_function(lines: &[&str]) -> String {
  let mut depth = 0usize;
  let mut opened = false;
  let mut body = Vec::new();

  for line in lines {
    body.push(*line);
    for c in line.chars() {
      match c {
        '{' => {
          depth += 1;
          opened = true;
        }
        '}' => depth = depth.saturating_sub(1),
        _ => {}
      }
    }
    if opened && depth == 0 {
      break;
    }
  }

  body.join("\n")
}
