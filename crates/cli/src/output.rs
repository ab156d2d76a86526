//! Terminal output for the cache commands.
//!
//! Status lines go to stdout (success, info) or stderr (warning, error).
//! Module names derived from a checksum are shortened for display.

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use modcache_lib::consts::MODULE_NAME_PREFIX;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const REMOVE: &str = "-";
}

#[derive(Debug, Clone, Copy)]
enum Status {
  Success,
  Info,
  Warning,
  Error,
}

fn status_line(status: Status, message: &str) {
  match status {
    Status::Success => println!(
      "{} {}",
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
      message
    ),
    Status::Info => println!(
      "{} {}",
      symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
      message
    ),
    Status::Warning => eprintln!(
      "{} {}",
      symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
      message.if_supports_color(Stream::Stderr, |s| s.yellow())
    ),
    Status::Error => eprintln!(
      "{} {}",
      symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
      message.if_supports_color(Stream::Stderr, |s| s.red())
    ),
  }
}

pub fn print_success(message: &str) {
  status_line(Status::Success, message);
}

pub fn print_info(message: &str) {
  status_line(Status::Info, message);
}

pub fn print_warning(message: &str) {
  status_line(Status::Warning, message);
}

pub fn print_error(message: &str) {
  status_line(Status::Error, message);
}

/// Shorten a checksum-derived module name for display.
pub fn truncate_name(name: &str) -> &str {
  match name.strip_prefix(MODULE_NAME_PREFIX) {
    Some(checksum) => &name[..MODULE_NAME_PREFIX.len() + checksum.len().min(12)],
    None => name,
  }
}

/// One module per line, marked with `symbol`.
pub fn print_modules<'a>(symbol: &str, names: impl IntoIterator<Item = &'a String>) {
  for name in names {
    println!("  {} {}", symbol, truncate_name(name));
  }
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// A file path header, as printed above grep matches.
pub fn print_path(path: &std::path::Path) {
  let shown = path.display().to_string();
  println!("{}", shown.if_supports_color(Stream::Stdout, |s| s.bold()));
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
