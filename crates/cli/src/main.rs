mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use modcache_lib::CacheConfig;
use modcache_lib::store::DiskCache;

use crate::cmd::{GrepStyle, ShowStyle};
use crate::output::{OutputFormat, print_error};

/// Inspect and manage the modcache compiled module cache
#[derive(Parser)]
#[command(name = "modcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Cache directory (default: $MODCACHE_CACHE_DIR or ~/.cache/modcache/<tag>/cache)
  #[arg(long, global = true, value_name = "DIR")]
  cache_dir: Option<PathBuf>,

  /// Directory holding failed builds (default: $MODCACHE_ERROR_DIR or ~/.cache/modcache/<tag>/error)
  #[arg(long, global = true, value_name = "DIR")]
  error_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Summarize cached files by category
  Show {
    /// Comma separated categories (inc,src,lib,log) or "all"
    #[arg(long, default_value = "all")]
    categories: String,

    /// List every file
    #[arg(long)]
    files: bool,

    /// Don't print the summary
    #[arg(long)]
    no_summary: bool,

    /// List the modules that contain a compiled library
    #[arg(long)]
    signatures: bool,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// Search cached headers and sources for lines containing a pattern
  Grep {
    /// Substring to search for
    #[arg(long)]
    pattern: String,

    /// Treat the pattern as a regular expression
    #[arg(long)]
    regexmode: bool,

    #[arg(long, default_value = "inc,src")]
    categories: String,

    /// Only search the module with this name or signature
    #[arg(long)]
    signature: Option<String>,

    /// Show line numbers
    #[arg(long)]
    linenumbers: bool,

    /// Only show the number of matching lines per file
    #[arg(long)]
    countonly: bool,

    /// Only show names of files with matches
    #[arg(long)]
    filesonly: bool,
  },

  /// Print functions with the given name found in cached sources
  Grepfunction {
    /// Function name
    #[arg(long)]
    name: String,

    #[arg(long, default_value = "src")]
    categories: String,

    /// Only search the module with this name or signature
    #[arg(long)]
    signature: Option<String>,

    /// Only print the line where each function starts
    #[arg(long)]
    no_body: bool,
  },

  /// Copy a cached module out of the cache
  #[command(alias = "checkout")]
  Copy {
    /// Module name or signature
    #[arg(long)]
    signature: String,

    #[arg(long, default_value = "inc,src,lib,log")]
    categories: String,

    /// Directory to copy into
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output: PathBuf,
  },

  /// Remove cached modules and leftover lock files
  Clean {
    /// Show what would be removed without removing anything
    #[arg(long)]
    dry_run: bool,

    /// Only remove the module with this name or signature
    #[arg(long)]
    signature: Option<String>,

    /// File categories to remove; anything short of all four leaves the
    /// entry in place but no longer complete
    #[arg(long, default_value = "inc,src,lib,log")]
    categories: String,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// Show the resolved cache configuration
  Config {
    /// Shorthand for --output json
    #[arg(long)]
    json: bool,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },
}

fn main() {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli) {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let config = CacheConfig::resolve(cli.cache_dir.as_deref(), cli.error_dir.as_deref())
    .context("Failed to resolve cache directories")?;
  let disk = DiskCache::new(config.cache_dir.clone());

  match cli.command {
    Commands::Show {
      categories,
      files,
      no_summary,
      signatures,
      output,
    } => cmd::cmd_show(
      &disk,
      &categories,
      ShowStyle {
        files,
        summary: !no_summary,
        signatures,
      },
      output,
    ),
    Commands::Grep {
      pattern,
      regexmode,
      categories,
      signature,
      linenumbers,
      countonly,
      filesonly,
    } => cmd::cmd_grep(
      &disk,
      &pattern,
      &categories,
      signature.as_deref(),
      GrepStyle {
        regex: regexmode,
        line_numbers: linenumbers,
        count_only: countonly,
        files_only: filesonly,
      },
    ),
    Commands::Grepfunction {
      name,
      categories,
      signature,
      no_body,
    } => cmd::cmd_grepfunction(&disk, &name, &categories, signature.as_deref(), no_body),
    Commands::Copy {
      signature,
      categories,
      output,
    } => cmd::cmd_copy(&disk, &signature, &categories, &output),
    Commands::Clean {
      dry_run,
      signature,
      categories,
      output,
    } => cmd::cmd_clean(&disk, signature.as_deref(), &categories, dry_run, output),
    Commands::Config { json, output } => {
      let output = if json { OutputFormat::Json } else { output };
      cmd::cmd_config(&config, output)
    }
  }
}
