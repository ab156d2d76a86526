use anyhow::Result;
use serde::Serialize;

use modcache_lib::CacheConfig;
use modcache_lib::config::runtime_tag;
use modcache_lib::consts::{CACHE_DIR_ENV, DISPLAY_COMPILE_LOG_ENV, ERROR_DIR_ENV};

use crate::output::{OutputFormat, print_json, print_stat};

#[derive(Serialize)]
struct ConfigOutput<'a> {
  #[serde(flatten)]
  config: &'a CacheConfig,
  runtime_tag: String,
}

pub fn cmd_config(config: &CacheConfig, output: OutputFormat) -> Result<()> {
  if output.is_json() {
    return print_json(&ConfigOutput {
      config,
      runtime_tag: runtime_tag(),
    });
  }

  print_stat("Cache directory", &config.cache_dir.display().to_string());
  print_stat("Error directory", &config.error_dir.display().to_string());
  print_stat("Runtime tag", &runtime_tag());
  println!();
  println!("Environment:");
  for var in [CACHE_DIR_ENV, ERROR_DIR_ENV, DISPLAY_COMPILE_LOG_ENV] {
    let value = std::env::var(var).unwrap_or_else(|_| "(unset)".to_string());
    print_stat(var, &value);
  }

  Ok(())
}
