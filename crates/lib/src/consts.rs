//! Names and limits shared across the crate.

pub const APP_NAME: &str = "modcache";

/// Prefix for module names derived from a checksum.
///
/// Explicit module names may never start with this prefix, which keeps
/// generated and caller-chosen names in separate namespaces.
pub const MODULE_NAME_PREFIX: &str = "modcache_module_";

/// Module names must be strictly shorter than this.
pub const MODULE_NAME_LENGTH_LIMIT: usize = 200;

/// Zero-byte file written last when an entry is published.
pub const COMPLETE_MARKER: &str = "finished_copying";

/// Build log written into every working directory.
pub const COMPILE_LOG: &str = "compile.log";

/// Extension of the per-module compilation checksum file.
pub const CHECKSUM_EXT: &str = "checksum";

/// Extension of the per-module lock file inside the cache root.
pub const LOCK_EXT: &str = "lock";

pub const CACHE_DIR_ENV: &str = "MODCACHE_CACHE_DIR";
pub const ERROR_DIR_ENV: &str = "MODCACHE_ERROR_DIR";
pub const DISPLAY_COMPILE_LOG_ENV: &str = "MODCACHE_DISPLAY_COMPILE_LOG";
