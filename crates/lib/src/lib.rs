//! modcache-lib: a content-addressed cache for compiled extension modules.
//!
//! Given source code and compiler parameters, [`ModuleCache`] derives a
//! stable module name from their content, returns an already built module
//! when one exists in memory or on disk, and otherwise builds it exactly once
//! across all threads and processes sharing the cache directory.
//!
//! - [`util::hash`]: checksums of text and file contents
//! - [`identity`]: module names, signatures and their aliases
//! - [`memory`]: loaded modules of this process
//! - [`store`]: published entries on disk
//! - [`lock`]: per-module cross-process locks
//! - [`coordinator`]: the lookup and build state machine
//! - [`quarantine`]: failed builds kept for inspection

pub mod build;
pub mod config;
pub mod consts;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod loader;
pub mod lock;
pub mod memory;
pub mod quarantine;
pub mod store;
pub mod util;

pub use build::inputs::BuildInputs;
pub use build::{BuildSystem, Builder, BuilderRegistry};
pub use config::CacheConfig;
pub use coordinator::ModuleCache;
pub use error::CacheError;
pub use identity::{ModuleId, Signed};
pub use loader::{ArtifactLoader, LoadedModule, Loader};
