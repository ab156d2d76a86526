mod clean;
mod config;
mod copy;
mod grep;
mod grepfunction;
mod show;

pub use clean::cmd_clean;
pub use config::cmd_config;
pub use copy::cmd_copy;
pub use grep::{GrepStyle, cmd_grep};
pub use grepfunction::cmd_grepfunction;
pub use show::{ShowStyle, cmd_show};

use modcache_lib::ModuleId;
use modcache_lib::identity::identity_of;

/// Cache entry name for a module name or signature given on the command line.
fn module_name(id: &str) -> String {
  identity_of(ModuleId::Text(id)).name().to_string()
}
