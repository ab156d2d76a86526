//! Test utilities for modcache-lib.
//!
//! Cross-platform helpers for tests that need to run shell commands.

/// Returns a shell command that writes a fake compiled artifact named `file`.
#[cfg(unix)]
pub fn touch_cmd(file: &str) -> String {
  format!("touch {}", file)
}

#[cfg(windows)]
pub fn touch_cmd(file: &str) -> String {
  format!("New-Item -ItemType File -Path '{}' -Force | Out-Null", file)
}

/// Returns a shell command that prints `msg` and exits with `code`.
#[cfg(unix)]
pub fn fail_cmd(msg: &str, code: i32) -> String {
  format!("echo {}; exit {}", msg, code)
}

#[cfg(windows)]
pub fn fail_cmd(msg: &str, code: i32) -> String {
  format!("Write-Output '{}'; exit {}", msg, code)
}

/// Returns a shell command that creates `$MODULE_NAME.so` in the working directory.
#[cfg(unix)]
pub fn touch_module_cmd() -> String {
  "touch \"$MODULE_NAME.so\"".to_string()
}

#[cfg(windows)]
pub fn touch_module_cmd() -> String {
  "New-Item -ItemType File -Path \"$env:MODULE_NAME.so\" -Force | Out-Null".to_string()
}
