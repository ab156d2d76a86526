//! Builder running shell commands in the working directory.

use std::io;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::build::{BuildContext, BuildOutput, Builder};

/// Runs each command in order with the platform shell, stopping at the first
/// failure.
///
/// Commands run inside the working directory with `MODULE_NAME` set to the
/// module being built. The output of every command that ran is concatenated,
/// stdout before stderr.
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
  commands: Vec<String>,
  shell: Option<String>,
}

impl CommandBuilder {
  pub fn new<I, S>(commands: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      commands: commands.into_iter().map(Into::into).collect(),
      shell: None,
    }
  }

  /// Use `shell` instead of `/bin/sh` (unix) or `powershell.exe` (windows).
  pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
    self.shell = Some(shell.into());
    self
  }

  pub fn commands(&self) -> &[String] {
    &self.commands
  }

  fn run(&self, cmd: &str, name: &str, working_dir: &Path) -> io::Result<(i32, String)> {
    let (shell, args) = get_shell(self.shell.as_deref());
    debug!(shell = %shell, cmd = %cmd, working_dir = ?working_dir, "spawning build command");

    let output = Command::new(&shell)
      .args(&args)
      .arg(cmd)
      .current_dir(working_dir)
      .env("MODULE_NAME", name)
      .output()?;

    let mut text = format!("$ {}\n", cmd);
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    // Killed by a signal: no exit code.
    let status = output.status.code().unwrap_or(-1);
    Ok((status, text))
  }
}

impl Builder for CommandBuilder {
  fn build(&self, ctx: &BuildContext<'_>) -> io::Result<BuildOutput> {
    info!(name = %ctx.name, commands = self.commands.len(), "running build commands");

    let mut combined = String::new();
    for cmd in &self.commands {
      let (status, text) = self.run(cmd, ctx.name, ctx.working_dir)?;
      combined.push_str(&text);
      if status != 0 {
        debug!(cmd = %cmd, status, "build command failed");
        return Ok(BuildOutput {
          status,
          output: combined,
        });
      }
    }

    Ok(BuildOutput {
      status: 0,
      output: combined,
    })
  }
}

/// Shell program and the arguments preceding the command string.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
