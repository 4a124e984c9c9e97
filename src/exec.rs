//! External command execution
//!
//! Routing rules and interface autodetection shell out to `iptables`,
//! `sysctl` and `ip`. Everything goes through [`CommandRunner`] so the
//! callers can be exercised against scripted output.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Captured result of one command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs a program with arguments and captures its output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Run a command and require a zero exit status; returns stdout
pub async fn run_checked(runner: &dyn CommandRunner, program: &str, args: &[&str]) -> Result<String> {
    let output = runner.run(program, args).await?;
    if output.success() {
        return Ok(output.stdout);
    }
    let status = match output.status {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    };
    let stderr = output.stderr.trim();
    Err(Error::Command {
        command: command_line(program, args),
        reason: if stderr.is_empty() { status } else { format!("{}: {}", status, stderr) },
    })
}

pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs commands on the host via `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        info!("[#] {}", command_line(program, args));

        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Command {
                command: command_line(program, args),
                reason: e.to_string(),
            })?;

        let output = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("{} exited with {:?}", program, output.status);
        Ok(output)
    }
}
