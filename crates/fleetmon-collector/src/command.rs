//! CLI invocation for command-based probes.
//!
//! Children are spawned with `kill_on_drop`, so the per-call timeout applied
//! by [`run_probes`](crate::probe::run_probes) also terminates the process.

use fleetmon_common::error::ProbeError;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::Command;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// A command line plus its environment. Secrets go through `env`, never
/// `args`, so they do not show up in the process list.
#[derive(Debug, Clone)]
pub struct CliCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl CliCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Program and arguments, for logging and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Runs the command to completion, whatever its exit status.
    pub async fn output(&self) -> Result<CommandOutput, ProbeError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => {
                    ProbeError::PermissionDenied(format!("cannot execute {}", self.program))
                }
                ErrorKind::NotFound => ProbeError::command(self.display(), "executable not found"),
                _ => ProbeError::command(self.display(), e.to_string()),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Runs the command and returns stdout, failing on a non-zero exit.
    pub async fn stdout(&self) -> Result<String, ProbeError> {
        let output = self.output().await?;
        if !output.success {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                "exited with non-zero status".to_string()
            } else {
                stderr.lines().next().unwrap_or(stderr).to_string()
            };
            if message.contains("Access denied") || message.contains("NOAUTH") {
                return Err(ProbeError::PermissionDenied(message));
            }
            return Err(ProbeError::command(self.display(), message));
        }
        Ok(output.stdout)
    }
}
