// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{error::Error, fmt, process::Output};

use {log::debug, tokio::process::Command};

pub mod power;
pub mod shell;

pub use power::{
    FenceAgent, FenceAgentPower, FenceCommand, FenceError, PowerControl, PowerState, RedfishArgs,
};

/// A server in the cluster under test.
///
/// A Host only knows how to identify and reach the node; every action against it goes through
/// one of the collaborator traits (`RemoteExec`, `PowerControl`, ...) so that the scenarios can
/// be driven against a simulated cluster as well as a live one.
#[derive(Debug, Clone)]
pub struct Host {
    index: usize,
    name: String,
    username: String,
    password: Option<String>,
    data_iface: Option<String>,
    fence_agent: Option<FenceAgent>,
}

impl Host {
    pub fn new(index: usize, name: &str, username: &str, fence_agent: Option<FenceAgent>) -> Self {
        Host {
            index,
            name: name.to_string(),
            username: username.to_string(),
            password: None,
            data_iface: None,
            fence_agent,
        }
    }

    /// Create a Host object from its position in the config file and its config::Node entry.
    pub fn from_config(index: usize, config: &crate::config::Node) -> Result<Self, FenceError> {
        let fence_agent = match &config.bmc {
            Some(bmc) => Some(FenceAgent::from_config(bmc)?),
            None => None,
        };
        let mut host = Host::new(index, &config.hostname, &config.username, fence_agent);
        host.password = config.password.clone();
        host.data_iface = config.data_iface.clone();
        Ok(host)
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_data_iface(mut self, iface: &str) -> Self {
        self.data_iface = Some(iface.to_string());
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name the cluster software uses for this node: `srvnode-<position + 1>`.
    pub fn logical_name(&self) -> String {
        logical_name(self.index)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn data_iface(&self) -> Option<&str> {
        self.data_iface.as_deref()
    }

    pub fn fence_agent(&self) -> &Option<FenceAgent> {
        &self.fence_agent
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.logical_name(), self.name)
    }
}

pub fn logical_name(index: usize) -> String {
    format!("srvnode-{}", index + 1)
}

/// Whether a non-zero exit status of a remote command is an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecMode {
    Strict,
    /// Used where a failing command is itself the expected signal, e.g. pinging a node that
    /// should be unreachable.
    Tolerant,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    /// stdout lines followed by stderr lines.
    pub lines: Vec<String>,
}

impl CommandOutput {
    pub fn new(status: i32, lines: Vec<String>) -> Self {
        Self {
            status: Some(status),
            lines,
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn first_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn from_process(output: Output) -> Self {
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );
        Self {
            status: output.status.code(),
            lines,
        }
    }
}

#[derive(Debug)]
pub enum ExecError {
    /// The local ssh client could not be launched at all.
    Spawn(String),
    NonZeroExit {
        host: String,
        command: String,
        output: CommandOutput,
    },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Spawn(e) => write!(f, "could not run ssh: {e}"),
            ExecError::NonZeroExit {
                host,
                command,
                output,
            } => write!(
                f,
                "'{command}' on {host} exited with {:?}: {}",
                output.status,
                output.first_line()
            ),
        }
    }
}

impl Error for ExecError {}

/// Remote command execution against one node.
#[allow(async_fn_in_trait)]
pub trait RemoteExec {
    async fn execute(
        &self,
        host: &Host,
        command: &str,
        mode: ExecMode,
    ) -> Result<CommandOutput, ExecError>;

    /// Whether the host answers a ping from the machine running the harness.
    async fn is_reachable(&self, host: &Host) -> bool;
}

/// Runs remote commands through the system `ssh` client, using `sshpass` when the host was
/// configured with a password.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout_secs: u64,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
        }
    }
}

impl SshExecutor {
    pub fn new(connect_timeout_secs: u64) -> Self {
        Self {
            connect_timeout_secs,
        }
    }

    fn build_command(&self, host: &Host, command: &str) -> Command {
        let target = format!("{}@{}", host.username(), host.name());
        let timeout = format!("ConnectTimeout={}", self.connect_timeout_secs);
        let mut cmd = match host.password() {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.args(["-p", password, "ssh"]);
                cmd
            }
            None => {
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };
        cmd.args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            timeout.as_str(),
            target.as_str(),
            command,
        ]);
        cmd
    }
}

impl RemoteExec for SshExecutor {
    async fn execute(
        &self,
        host: &Host,
        command: &str,
        mode: ExecMode,
    ) -> Result<CommandOutput, ExecError> {
        debug!("{host}: running '{command}'");
        let output = self
            .build_command(host, command)
            .output()
            .await
            .map_err(|e| ExecError::Spawn(e.to_string()))?;
        let output = CommandOutput::from_process(output);

        if mode == ExecMode::Strict && !output.success() {
            return Err(ExecError::NonZeroExit {
                host: host.to_string(),
                command: command.to_string(),
                output,
            });
        }

        Ok(output)
    }

    async fn is_reachable(&self, host: &Host) -> bool {
        match Command::new("ping")
            .args(["-c", "1", "-W", "2", host.name()])
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("could not run ping for {host}: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_names_follow_position() {
        let host = Host::new(1, "node-b", "root", None);
        assert_eq!(host.logical_name(), "srvnode-2");
        assert_eq!(host.to_string(), "srvnode-2 (node-b)");
    }

    #[test]
    fn first_line_of_empty_output() {
        let output = CommandOutput::new(1, vec![]);
        assert_eq!(output.first_line(), "");
        assert!(!output.success());
    }
}
