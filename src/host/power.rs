// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Out-of-band power control of hosts through the standard fence agents.

use std::{error::Error, fmt, process::Stdio};

use {
    log::debug,
    tokio::{io::AsyncWriteExt, process::Command},
};

use super::Host;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PowerState::On => "on",
                PowerState::Off => "off",
                PowerState::Unknown => "unknown",
            }
        )
    }
}

#[derive(Debug)]
pub enum FenceError {
    /// The host has no BMC configured, so it cannot be power cycled out of band.
    NoAgent(String),
    UnknownAgent(String),
    Agent { host: String, reason: String },
}

impl fmt::Display for FenceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FenceError::NoAgent(host) => write!(f, "no fence agent configured for {host}"),
            FenceError::UnknownAgent(agent) => write!(f, "unsupported fence agent '{agent}'"),
            FenceError::Agent { host, reason } => write!(f, "fencing {host} failed: {reason}"),
        }
    }
}

impl Error for FenceError {}

/// The supported fence actions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FenceCommand {
    On,
    Off,
    Status,
}

impl fmt::Display for FenceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FenceCommand::On => "on",
                FenceCommand::Off => "off",
                FenceCommand::Status => "status",
            }
        )
    }
}

/// The list of supported fence agents.
#[derive(Debug, Clone, PartialEq)]
pub enum FenceAgent {
    Ipmilan(RedfishArgs),
    Redfish(RedfishArgs),
    /// Powerman addresses a plug by the host's own name on a powerman server.
    Powerman { server: String },
}

impl FenceAgent {
    pub fn from_config(bmc: &crate::config::Bmc) -> Result<Self, FenceError> {
        let args = || {
            RedfishArgs::new(
                bmc.address.clone(),
                bmc.username.clone().unwrap_or_default(),
                bmc.password.clone().unwrap_or_default(),
            )
        };
        match bmc.fence_agent.as_str() {
            "ipmilan" => Ok(FenceAgent::Ipmilan(args())),
            "redfish" => Ok(FenceAgent::Redfish(args())),
            "powerman" => Ok(FenceAgent::Powerman {
                server: bmc.address.clone(),
            }),
            other => Err(FenceError::UnknownAgent(other.to_string())),
        }
    }

    fn get_executable(&self) -> &str {
        match self {
            FenceAgent::Ipmilan(_) => "fence_ipmilan",
            FenceAgent::Redfish(_) => "fence_redfish",
            FenceAgent::Powerman { .. } => "fence_powerman",
        }
    }

    fn generate_command_bytes(&self, host_id: &str, command: FenceCommand) -> Vec<u8> {
        match self {
            FenceAgent::Ipmilan(args) => format!(
                "ipaddr={0}\naction={1}\nusername={2}\npassword={3}\nlanplus=1\n",
                args.address, command, args.username, args.password,
            ),
            FenceAgent::Redfish(args) => format!(
                "ipaddr={0}\naction={1}\nusername={2}\npassword={3}\nssl-insecure=true\n",
                args.address, command, args.username, args.password,
            ),
            FenceAgent::Powerman { server } => {
                format!("ipaddr={server}\naction={command}\nplug={host_id}\n")
            }
        }
        .into_bytes()
    }
}

/// Arguments for fence agents that log in to a BMC.
#[derive(Debug, Clone, PartialEq)]
pub struct RedfishArgs {
    address: String,
    username: String,
    password: String,
}

impl RedfishArgs {
    pub fn new(address: String, username: String, password: String) -> Self {
        RedfishArgs {
            address,
            username,
            password,
        }
    }
}

/// Power on/off a host independently of its operating system.
#[allow(async_fn_in_trait)]
pub trait PowerControl {
    async fn power(&self, host: &Host, command: FenceCommand) -> Result<PowerState, FenceError>;
}

/// PowerControl implementation that shells out to the host's configured fence agent.
#[derive(Debug, Default, Clone)]
pub struct FenceAgentPower;

impl PowerControl for FenceAgentPower {
    async fn power(&self, host: &Host, command: FenceCommand) -> Result<PowerState, FenceError> {
        let agent = host
            .fence_agent()
            .as_ref()
            .ok_or_else(|| FenceError::NoAgent(host.to_string()))?;
        let agent_err = |reason: String| FenceError::Agent {
            host: host.to_string(),
            reason,
        };

        debug!("{host}: {} {command}", agent.get_executable());

        let mut child = Command::new(agent.get_executable())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| agent_err(e.to_string()))?;

        let command_bytes = agent.generate_command_bytes(host.name(), command);
        match child.stdin.take() {
            Some(mut stdin) => {
                stdin
                    .write_all(&command_bytes)
                    .await
                    .map_err(|e| agent_err(e.to_string()))?;
                // Dropping stdin closes it so the agent sees end of input.
            }
            None => return Err(agent_err("stdin was not captured".to_string())),
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| agent_err(e.to_string()))?;

        interpret_exit(command, output.status.code()).ok_or_else(|| {
            agent_err(format!(
                "agent exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        })
    }
}

/// Map a fence agent's exit status to the resulting power state. For `status`, the agents exit 0
/// when the plug is on and 2 when it is off.
fn interpret_exit(command: FenceCommand, code: Option<i32>) -> Option<PowerState> {
    match (command, code) {
        (FenceCommand::On, Some(0)) => Some(PowerState::On),
        (FenceCommand::Off, Some(0)) => Some(PowerState::Off),
        (FenceCommand::Status, Some(0)) => Some(PowerState::On),
        (FenceCommand::Status, Some(2)) => Some(PowerState::Off),
        _ => None,
    }
}
