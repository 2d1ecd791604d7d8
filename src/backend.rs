// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The set of collaborators a scenario needs, and their live implementation.

use chrono::{DateTime, Utc};

use crate::{
    alerts::{AlertChannel, AlertError, AlertEvent},
    config::Config,
    health::{self, rest::CsmRestClient, HealthError, HealthQuery, StatusReport},
    host::{
        shell, CommandOutput, ExecError, ExecMode, FenceAgentPower, FenceCommand, FenceError,
        Host, PowerControl, PowerState, RemoteExec, SshExecutor,
    },
};

/// Everything the scenario runner drives: remote commands, power control, health queries and
/// alerts.
pub trait Backend: RemoteExec + PowerControl + HealthQuery + AlertChannel {}

impl<T: RemoteExec + PowerControl + HealthQuery + AlertChannel> Backend for T {}

/// Backend talking to a real cluster: ssh for commands, fence agents for power, the management
/// CLI and REST endpoint for health and alerts.
#[derive(Debug)]
pub struct LiveBackend {
    exec: SshExecutor,
    power: FenceAgentPower,
    rest: CsmRestClient,
    cli_user: String,
    cli_password: String,
}

impl LiveBackend {
    pub fn new(config: &Config) -> Result<Self, HealthError> {
        Ok(Self {
            exec: SshExecutor::default(),
            power: FenceAgentPower,
            rest: CsmRestClient::new(config)?,
            cli_user: config.csm.admin_user.clone(),
            cli_password: config.csm.admin_password.clone(),
        })
    }
}

impl RemoteExec for LiveBackend {
    async fn execute(
        &self,
        host: &Host,
        command: &str,
        mode: ExecMode,
    ) -> Result<CommandOutput, ExecError> {
        self.exec.execute(host, command, mode).await
    }

    async fn is_reachable(&self, host: &Host) -> bool {
        self.exec.is_reachable(host).await
    }
}

impl PowerControl for LiveBackend {
    async fn power(&self, host: &Host, command: FenceCommand) -> Result<PowerState, FenceError> {
        self.power.power(host, command).await
    }
}

impl HealthQuery for LiveBackend {
    async fn cli_status(&self, via: &Host) -> Result<StatusReport, HealthError> {
        let command = shell::cli_system_status(&self.cli_user, &self.cli_password);
        let output = self.exec.execute(via, &command, ExecMode::Strict).await?;
        health::parse_cli_status(&output.lines)
    }

    async fn rest_status(&self) -> Result<StatusReport, HealthError> {
        self.rest.node_health().await
    }
}

impl AlertChannel for LiveBackend {
    async fn fetch_alerts(&self, since: DateTime<Utc>) -> Result<Vec<AlertEvent>, AlertError> {
        self.rest
            .alerts(since)
            .await
            .map_err(|e| AlertError(e.to_string()))
    }
}
