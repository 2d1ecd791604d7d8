// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! An in-memory cluster that stands in for the system under test.
//!
//! `SimCluster` implements every collaborator trait the scenarios use. It answers the same shell
//! commands the live backend issues (see `host::shell`), moves the management service to the next
//! node when a node fails, and raises fault and resolution alerts. Misbehavior can be switched on
//! to check that the scenarios catch it.

use std::{
    net::Ipv4Addr,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{
    alerts::{AlertChannel, AlertError, AlertEvent},
    cluster::{Cluster, HealthState},
    config::{AlertTypes, SetupType},
    health::{HealthError, HealthQuery, StatusReport},
    host::{
        logical_name, shell, CommandOutput, ExecError, ExecMode, FenceCommand, FenceError, Host,
        PowerControl, PowerState, RemoteExec,
    },
    poll::Backoff,
    scenario::ScenarioSettings,
};

pub const LIVENESS_COMMAND: &str = "hctl status";

/// Ways the simulated cluster can misbehave.
#[derive(Debug, Clone, Default)]
pub struct Misbehavior {
    /// The REST channel keeps reporting every node online.
    pub rest_ignores_failures: bool,
    /// When its holder fails, the management service moves to the previous node rather than the
    /// next one.
    pub wrong_failover: bool,
    /// No fault alert is raised.
    pub suppress_fault_alert: bool,
    /// Fault alerts carry a timestamp an hour in the past.
    pub stale_fault_alert: bool,
    /// Power-on requests through the BMC fail.
    pub refuse_power_on: bool,
    /// The liveness command fails on this node.
    pub liveness_fails_on: Option<usize>,
    /// A recovered node keeps reporting `failed` for this many CLI queries.
    pub recovery_lag: u32,
}

#[derive(Debug)]
struct SimNode {
    hostname: String,
    powered: bool,
    data_iface: String,
    data_addr: Ipv4Addr,
    iface_up: bool,
    lag: u32,
}

impl SimNode {
    fn health(&self) -> HealthState {
        if self.powered && self.iface_up && self.lag == 0 {
            HealthState::Online
        } else {
            HealthState::Failed
        }
    }
}

#[derive(Debug)]
struct SimState {
    nodes: Vec<SimNode>,
    holder: usize,
    alerts: Vec<AlertEvent>,
    next_alert: u64,
    commands: Vec<(usize, String)>,
    misbehavior: Misbehavior,
}

#[derive(Clone, Copy)]
enum FaultKind {
    Power,
    Interface,
}

impl SimState {
    fn fail(&mut self, index: usize, kind: FaultKind) {
        let n = self.nodes.len();
        if index == self.holder {
            self.holder = if self.misbehavior.wrong_failover {
                (index + n - 1) % n
            } else {
                (index + 1) % n
            };
        }

        if self.misbehavior.suppress_fault_alert {
            return;
        }
        let created = if self.misbehavior.stale_fault_alert {
            Utc::now() - chrono::Duration::hours(1)
        } else {
            Utc::now()
        };
        self.raise(index, kind, false, created);
    }

    fn recover(&mut self, index: usize, kind: FaultKind) {
        self.nodes[index].lag = self.misbehavior.recovery_lag;
        self.raise(index, kind, true, Utc::now());
    }

    fn raise(&mut self, index: usize, kind: FaultKind, resolved: bool, created: DateTime<Utc>) {
        let types = AlertTypes::default();
        let (alert_type, resource_type, resource_id) = match (kind, resolved) {
            (FaultKind::Power, false) => (types.fault, types.iem_resource, None),
            (FaultKind::Power, true) => (types.resolved, types.iem_resource, None),
            (FaultKind::Interface, _) => (
                types.nw_interface,
                "node:interface".to_string(),
                Some(self.nodes[index].data_iface.clone()),
            ),
        };
        self.next_alert += 1;
        self.alerts.push(AlertEvent {
            id: format!("alert-{}", self.next_alert),
            alert_type,
            resource_type,
            resource_id,
            resolved,
            created,
        });
    }

    fn report(&self) -> StatusReport {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (logical_name(i), node.health()))
            .collect()
    }

    fn pcs_status(&self) -> Vec<String> {
        let online: Vec<String> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].powered)
            .map(logical_name)
            .collect();
        let offline: Vec<String> = (0..self.nodes.len())
            .filter(|&i| !self.nodes[i].powered)
            .map(logical_name)
            .collect();

        let mut lines = vec![
            "Cluster name: sim_cluster".to_string(),
            format!("Online: [ {} ]", online.join(" ")),
        ];
        if !offline.is_empty() {
            lines.push(format!("OFFLINE: [ {} ]", offline.join(" ")));
        }
        lines.push("Full list of resources:".to_string());
        lines.push(format!(
            "  csm-agent (systemd:csm_agent): Started {}",
            logical_name(self.holder)
        ));
        lines
    }

    /// Run `command` on node `index`, which is known to be powered.
    fn run(&mut self, index: usize, command: &str) -> CommandOutput {
        if command == shell::SHUTDOWN {
            self.nodes[index].powered = false;
            self.fail(index, FaultKind::Power);
            return CommandOutput::new(255, vec!["Connection closed by remote host".to_string()]);
        }
        if command == shell::PCS_STATUS {
            return CommandOutput::new(0, self.pcs_status());
        }
        if command == shell::CSM_SERVICE_CHECK {
            return if index == self.holder {
                CommandOutput::new(0, vec!["active".to_string()])
            } else {
                CommandOutput::new(3, vec!["inactive".to_string()])
            };
        }
        if command == shell::LIST_IPV4_ADDRS {
            let node = &self.nodes[index];
            return CommandOutput::new(
                0,
                vec![
                    "1: lo    inet 127.0.0.1/8 scope host lo".to_string(),
                    format!(
                        "2: eth0    inet 10.0.0.{}/24 brd 10.0.0.255 scope global eth0",
                        index + 1
                    ),
                    format!(
                        "3: {}    inet {}/24 brd 192.168.10.255 scope global {}",
                        node.data_iface, node.data_addr, node.data_iface
                    ),
                ],
            );
        }
        if command == LIVENESS_COMMAND {
            return if self.misbehavior.liveness_fails_on == Some(index) {
                CommandOutput::new(1, vec!["Cluster is not running".to_string()])
            } else {
                CommandOutput::new(0, vec!["Cluster is running".to_string()])
            };
        }
        if let Some(rest) = command.strip_prefix("ip link set ") {
            return self.ip_link(index, rest);
        }
        if let Some(addr) = command.strip_prefix("ping -c 1 -W 3 ") {
            return self.ping(addr);
        }

        // Anything else (pre-shutdown steps and the like) succeeds silently.
        CommandOutput::new(0, vec![])
    }

    fn ip_link(&mut self, index: usize, args: &str) -> CommandOutput {
        let mut parts = args.split_whitespace();
        let (Some(iface), Some(direction)) = (parts.next(), parts.next()) else {
            return CommandOutput::new(1, vec!["Command line is not complete".to_string()]);
        };
        if iface != self.nodes[index].data_iface {
            return CommandOutput::new(1, vec![format!("Cannot find device \"{iface}\"")]);
        }

        let up = direction == "up";
        if self.nodes[index].iface_up != up {
            self.nodes[index].iface_up = up;
            if up {
                self.recover(index, FaultKind::Interface);
            } else {
                self.fail(index, FaultKind::Interface);
            }
        }
        CommandOutput::new(0, vec![])
    }

    fn ping(&self, addr: &str) -> CommandOutput {
        let answering = self
            .nodes
            .iter()
            .any(|n| n.data_addr.to_string() == addr && n.powered && n.iface_up);
        if answering {
            CommandOutput::new(
                0,
                vec![
                    format!("PING {addr} ({addr}) 56(84) bytes of data."),
                    format!("64 bytes from {addr}: icmp_seq=1 ttl=64 time=0.210 ms"),
                ],
            )
        } else {
            CommandOutput::new(2, vec![format!("ping: {addr}: {}", shell::PING_UNRESOLVED_MARKER)])
        }
    }
}

/// A simulated cluster of `n` nodes, all healthy, with the management service on the first.
pub struct SimCluster {
    state: Mutex<SimState>,
}

impl SimCluster {
    pub fn new(n: usize) -> Self {
        let nodes = (0..n)
            .map(|i| SimNode {
                hostname: format!("sim-node-{}", i + 1),
                powered: true,
                data_iface: "eth1".to_string(),
                data_addr: Ipv4Addr::new(192, 168, 10, i as u8 + 1),
                iface_up: true,
                lag: 0,
            })
            .collect();
        Self {
            state: Mutex::new(SimState {
                nodes,
                holder: 0,
                alerts: Vec::new(),
                next_alert: 0,
                commands: Vec::new(),
                misbehavior: Misbehavior::default(),
            }),
        }
    }

    pub fn with_misbehavior(self, misbehavior: Misbehavior) -> Self {
        self.state().misbehavior = misbehavior;
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// The Cluster model matching this simulation.
    pub fn cluster(&self) -> Cluster {
        Cluster::new(
            self.state()
                .nodes
                .iter()
                .enumerate()
                .map(|(i, node)| Host::new(i, &node.hostname, "root", None))
                .collect(),
        )
    }

    /// Settings with short timeouts suitable for driving the simulation.
    pub fn settings(&self) -> ScenarioSettings {
        let fast = Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            Duration::from_millis(300),
        );
        ScenarioSettings {
            setup_type: SetupType::Vm,
            loop_count: 3,
            liveness_command: LIVENESS_COMMAND.to_string(),
            pre_shutdown_command: None,
            alert_types: AlertTypes::default(),
            private_network: "192.168.0.0/16".parse().ok(),
            health: fast,
            settle: fast,
            power: fast,
            failover: fast,
            alert: fast,
        }
    }

    pub fn holder(&self) -> usize {
        self.state().holder
    }

    pub fn is_powered(&self, index: usize) -> bool {
        self.state().nodes[index].powered
    }

    pub fn iface_up(&self, index: usize) -> bool {
        self.state().nodes[index].iface_up
    }

    pub fn data_addr(&self, index: usize) -> Ipv4Addr {
        self.state().nodes[index].data_addr
    }

    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.state().alerts.clone()
    }

    /// Every command run so far, with the index of the node it ran on.
    pub fn commands(&self) -> Vec<(usize, String)> {
        self.state().commands.clone()
    }

    pub fn all_healthy(&self) -> bool {
        self.state()
            .nodes
            .iter()
            .all(|n| n.health() == HealthState::Online)
    }

    /// Add an alert as if the cluster had raised it.
    pub fn inject_alert(&self, event: AlertEvent) {
        self.state().alerts.push(event);
    }

    /// Power a node off behind the harness's back.
    pub fn power_off_externally(&self, index: usize) {
        let mut state = self.state();
        state.nodes[index].powered = false;
        state.fail(index, FaultKind::Power);
    }
}

impl RemoteExec for SimCluster {
    async fn execute(
        &self,
        host: &Host,
        command: &str,
        mode: ExecMode,
    ) -> Result<CommandOutput, ExecError> {
        let mut state = self.state();
        let index = host.index();
        state.commands.push((index, command.to_string()));

        let output = if state.nodes[index].powered {
            state.run(index, command)
        } else {
            CommandOutput::new(
                255,
                vec![format!(
                    "ssh: connect to host {} port 22: No route to host",
                    host.name()
                )],
            )
        };

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
        self.state().nodes[host.index()].powered
    }
}

impl PowerControl for SimCluster {
    async fn power(&self, host: &Host, command: FenceCommand) -> Result<PowerState, FenceError> {
        let mut state = self.state();
        let index = host.index();
        match command {
            FenceCommand::Status => {}
            FenceCommand::Off => {
                if state.nodes[index].powered {
                    state.nodes[index].powered = false;
                    state.fail(index, FaultKind::Power);
                }
            }
            FenceCommand::On => {
                if state.misbehavior.refuse_power_on {
                    return Err(FenceError::Agent {
                        host: host.to_string(),
                        reason: "BMC did not accept the power-on request".to_string(),
                    });
                }
                if !state.nodes[index].powered {
                    state.nodes[index].powered = true;
                    state.recover(index, FaultKind::Power);
                }
            }
        }

        Ok(if state.nodes[index].powered {
            PowerState::On
        } else {
            PowerState::Off
        })
    }
}

impl HealthQuery for SimCluster {
    async fn cli_status(&self, via: &Host) -> Result<StatusReport, HealthError> {
        let mut state = self.state();
        let index = via.index();
        if !state.nodes[index].powered || state.holder != index {
            return Err(HealthError::Parse(format!(
                "management service is not running on {via}"
            )));
        }

        let report = state.report();
        for node in state.nodes.iter_mut() {
            node.lag = node.lag.saturating_sub(1);
        }
        Ok(report)
    }

    async fn rest_status(&self) -> Result<StatusReport, HealthError> {
        let state = self.state();
        if state.misbehavior.rest_ignores_failures {
            return Ok((0..state.nodes.len())
                .map(|i| (logical_name(i), HealthState::Online))
                .collect());
        }
        Ok(state.report())
    }
}

impl AlertChannel for SimCluster {
    async fn fetch_alerts(&self, _since: DateTime<Utc>) -> Result<Vec<AlertEvent>, AlertError> {
        // Everything is returned, stale alerts included; filtering is the verifier's job.
        Ok(self.state().alerts.clone())
    }
}
