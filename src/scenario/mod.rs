// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The HA scenario runner.
//!
//! A scenario repeatedly takes one node through a fault and its remediation:
//!
//! `Healthy -> FaultInjected -> DegradedConfirmed -> Remediated -> RecoveredConfirmed -> Healthy`
//!
//! Scenarios differ only in which nodes are targeted and what the fault is; the transitions and
//! the checks made at each of them are the same for every scenario.

use std::{
    collections::{BTreeMap, BTreeSet},
    error::Error,
    fmt,
    net::Ipv4Addr,
};

use {
    chrono::{DateTime, Utc},
    cidr::Ipv4Cidr,
    log::{debug, info, warn},
    rand::{rngs::StdRng, Rng, SeedableRng},
};

use crate::{
    alerts::{AlertError, AlertSpec, AlertVerifier},
    backend::Backend,
    cluster::Cluster,
    config::{AlertTypes, Config, ConfigError, SetupType},
    health::{
        aggregate::{self, AggregateError},
        Channel,
    },
    host::{shell, ExecMode, FenceCommand, Host, RemoteExec},
    locator::{self, FailoverPointer},
    poll::{poll_until, Backoff},
};

pub mod catalog;

pub use catalog::ScenarioSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Healthy,
    FaultInjected,
    DegradedConfirmed,
    Remediated,
    RecoveredConfirmed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Phase::Healthy => "healthy",
                Phase::FaultInjected => "fault injected",
                Phase::DegradedConfirmed => "degraded state confirmed",
                Phase::Remediated => "remediated",
                Phase::RecoveredConfirmed => "recovery confirmed",
            }
        )
    }
}

/// The fault induced on the target node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    /// `safe` shuts the node down from its own OS; otherwise the BMC cuts power.
    PowerOff { safe: bool },
    /// Take the node's private data interface down.
    InterfaceDown,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::PowerOff { safe: true } => write!(f, "safe shutdown"),
            Fault::PowerOff { safe: false } => write!(f, "unsafe power off"),
            Fault::InterfaceDown => write!(f, "data interface down"),
        }
    }
}

/// Which nodes a scenario faults, in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSelector {
    /// Every node once, in cluster order.
    AllInOrder,
    /// One uniformly chosen node, `loop_count` times. The seed is logged so a run can be
    /// reproduced.
    RandomRepeated { loop_count: u32, seed: Option<u64> },
    /// One given node, once.
    Only(usize),
}

impl TargetSelector {
    /// The target sequence for a cluster of `len` nodes, and the seed used, if any.
    pub fn targets(&self, len: usize) -> (Vec<usize>, Option<u64>) {
        match *self {
            TargetSelector::AllInOrder => ((0..len).collect(), None),
            TargetSelector::RandomRepeated { .. } if len == 0 => (vec![], None),
            TargetSelector::RandomRepeated { loop_count, seed } => {
                let seed = seed.unwrap_or_else(rand::random);
                let mut rng = StdRng::seed_from_u64(seed);
                let index = rng.gen_range(0..len);
                (vec![index; loop_count as usize], Some(seed))
            }
            TargetSelector::Only(index) => (vec![index], None),
        }
    }
}

#[derive(Debug)]
pub enum ScenarioError {
    /// The cluster was not in the required state before the scenario (or teardown) began.
    Precondition(String),
    /// An action did not produce the expected observable effect.
    Transition {
        target: String,
        phase: Phase,
        reason: String,
    },
    /// A remote command, power control or query failed outright.
    External { target: String, reason: String },
}

impl ScenarioError {
    fn transition(target: &Host, phase: Phase, reason: impl fmt::Display) -> Self {
        ScenarioError::Transition {
            target: target.logical_name(),
            phase,
            reason: reason.to_string(),
        }
    }

    fn external(target: &Host, reason: impl fmt::Display) -> Self {
        ScenarioError::External {
            target: target.logical_name(),
            reason: reason.to_string(),
        }
    }

    fn from_aggregate(target: &Host, phase: Phase, e: AggregateError) -> Self {
        if e.is_assertion() {
            Self::transition(target, phase, e)
        } else {
            Self::external(target, e)
        }
    }

    fn from_alert(target: &Host, e: AlertError) -> Self {
        Self::external(target, e)
    }
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioError::Precondition(reason) => write!(f, "precondition failed: {reason}"),
            ScenarioError::Transition {
                target,
                phase,
                reason,
            } => write!(f, "{target}: could not reach '{phase}': {reason}"),
            ScenarioError::External { target, reason } => write!(f, "{target}: {reason}"),
        }
    }
}

impl Error for ScenarioError {}

/// Timing and behaviour of the runner, derived from the config file.
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub setup_type: SetupType,
    pub loop_count: u32,
    pub liveness_command: String,
    pub pre_shutdown_command: Option<String>,
    pub alert_types: AlertTypes,
    pub private_network: Option<Ipv4Cidr>,
    /// Convergence of the degraded state, and the start/end-of-test health checks.
    pub health: Backoff,
    /// Convergence after remediation. Its timeout is the settle ceiling.
    pub settle: Backoff,
    pub power: Backoff,
    pub failover: Backoff,
    pub alert: Backoff,
}

impl ScenarioSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let ha = &config.ha;
        let private_network = match &config.private_network {
            Some(net) => Some(net.parse::<Ipv4Cidr>().map_err(|e| {
                ConfigError::Invalid(format!("private_network '{net}' is not a CIDR: {e}"))
            })?),
            None => None,
        };

        Ok(Self {
            setup_type: config.setup_type,
            loop_count: ha.loop_count,
            liveness_command: ha.liveness_command.clone(),
            pre_shutdown_command: ha.pre_shutdown_command.clone(),
            alert_types: config.alert_types.clone(),
            private_network,
            health: Backoff::from_params(ha, ha.health_timeout_secs),
            settle: Backoff::from_params(ha, ha.settle_timeout_secs),
            power: Backoff::from_params(ha, ha.power_timeout_secs),
            failover: Backoff::from_params(ha, ha.failover_timeout_secs),
            alert: Backoff::from_params(ha, ha.alert_timeout_secs),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepEntry {
    pub iteration: usize,
    pub target: usize,
    pub phase: Phase,
}

/// Ordered record of every state a scenario's targets passed through.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    entries: Vec<StepEntry>,
}

impl StepLog {
    pub fn record(&mut self, iteration: usize, target: &Host, phase: Phase) {
        info!("[{iteration}] {target}: {phase}");
        self.entries.push(StepEntry {
            iteration,
            target: target.index(),
            phase,
        });
    }

    pub fn entries(&self) -> &[StepEntry] {
        &self.entries
    }

    /// The phases recorded for one iteration.
    pub fn phases(&self, iteration: usize) -> Vec<Phase> {
        self.entries
            .iter()
            .filter(|e| e.iteration == iteration)
            .map(|e| e.phase)
            .collect()
    }

    /// Number of fault/recovery cycles that completed.
    pub fn completed_cycles(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.phase == Phase::RecoveredConfirmed)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub name: String,
    pub targets: Vec<usize>,
    pub seed: Option<u64>,
}

/// A node's private data interface and its address on the private network.
#[derive(Debug, Clone, PartialEq)]
pub struct DataInterface {
    pub iface: String,
    pub addr: Ipv4Addr,
}

/// Drives scenarios against a cluster and remembers what it has disrupted, so that teardown can
/// undo it whether or not the scenario succeeded.
pub struct ScenarioRunner<'a, B: Backend> {
    backend: &'a B,
    cluster: &'a Cluster,
    settings: &'a ScenarioSettings,
    pointer: FailoverPointer,
    alerts: AlertVerifier,
    log: StepLog,
    powered_off: BTreeSet<usize>,
    ifaces_down: BTreeMap<usize, String>,
}

impl<'a, B: Backend> ScenarioRunner<'a, B> {
    /// `holder` is the node currently serving the management service and `start` the beginning
    /// of the first alert window.
    pub fn new(
        backend: &'a B,
        cluster: &'a Cluster,
        settings: &'a ScenarioSettings,
        holder: usize,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            backend,
            cluster,
            settings,
            pointer: FailoverPointer::new(holder),
            alerts: AlertVerifier::new(start, settings.alert),
            log: StepLog::default(),
            powered_off: BTreeSet::new(),
            ifaces_down: BTreeMap::new(),
        }
    }

    pub fn step_log(&self) -> &StepLog {
        &self.log
    }

    pub fn into_step_log(self) -> StepLog {
        self.log
    }

    pub fn failover_holder(&self) -> Option<usize> {
        self.pointer.holder()
    }

    /// Whether the runner left any node powered off or with its interface down.
    pub fn is_disrupted(&self) -> bool {
        !self.powered_off.is_empty() || !self.ifaces_down.is_empty()
    }

    pub async fn run(&mut self, spec: &ScenarioSpec) -> Result<ScenarioReport, ScenarioError> {
        let (targets, seed) = spec.selector.targets(self.cluster.len());
        if targets.is_empty() {
            return Err(ScenarioError::Precondition(format!(
                "{} has no nodes to fault",
                spec.name
            )));
        }
        if let Some(&bad) = targets.iter().find(|&&t| t >= self.cluster.len()) {
            return Err(ScenarioError::Precondition(format!(
                "node index {bad} is outside a cluster of {} nodes",
                self.cluster.len()
            )));
        }
        if let Some(seed) = seed {
            info!(
                "{}: chose {} using seed {seed}",
                spec.name,
                self.cluster.host(targets[0])
            );
        }
        info!("{} ({}): {} on {:?}", spec.name, spec.tag, spec.fault, targets);

        let interfaces = match spec.fault {
            Fault::InterfaceDown => Some(self.data_interfaces().await?),
            Fault::PowerOff { .. } => None,
        };

        for (iteration, &target) in targets.iter().enumerate() {
            let iface = interfaces.as_ref().map(|ifaces| &ifaces[target]);
            self.run_cycle(iteration, target, spec.fault, iface).await?;
        }

        info!("{}: completed {} cycle(s)", spec.name, targets.len());
        Ok(ScenarioReport {
            name: spec.name.to_string(),
            targets,
            seed,
        })
    }

    /// Take `target` through one full fault/recovery cycle.
    async fn run_cycle(
        &mut self,
        iteration: usize,
        target: usize,
        fault: Fault,
        iface: Option<&DataInterface>,
    ) -> Result<(), ScenarioError> {
        let cluster = self.cluster;
        let host = cluster.host(target);
        let (fault_alert, resolution_alert) = self.alert_specs(fault, iface);

        self.log.record(iteration, host, Phase::Healthy);

        // Healthy -> FaultInjected
        let candidate = self.pointer.expected_after(cluster, target);
        match (fault, iface) {
            (Fault::PowerOff { safe }, _) => self.power_off(host, safe).await?,
            (Fault::InterfaceDown, Some(iface)) => {
                self.interface_down(host, iface, cluster.host(candidate))
                    .await?
            }
            (Fault::InterfaceDown, None) => {
                return Err(ScenarioError::external(host, "no data interface known"));
            }
        }
        self.pointer.relocate(cluster, target);
        self.log.record(iteration, host, Phase::FaultInjected);

        // FaultInjected -> DegradedConfirmed
        let holder = locator::await_service(
            self.backend,
            cluster,
            target,
            candidate,
            &self.settings.failover,
        )
        .await
        .map_err(|e| ScenarioError::transition(host, Phase::DegradedConfirmed, e))?;
        if holder != candidate {
            return Err(ScenarioError::transition(
                host,
                Phase::DegradedConfirmed,
                format!(
                    "management service moved to {}, expected {}",
                    cluster.host(holder).logical_name(),
                    cluster.host(candidate).logical_name()
                ),
            ));
        }
        self.pointer.confirm(holder);
        let via = cluster.host(holder);

        aggregate::await_channels(
            self.backend,
            cluster,
            via,
            &cluster.expected_with_failed(target),
            &Channel::BOTH,
            &self.settings.health,
        )
        .await
        .map_err(|e| ScenarioError::from_aggregate(host, Phase::DegradedConfirmed, e))?;

        self.expect_alert(host, Phase::DegradedConfirmed, &fault_alert)
            .await?;

        aggregate::check_services_on_others(
            self.backend,
            cluster,
            target,
            &self.settings.liveness_command,
        )
        .await
        .map_err(|e| ScenarioError::from_aggregate(host, Phase::DegradedConfirmed, e))?;
        self.log.record(iteration, host, Phase::DegradedConfirmed);

        // DegradedConfirmed -> Remediated
        match (fault, iface) {
            (Fault::PowerOff { .. }, _) => self.power_on(host).await?,
            (Fault::InterfaceDown, Some(iface)) => self.interface_up(host, iface, via).await?,
            (Fault::InterfaceDown, None) => {
                return Err(ScenarioError::external(host, "no data interface known"));
            }
        }
        self.log.record(iteration, host, Phase::Remediated);

        // Remediated -> RecoveredConfirmed. There is no readiness signal after remediation, so
        // this polls up to the settle ceiling rather than sleeping for it.
        aggregate::await_channels(
            self.backend,
            cluster,
            via,
            &cluster.all_online(),
            &Channel::BOTH,
            &self.settings.settle,
        )
        .await
        .map_err(|e| ScenarioError::from_aggregate(host, Phase::RecoveredConfirmed, e))?;

        self.expect_alert(host, Phase::RecoveredConfirmed, &resolution_alert)
            .await?;
        self.alerts.reset_window(Utc::now());
        self.log.record(iteration, host, Phase::RecoveredConfirmed);

        Ok(())
    }

    fn alert_specs(&self, fault: Fault, iface: Option<&DataInterface>) -> (AlertSpec, AlertSpec) {
        let types = &self.settings.alert_types;
        match (fault, iface) {
            (Fault::InterfaceDown, Some(iface)) => (
                AlertSpec::fault(&types.nw_interface, &iface.iface),
                AlertSpec::resolution(&types.nw_interface, &iface.iface),
            ),
            _ => (
                AlertSpec::fault(&types.fault, &types.iem_resource),
                AlertSpec::resolution(&types.resolved, &types.iem_resource),
            ),
        }
    }

    async fn expect_alert(
        &mut self,
        host: &Host,
        phase: Phase,
        spec: &AlertSpec,
    ) -> Result<(), ScenarioError> {
        let found = self
            .alerts
            .verify(self.backend, spec)
            .await
            .map_err(|e| ScenarioError::from_alert(host, e))?;
        if !found {
            return Err(ScenarioError::transition(
                host,
                phase,
                format!(
                    "no {spec} since {}",
                    self.alerts.window_start().to_rfc3339()
                ),
            ));
        }
        Ok(())
    }

    async fn pre_shutdown(&self, host: &Host) -> Result<(), ScenarioError> {
        if self.settings.setup_type != SetupType::Hw {
            return Ok(());
        }
        match &self.settings.pre_shutdown_command {
            Some(command) => {
                info!("{host}: running hardware pre-shutdown step '{command}'");
                self.backend
                    .execute(host, command, ExecMode::Strict)
                    .await
                    .map_err(|e| ScenarioError::transition(host, Phase::FaultInjected, e))?;
            }
            None => warn!("{host}: hardware setup but no pre-shutdown command configured"),
        }
        Ok(())
    }

    async fn power_off(&mut self, host: &Host, safe: bool) -> Result<(), ScenarioError> {
        self.pre_shutdown(host).await?;

        // Recorded before acting so teardown powers the node back on even if this step fails
        // half way.
        self.powered_off.insert(host.index());

        if safe {
            info!("{host}: shutting down");
            // The ssh session dies with the node, so the exit status carries no information.
            let output = self
                .backend
                .execute(host, shell::SHUTDOWN, ExecMode::Tolerant)
                .await
                .map_err(|e| ScenarioError::external(host, e))?;
            debug!("{host}: shutdown returned {:?}", output.status);
        } else {
            info!("{host}: powering off through the BMC");
            self.backend
                .power(host, FenceCommand::Off)
                .await
                .map_err(|e| ScenarioError::external(host, e))?;
        }

        self.await_reachable(host, false).await
    }

    async fn power_on(&mut self, host: &Host) -> Result<(), ScenarioError> {
        info!("{host}: powering on");
        self.backend
            .power(host, FenceCommand::On)
            .await
            .map_err(|e| ScenarioError::external(host, e))?;
        self.await_reachable(host, true).await?;
        self.powered_off.remove(&host.index());
        info!("{host}: powered on");
        Ok(())
    }

    async fn await_reachable(&self, host: &Host, reachable: bool) -> Result<(), ScenarioError> {
        let backend = self.backend;
        let what = format!(
            "{host} to become {}",
            if reachable { "reachable" } else { "unreachable" }
        );
        let phase = if reachable {
            Phase::Remediated
        } else {
            Phase::FaultInjected
        };
        poll_until(&what, &self.settings.power, move || async move {
            if backend.is_reachable(host).await == reachable {
                Ok(())
            } else {
                Err(if reachable {
                    "host has not powered on yet"
                } else {
                    "host has not shut down yet"
                })
            }
        })
        .await
        .map_err(|e| ScenarioError::transition(host, phase, e))
    }

    async fn interface_down(
        &mut self,
        host: &Host,
        iface: &DataInterface,
        observer: &Host,
    ) -> Result<(), ScenarioError> {
        info!("{host}: taking {} down", iface.iface);
        self.ifaces_down.insert(host.index(), iface.iface.clone());
        self.backend
            .execute(host, &shell::ip_link(&iface.iface, false), ExecMode::Strict)
            .await
            .map_err(|e| ScenarioError::external(host, e))?;

        if !self.ping_unresolved(observer, iface).await? {
            return Err(ScenarioError::transition(
                host,
                Phase::FaultInjected,
                format!("{} still answers on {}", iface.iface, iface.addr),
            ));
        }
        Ok(())
    }

    async fn interface_up(
        &mut self,
        host: &Host,
        iface: &DataInterface,
        observer: &Host,
    ) -> Result<(), ScenarioError> {
        info!("{host}: bringing {} back up", iface.iface);
        self.backend
            .execute(host, &shell::ip_link(&iface.iface, true), ExecMode::Strict)
            .await
            .map_err(|e| ScenarioError::external(host, e))?;

        if self.ping_unresolved(observer, iface).await? {
            return Err(ScenarioError::transition(
                host,
                Phase::Remediated,
                format!("{} is still down on {}", iface.iface, iface.addr),
            ));
        }
        self.ifaces_down.remove(&host.index());
        Ok(())
    }

    /// Ping `iface` from `observer`; true if the ping reported the name-resolution failure.
    async fn ping_unresolved(
        &self,
        observer: &Host,
        iface: &DataInterface,
    ) -> Result<bool, ScenarioError> {
        let output = self
            .backend
            .execute(
                observer,
                &shell::ping(&iface.addr.to_string()),
                ExecMode::Tolerant,
            )
            .await
            .map_err(|e| ScenarioError::external(observer, e))?;
        Ok(output
            .first_line()
            .contains(shell::PING_UNRESOLVED_MARKER))
    }

    /// Find every node's private data interface, in cluster order.
    pub async fn data_interfaces(&self) -> Result<Vec<DataInterface>, ScenarioError> {
        let mut interfaces = Vec::with_capacity(self.cluster.len());
        for host in self.cluster.hosts() {
            let output = self
                .backend
                .execute(host, shell::LIST_IPV4_ADDRS, ExecMode::Strict)
                .await
                .map_err(|e| ScenarioError::external(host, e))?;

            let found = match (host.data_iface(), &self.settings.private_network) {
                (Some(name), _) => shell::parse_ipv4_addrs(&output.lines)
                    .into_iter()
                    .find(|(iface, _)| iface == name),
                (None, Some(network)) => shell::find_private_iface(&output.lines, network),
                (None, None) => {
                    return Err(ScenarioError::Precondition(format!(
                        "{host}: no data_iface configured and no private_network to search"
                    )));
                }
            };

            let Some((iface, addr)) = found else {
                return Err(ScenarioError::Precondition(format!(
                    "{host}: could not find the private data interface"
                )));
            };
            debug!("{host}: private data interface {iface} ({addr})");
            interfaces.push(DataInterface { iface, addr });
        }
        Ok(interfaces)
    }

    /// Best-effort undo of anything the scenario left disrupted: interfaces are brought back up
    /// and every node that does not answer is powered on. Every problem is reported, but one
    /// failure does not stop the attempt on the other nodes.
    pub async fn restore(&mut self) -> Vec<ScenarioError> {
        let mut problems = Vec::new();
        let cluster = self.cluster;

        for (index, iface) in std::mem::take(&mut self.ifaces_down) {
            let host = cluster.host(index);
            info!("{host}: restoring {iface}");
            if let Err(e) = self
                .backend
                .execute(host, &shell::ip_link(&iface, true), ExecMode::Strict)
                .await
            {
                problems.push(ScenarioError::external(host, e));
            }
        }

        if self.powered_off.is_empty() {
            return problems;
        }

        for host in cluster.hosts() {
            if self.backend.is_reachable(host).await {
                continue;
            }
            if let Err(e) = self.power_on(host).await {
                problems.push(e);
            }
        }
        self.powered_off.clear();

        problems
    }
}
