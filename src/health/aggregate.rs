// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Cluster-wide health checks built on the per-channel health queries.

use std::{error::Error, fmt};

use {
    futures::future,
    log::{debug, info},
};

use super::{Channel, HealthError, HealthQuery};
use crate::{
    cluster::{Cluster, HealthSnapshot},
    host::{shell, ExecError, ExecMode, Host, RemoteExec},
    poll::{poll_until, Backoff},
};

#[derive(Debug)]
pub enum AggregateError {
    /// A channel reported a health vector other than the expected one.
    Mismatch {
        channel: Channel,
        expected: HealthSnapshot,
        actual: HealthSnapshot,
        nodes: Vec<String>,
    },
    /// A node's own view of the cluster (pacemaker status) is not clean.
    NodeUnhealthy { node: String, reason: String },
    /// The liveness check for cluster services failed on a node that should be unaffected.
    ServiceDown { node: String, reason: String },
    Query(HealthError),
    Exec(ExecError),
}

impl AggregateError {
    /// Whether this is an observed-state assertion failure rather than a failure to query.
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            AggregateError::Mismatch { .. }
                | AggregateError::NodeUnhealthy { .. }
                | AggregateError::ServiceDown { .. }
        )
    }

    /// The node the failure is about, if it concerns exactly one.
    pub fn node(&self) -> Option<&str> {
        match self {
            AggregateError::Mismatch { nodes, .. } if nodes.len() == 1 => Some(nodes[0].as_str()),
            AggregateError::NodeUnhealthy { node, .. } | AggregateError::ServiceDown { node, .. } => {
                Some(node.as_str())
            }
            _ => None,
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateError::Mismatch {
                channel,
                expected,
                actual,
                nodes,
            } => write!(
                f,
                "{channel} reports unexpected status for {}: expected {expected}, got {actual}",
                nodes.join(", ")
            ),
            AggregateError::NodeUnhealthy { node, reason } => {
                write!(f, "{node} is not healthy: {reason}")
            }
            AggregateError::ServiceDown { node, reason } => {
                write!(f, "services on {node} are not operative: {reason}")
            }
            AggregateError::Query(e) => write!(f, "{e}"),
            AggregateError::Exec(e) => write!(f, "{e}"),
        }
    }
}

impl Error for AggregateError {}

impl From<HealthError> for AggregateError {
    fn from(e: HealthError) -> Self {
        AggregateError::Query(e)
    }
}

impl From<ExecError> for AggregateError {
    fn from(e: ExecError) -> Self {
        AggregateError::Exec(e)
    }
}

/// Take one health snapshot over `channel`. `via` is the host serving the management service,
/// used by the CLI channel.
pub async fn observe<B: HealthQuery>(
    backend: &B,
    cluster: &Cluster,
    channel: Channel,
    via: &Host,
) -> Result<HealthSnapshot, HealthError> {
    let report = match channel {
        Channel::Cli => backend.cli_status(via).await?,
        Channel::Rest => backend.rest_status().await?,
    };
    Ok(report.snapshot(cluster))
}

/// Check, once, that every selected channel reports exactly `expected`.
pub async fn verify_channels<B: HealthQuery>(
    backend: &B,
    cluster: &Cluster,
    via: &Host,
    expected: &HealthSnapshot,
    channels: &[Channel],
) -> Result<(), AggregateError> {
    for &channel in channels {
        let actual = observe(backend, cluster, channel, via).await?;
        let mismatches = expected.mismatches(&actual);
        if !mismatches.is_empty() {
            return Err(AggregateError::Mismatch {
                channel,
                expected: expected.clone(),
                actual,
                nodes: mismatches
                    .into_iter()
                    .map(crate::host::logical_name)
                    .collect(),
            });
        }
        debug!("{channel} health matches {expected}");
    }
    Ok(())
}

/// Poll until every selected channel reports `expected`, or the backoff's timeout elapses.
///
/// On timeout the last observed disagreement is returned, so a failure names the node and the
/// actual vector rather than just "timed out".
pub async fn await_channels<B: HealthQuery>(
    backend: &B,
    cluster: &Cluster,
    via: &Host,
    expected: &HealthSnapshot,
    channels: &[Channel],
    backoff: &Backoff,
) -> Result<(), AggregateError> {
    let what = format!("cluster health {expected}");
    poll_until(&what, backoff, move || {
        verify_channels(backend, cluster, via, expected, channels)
    })
    .await
    .map_err(|timeout| timeout.last)?;

    info!("cluster health converged to {expected}");
    Ok(())
}

/// Find the first problem in `pcs status` output, if any.
pub fn parse_pcs_status(lines: &[String]) -> Result<(), String> {
    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with("OFFLINE:") {
            return Err(format!("cluster nodes offline: {trimmed}"));
        }
        if trimmed.contains("UNCLEAN") {
            return Err(format!("unclean node: {trimmed}"));
        }
        if trimmed.starts_with("Failed Resource Actions") || trimmed.starts_with("Failed Actions")
        {
            return Err("failed resource actions present".to_string());
        }
        if trimmed.contains("Stopped") && !trimmed.contains("disabled") {
            return Err(format!("stopped resource: {trimmed}"));
        }
    }

    if lines.is_empty() {
        return Err("empty pcs status output".to_string());
    }

    Ok(())
}

/// Check one node's own view of the cluster is clean.
pub async fn check_node_health<B: RemoteExec>(
    backend: &B,
    host: &Host,
) -> Result<(), AggregateError> {
    let output = backend
        .execute(host, shell::PCS_STATUS, ExecMode::Strict)
        .await?;
    parse_pcs_status(&output.lines).map_err(|reason| AggregateError::NodeUnhealthy {
        node: host.logical_name(),
        reason,
    })
}

/// Check every node's own view of the cluster is clean. The queries are read-only, so they are
/// issued together; the first failing node in cluster order is reported.
pub async fn check_all_nodes_health<B: RemoteExec>(
    backend: &B,
    cluster: &Cluster,
) -> Result<(), AggregateError> {
    let results =
        future::join_all(cluster.hosts().iter().map(|h| check_node_health(backend, h))).await;
    results.into_iter().collect::<Result<Vec<()>, _>>()?;
    Ok(())
}

/// Liveness check of cluster services on every node except `faulted`.
pub async fn check_services_on_others<B: RemoteExec>(
    backend: &B,
    cluster: &Cluster,
    faulted: usize,
    liveness_command: &str,
) -> Result<(), AggregateError> {
    for host in cluster.hosts().iter().filter(|h| h.index() != faulted) {
        let output = backend
            .execute(host, liveness_command, ExecMode::Tolerant)
            .await?;
        if !output.success() {
            return Err(AggregateError::ServiceDown {
                node: host.logical_name(),
                reason: format!(
                    "'{liveness_command}' exited with {:?}: {}",
                    output.status,
                    output.first_line()
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        s.lines().map(str::to_string).collect()
    }

    #[test]
    fn clean_pcs_status() {
        let output = lines(
            "Cluster name: cortx_cluster\n\
             Online: [ srvnode-1 srvnode-2 srvnode-3 ]\n\
             Full list of resources:\n  \
             csm-agent (systemd:csm_agent): Started srvnode-1",
        );
        assert!(parse_pcs_status(&output).is_ok());
    }

    #[test]
    fn offline_node_detected() {
        let output = lines("Online: [ srvnode-1 srvnode-3 ]\nOFFLINE: [ srvnode-2 ]");
        assert!(parse_pcs_status(&output).unwrap_err().contains("srvnode-2"));
    }

    #[test]
    fn failed_actions_detected() {
        let output = lines("Online: [ srvnode-1 ]\n\nFailed Resource Actions:\n* x_monitor");
        assert!(parse_pcs_status(&output).is_err());
    }
}
