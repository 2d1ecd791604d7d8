// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    host::{FenceError, Host},
};

/// Cluster is the in-memory model of the cluster under test: an ordered, fixed list of hosts.
///
/// The position of a host in this list is its identity across every view of the cluster: the
/// CLI and REST health reports name it `srvnode-<position + 1>`, and power control addresses the
/// BMC configured at that position.
#[derive(Debug, Clone)]
pub struct Cluster {
    hosts: Vec<Host>,
}

impl Cluster {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self { hosts }
    }

    pub fn from_config(config: &Config) -> Result<Self, FenceError> {
        let hosts = config
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| Host::from_config(i, node))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { hosts })
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn host(&self, index: usize) -> &Host {
        &self.hosts[index]
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// The node that takes over the failover-sensitive services when `index` goes down.
    pub fn successor(&self, index: usize) -> usize {
        (index + 1) % self.hosts.len()
    }

    pub fn logical_names(&self) -> Vec<String> {
        self.hosts.iter().map(Host::logical_name).collect()
    }

    /// Look a host up by either its hostname or its logical `srvnode-N` name.
    pub fn get_host_by_name(&self, name: &str) -> Option<&Host> {
        self.hosts
            .iter()
            .find(|host| host.name() == name || host.logical_name() == name)
    }

    pub fn all_online(&self) -> HealthSnapshot {
        HealthSnapshot(vec![HealthState::Online; self.len()])
    }

    /// The expected snapshot while exactly one node is faulted.
    pub fn expected_with_failed(&self, failed: usize) -> HealthSnapshot {
        HealthSnapshot(
            (0..self.len())
                .map(|i| {
                    if i == failed {
                        HealthState::Failed
                    } else {
                        HealthState::Online
                    }
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Online,
    Failed,
    Unknown,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                HealthState::Online => "online",
                HealthState::Failed => "failed",
                HealthState::Unknown => "unknown",
            }
        )
    }
}

impl FromStr for HealthState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" | "ok" => Ok(HealthState::Online),
            "failed" | "offline" | "fault" => Ok(HealthState::Failed),
            "unknown" => Ok(HealthState::Unknown),
            other => Err(format!("unrecognized node status '{other}'")),
        }
    }
}

/// A per-node health vector across the whole cluster, in cluster order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot(pub Vec<HealthState>);

impl HealthSnapshot {
    pub fn states(&self) -> &[HealthState] {
        &self.0
    }

    /// Indices at which this snapshot disagrees with `other`.
    pub fn mismatches(&self, other: &HealthSnapshot) -> Vec<usize> {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .filter(|&i| self.0.get(i) != other.0.get(i))
            .collect()
    }
}

impl fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, state) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{state}\"")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_nodes() -> Cluster {
        Cluster::new(
            (0..3)
                .map(|i| Host::new(i, &format!("node{i}"), "root", None))
                .collect(),
        )
    }

    #[test]
    fn successor_wraps() {
        let cluster = three_nodes();
        assert_eq!(cluster.successor(0), 1);
        assert_eq!(cluster.successor(1), 2);
        assert_eq!(cluster.successor(2), 0);
    }

    #[test]
    fn expected_vector_has_single_failure() {
        let cluster = three_nodes();
        assert_eq!(
            cluster.expected_with_failed(1).to_string(),
            r#"["online", "failed", "online"]"#
        );
    }

    #[test]
    fn mismatch_indices() {
        let cluster = three_nodes();
        let expected = cluster.expected_with_failed(0);
        assert_eq!(expected.mismatches(&cluster.all_online()), vec![0]);
        assert!(expected.mismatches(&expected).is_empty());
    }

    #[test]
    fn lookup_by_either_name() {
        let cluster = three_nodes();
        assert_eq!(cluster.get_host_by_name("srvnode-3").unwrap().name(), "node2");
        assert_eq!(cluster.get_host_by_name("node0").unwrap().index(), 0);
        assert!(cluster.get_host_by_name("srvnode-4").is_none());
    }
}
