// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Per-node health as reported by the cluster's management plane.
//!
//! Health is observed through two independent channels: the management CLI run on the node
//! currently serving the management service, and the REST management endpoint. A correctly
//! functioning cluster reports the same thing on both.

use std::{collections::BTreeMap, error::Error, fmt};

use crate::{
    cluster::{Cluster, HealthSnapshot, HealthState},
    host::{ExecError, Host},
};

pub mod aggregate;
pub mod rest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Cli,
    Rest,
}

impl Channel {
    pub const BOTH: [Channel; 2] = [Channel::Cli, Channel::Rest];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Channel::Cli => "CLI",
                Channel::Rest => "REST",
            }
        )
    }
}

/// Node status keyed by logical node name (`srvnode-N`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport(pub BTreeMap<String, HealthState>);

impl StatusReport {
    pub fn get(&self, logical_name: &str) -> HealthState {
        self.0
            .get(logical_name)
            .copied()
            .unwrap_or(HealthState::Unknown)
    }

    /// Order the report by cluster position. Nodes missing from the report are `Unknown`.
    pub fn snapshot(&self, cluster: &Cluster) -> HealthSnapshot {
        HealthSnapshot(
            cluster
                .hosts()
                .iter()
                .map(|host| self.get(&host.logical_name()))
                .collect(),
        )
    }
}

impl FromIterator<(String, HealthState)> for StatusReport {
    fn from_iter<I: IntoIterator<Item = (String, HealthState)>>(iter: I) -> Self {
        StatusReport(iter.into_iter().collect())
    }
}

#[derive(Debug)]
pub enum HealthError {
    Exec(ExecError),
    Parse(String),
    Rest(String),
}

impl fmt::Display for HealthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthError::Exec(e) => write!(f, "health query failed: {e}"),
            HealthError::Parse(e) => write!(f, "could not parse health output: {e}"),
            HealthError::Rest(e) => write!(f, "REST health query failed: {e}"),
        }
    }
}

impl Error for HealthError {}

impl From<ExecError> for HealthError {
    fn from(e: ExecError) -> Self {
        HealthError::Exec(e)
    }
}

/// Queries for cluster-wide node health.
#[allow(async_fn_in_trait)]
pub trait HealthQuery {
    /// Run the management CLI's system status on `via`, which must be serving the management
    /// service.
    async fn cli_status(&self, via: &Host) -> Result<StatusReport, HealthError>;

    async fn rest_status(&self) -> Result<StatusReport, HealthError>;
}

/// Parse the node table printed by `cortxcli system status`.
///
/// Rows look like `| srvnode-1 | node | online |`: the first cell names the node and the status
/// is the first later cell that parses as a health state.
pub fn parse_cli_status(lines: &[String]) -> Result<StatusReport, HealthError> {
    let mut report = BTreeMap::new();

    for line in lines {
        let cells: Vec<&str> = line
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        let Some((name, rest)) = cells.split_first() else {
            continue;
        };
        if !name.starts_with("srvnode-") {
            continue;
        }
        let state = rest
            .iter()
            .find_map(|cell| cell.parse::<HealthState>().ok())
            .ok_or_else(|| HealthError::Parse(format!("no status in row '{line}'")))?;
        report.insert(name.to_string(), state);
    }

    if report.is_empty() {
        return Err(HealthError::Parse(
            "no node rows in system status output".to_string(),
        ));
    }

    Ok(StatusReport(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        s.lines().map(str::to_string).collect()
    }

    #[test]
    fn parses_node_table() {
        let output = lines(
            "+-----------+------+---------+\n\
             | Name      | Type | Status  |\n\
             +-----------+------+---------+\n\
             | srvnode-1 | node | online  |\n\
             | srvnode-2 | node | failed  |\n\
             | srvnode-3 | node | online  |\n\
             +-----------+------+---------+",
        );
        let report = parse_cli_status(&output).unwrap();
        assert_eq!(report.get("srvnode-2"), HealthState::Failed);
        assert_eq!(report.get("srvnode-3"), HealthState::Online);
        assert_eq!(report.get("srvnode-4"), HealthState::Unknown);
    }

    #[test]
    fn empty_table_is_an_error() {
        assert!(matches!(
            parse_cli_status(&lines("Session expired")),
            Err(HealthError::Parse(_))
        ));
    }

    #[test]
    fn snapshot_in_cluster_order() {
        let cluster = Cluster::new(
            (0..2)
                .map(|i| Host::new(i, &format!("n{i}"), "root", None))
                .collect(),
        );
        let report: StatusReport = [("srvnode-2".to_string(), HealthState::Failed)]
            .into_iter()
            .collect();
        assert_eq!(
            report.snapshot(&cluster),
            HealthSnapshot(vec![HealthState::Unknown, HealthState::Failed])
        );
    }
}
