// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Shell commands issued on cluster nodes, and parsers for their output.

use std::net::Ipv4Addr;

use cidr::Ipv4Cidr;

/// Graceful shutdown of a node.
pub const SHUTDOWN: &str = "shutdown -h now";

/// Pacemaker cluster status, used for the per-node health check.
pub const PCS_STATUS: &str = "pcs status";

/// Exits zero only on the node currently serving the management service.
pub const CSM_SERVICE_CHECK: &str = "systemctl is-active csm_agent";

pub const LIST_IPV4_ADDRS: &str = "ip -o -4 addr show";

/// Kubernetes node listing, run on the master of a k8s deployment.
pub const KUBECTL_GET_NODES: &str = "kubectl get nodes";

/// Text that `ping` prints when the target cannot be resolved or reached over the private data
/// network.
pub const PING_UNRESOLVED_MARKER: &str = "Name or service not known";

pub fn ip_link(iface: &str, up: bool) -> String {
    format!("ip link set {iface} {}", if up { "up" } else { "down" })
}

pub fn ping(addr: &str) -> String {
    format!("ping -c 1 -W 3 {addr}")
}

pub fn cli_system_status(user: &str, password: &str) -> String {
    format!("cortxcli --username {user} --password {password} system status")
}

/// Parse `ip -o -4 addr show` output into (interface, address) pairs.
///
/// Lines look like:
/// `3: eth1    inet 192.168.10.4/24 brd 192.168.10.255 scope global eth1 ...`
pub fn parse_ipv4_addrs(output: &[String]) -> Vec<(String, Ipv4Addr)> {
    output
        .iter()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let iface = tokens.nth(1)?.trim_end_matches(':');
            if tokens.next()? != "inet" {
                return None;
            }
            let addr = tokens.next()?.split('/').next()?.parse().ok()?;
            Some((iface.to_string(), addr))
        })
        .collect()
}

/// Pick the interface whose address lies inside the private data network.
pub fn find_private_iface(output: &[String], network: &Ipv4Cidr) -> Option<(String, Ipv4Addr)> {
    parse_ipv4_addrs(output)
        .into_iter()
        .find(|(_, addr)| network.contains(addr))
}
