// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{collections::HashSet, error::Error, fmt};

use serde::{Deserialize, Serialize};

/// Config, along with its children, is the model of a test bed as written in the HA test
/// configuration file. The config file is deserialized into a Config object.
///
/// As with the cluster model, the in-memory view (`cluster::Cluster`) is built from this but kept
/// separate, so the file format can stay stable while the runtime model changes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub setup_type: SetupType,

    /// CIDR used to pick out each node's private data interface when `data_iface` is not given.
    pub private_network: Option<String>,

    pub nodes: Vec<Node>,

    pub csm: Csm,

    #[serde(default)]
    pub ha: HaParams,

    #[serde(default)]
    pub alert_types: AlertTypes,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub enum SetupType {
    #[default]
    #[serde(rename = "VM")]
    Vm,
    #[serde(rename = "HW")]
    Hw,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Node {
    pub hostname: String,
    pub username: String,
    pub password: Option<String>,
    pub data_iface: Option<String>,
    pub bmc: Option<Bmc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Bmc {
    /// One of "ipmilan", "redfish" or "powerman".
    pub fence_agent: String,
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Csm {
    pub mgmt_vip: String,
    pub port: Option<u16>,
    pub admin_user: String,
    pub admin_password: String,
    #[serde(default)]
    pub verify_tls: bool,
}

/// Timing and behaviour knobs for the HA scenarios.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HaParams {
    pub loop_count: u32,
    pub settle_timeout_secs: u64,
    pub health_timeout_secs: u64,
    pub power_timeout_secs: u64,
    pub failover_timeout_secs: u64,
    pub alert_timeout_secs: u64,
    pub poll_initial_ms: u64,
    pub poll_max_interval_ms: u64,
    pub liveness_command: String,
    pub pre_shutdown_command: Option<String>,
}

impl Default for HaParams {
    fn default() -> Self {
        Self {
            loop_count: 5,
            settle_timeout_secs: 40,
            health_timeout_secs: 120,
            power_timeout_secs: 300,
            failover_timeout_secs: 180,
            alert_timeout_secs: 120,
            poll_initial_ms: 1000,
            poll_max_interval_ms: 10_000,
            liveness_command: "hctl status".to_string(),
            pre_shutdown_command: None,
        }
    }
}

/// Names used by the alerting subsystem for the alerts the scenarios wait on.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AlertTypes {
    pub fault: String,
    pub resolved: String,
    pub iem_resource: String,
    pub nw_interface: String,
}

impl Default for AlertTypes {
    fn default() -> Self {
        Self {
            fault: "fault".to_string(),
            resolved: "fault_resolved".to_string(),
            iem_resource: "iem".to_string(),
            nw_interface: "node:interface:nw".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String, std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "could not read config file \"{path}\": {e}"),
            ConfigError::Parse(e) => write!(f, "could not parse config file: {e}"),
            ConfigError::Invalid(reason) => write!(f, "invalid config: {reason}"),
        }
    }
}

impl Error for ConfigError {}

impl Config {
    /// Load and validate the config file at `path`, or the default location.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_string(),
            None => crate::default_config_path(),
        };
        let contents =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(path.clone(), e))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("no nodes configured".to_string()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.hostname.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "hostname '{}' listed more than once",
                    node.hostname
                )));
            }
        }

        if self.ha.loop_count == 0 {
            return Err(ConfigError::Invalid("ha.loop_count must be at least 1".to_string()));
        }

        if let Some(net) = &self.private_network {
            net.parse::<cidr::Ipv4Cidr>().map_err(|e| {
                ConfigError::Invalid(format!("private_network '{net}' is not a CIDR: {e}"))
            })?;
        }

        Ok(())
    }

    pub fn mgmt_port(&self) -> u16 {
        self.csm.port.unwrap_or_else(crate::default_mgmt_port)
    }

    pub fn print_summary(&self) {
        println!("setup type: {:?}", self.setup_type);
        println!("management endpoint: {}:{}", self.csm.mgmt_vip, self.mgmt_port());
        for (i, node) in self.nodes.iter().enumerate() {
            let bmc = match &node.bmc {
                Some(bmc) => format!("{} via {}", bmc.address, bmc.fence_agent),
                None => "<none>".to_string(),
            };
            println!("srvnode-{}: {} (bmc: {bmc})", i + 1, node.hostname);
        }
        println!("loop count: {}", self.ha.loop_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[nodes]]
        hostname = "node1"
        username = "root"

        [[nodes]]
        hostname = "node2"
        username = "root"

        [csm]
        mgmt_vip = "10.0.0.1"
        admin_user = "admin"
        admin_password = "pw"
    "#;

    #[test]
    fn defaults_fill_in() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.setup_type, SetupType::Vm);
        assert_eq!(config.ha.settle_timeout_secs, 40);
        assert_eq!(config.alert_types.iem_resource, "iem");
        assert_eq!(config.nodes.len(), 2);
    }

    #[test]
    fn duplicate_hostname_rejected() {
        let dup = MINIMAL.replace("node2", "node1");
        assert!(matches!(
            Config::from_toml(&dup),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn hw_setup_type_parses() {
        let hw = format!("setup_type = \"HW\"\n{MINIMAL}");
        let config = Config::from_toml(&hw).unwrap();
        assert_eq!(config.setup_type, SetupType::Hw);
    }

    #[test]
    fn bad_private_network_rejected() {
        let bad = format!("private_network = \"not-a-net\"\n{MINIMAL}");
        assert!(Config::from_toml(&bad).is_err());
    }
}
