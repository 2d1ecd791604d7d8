// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Registration of a freshly deployed k8s cluster with the test-setup database, run by CI before
//! the HA suite.

use std::{
    error::Error,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use {
    clap::Parser,
    log::{debug, info, warn},
    serde::Deserialize,
    serde_json::{json, Value},
    tokio::process::Command,
};

use crate::host::{shell, ExecError, ExecMode, Host, RemoteExec};

/// Printed by the registration tool when the setup is already registered. (Sic.)
const ENTRY_EXISTS_MARKER: &str = "Entry already exits";

const S3_ENDPOINTS: &str = "s3.seagate.com sts.seagate.com iam.seagate.com sts.cloud.seagate.com";

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Register a k8s cluster with the test-setup database", long_about = None)]
pub struct CiArgs {
    /// Hostname of the k8s master node.
    #[arg(long)]
    pub master_node: String,

    /// Number of worker nodes in the cluster.
    #[arg(long)]
    pub node_count: usize,

    /// Password of the nodes' root user.
    #[arg(long)]
    pub password: String,

    #[arg(long)]
    pub mgmt_vip: String,

    /// External load balancer IPs, comma or space separated. The first one fronts S3.
    #[arg(long)]
    pub ext_ip_list: String,

    #[arg(long, default_value = "root")]
    pub username: String,

    #[arg(long, default_value = "/etc/hosts")]
    pub hosts_file: PathBuf,

    /// Setup-entry JSON; read as a template and rewritten in place.
    #[arg(long, default_value = "tools/setup_update/setup_entry.json")]
    pub setup_entry_json: PathBuf,

    /// JSON file holding `DB_USER` and `DB_PASSWORD`.
    #[arg(long, default_value = "/root/secrets.json")]
    pub secrets: PathBuf,

    /// Program (and leading arguments) of the registration tool.
    #[arg(long, num_args = 1.., default_values = ["python3", "tools/setup_update/setup_entry.py"])]
    pub registration_tool: Vec<String>,
}

/// Settings passed in through the environment by the CI job.
#[derive(Debug, Clone, PartialEq)]
pub struct CiEnv {
    pub setup_name: String,
    pub admin_user: String,
    pub admin_password: String,
}

impl CiEnv {
    pub fn from_env() -> Result<Self, CiError> {
        let var = |name: &str| std::env::var(name).map_err(|_| CiError::Env(name.to_string()));
        Ok(Self {
            setup_name: var("Target_Node")?,
            admin_user: var("ADMIN_USR")?,
            admin_password: var("ADMIN_PWD")?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DbSecrets {
    #[serde(rename = "DB_USER")]
    db_user: String,
    #[serde(rename = "DB_PASSWORD")]
    db_password: String,
}

#[derive(Debug)]
pub enum CiError {
    Env(String),
    Io(String, io::Error),
    Json(String, serde_json::Error),
    Exec(ExecError),
    Template(String),
    NoExternalIp,
    Registration(String),
}

impl fmt::Display for CiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CiError::Env(name) => write!(f, "environment variable {name} is not set"),
            CiError::Io(path, e) => write!(f, "{path}: {e}"),
            CiError::Json(path, e) => write!(f, "{path}: {e}"),
            CiError::Exec(e) => write!(f, "{e}"),
            CiError::Template(e) => write!(f, "setup-entry template: {e}"),
            CiError::NoExternalIp => write!(f, "no external load balancer IP given"),
            CiError::Registration(e) => write!(f, "registration failed: {e}"),
        }
    }
}

impl Error for CiError {}

impl From<ExecError> for CiError {
    fn from(e: ExecError) -> Self {
        CiError::Exec(e)
    }
}

fn read_json(path: &Path) -> Result<Value, CiError> {
    let name = path.display().to_string();
    let contents = fs::read_to_string(path).map_err(|e| CiError::Io(name.clone(), e))?;
    serde_json::from_str(&contents).map_err(|e| CiError::Json(name, e))
}

pub fn first_ext_ip(list: &str) -> Result<String, CiError> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .find(|ip| !ip.is_empty())
        .map(str::to_string)
        .ok_or(CiError::NoExternalIp)
}

/// Worker hostnames from `kubectl get nodes` output.
pub fn parse_worker_nodes(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| line.contains("worker"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// A hosts file that sends the S3 endpoints to the external load balancer.
pub fn hosts_file_contents(ext_ip: &str) -> String {
    format!(
        "127.0.0.1   localhost localhost.localdomain localhost4 localhost4.localdomain4\n\
         ::1         localhost localhost.localdomain localhost6 localhost6.localdomain6\n\
         {ext_ip} {S3_ENDPOINTS}\n"
    )
}

/// Fill the setup-entry template for a cluster whose first host is the master.
pub fn fill_setup_entry(
    mut entry: Value,
    env: &CiEnv,
    hosts: &[String],
    username: &str,
    password: &str,
    mgmt_vip: &str,
    ext_ip: &str,
) -> Result<Value, CiError> {
    let nodes: Vec<Value> = hosts
        .iter()
        .enumerate()
        .map(|(i, host)| {
            json!({
                "host": format!("srvnode-{}", i + 1),
                "hostname": host,
                "username": username,
                "password": password,
                "node_type": if i == 0 { "master" } else { "worker" },
            })
        })
        .collect();

    let Some(root) = entry.as_object_mut() else {
        return Err(CiError::Template("not a JSON object".to_string()));
    };
    root.insert("setupname".to_string(), json!(env.setup_name));
    root.insert("product_family".to_string(), json!("LC"));
    root.insert("product_type".to_string(), json!("k8s"));
    root.insert("lb".to_string(), json!(ext_ip));
    root.insert("nodes".to_string(), Value::Array(nodes));

    let csm = root
        .entry("csm")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| CiError::Template("'csm' is not an object".to_string()))?;
    csm.insert("mgmt_vip".to_string(), json!(mgmt_vip));
    let admin = csm
        .entry("csm_admin_user")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| CiError::Template("'csm.csm_admin_user' is not an object".to_string()))?;
    admin.insert("username".to_string(), json!(env.admin_user));
    admin.insert("password".to_string(), json!(env.admin_password));

    Ok(entry)
}

/// Run the registration tool once; returns its combined output.
async fn register(args: &CiArgs, secrets: &DbSecrets, new_entry: bool) -> Result<String, CiError> {
    let Some((program, leading)) = args.registration_tool.split_first() else {
        return Err(CiError::Registration("no registration tool given".to_string()));
    };

    let mut cmd = Command::new(program);
    cmd.args(leading)
        .arg("--fpath")
        .arg(&args.setup_entry_json)
        .args([
            "--dbuser",
            secrets.db_user.as_str(),
            "--dbpassword",
            secrets.db_password.as_str(),
        ]);
    if !new_entry {
        cmd.args(["--new_entry", "False"]);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| CiError::Registration(format!("could not run {program}: {e}")))?;
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    debug!("registration tool output: {text}");

    if !output.status.success() && !text.contains(ENTRY_EXISTS_MARKER) {
        return Err(CiError::Registration(format!(
            "{program} exited with {:?}: {}",
            output.status.code(),
            text.trim()
        )));
    }
    Ok(text)
}

/// Register the cluster. Returns the setup name.
pub async fn run<E: RemoteExec>(exec: &E, args: &CiArgs, env: &CiEnv) -> Result<String, CiError> {
    info!("total number of worker nodes in cluster: {}", args.node_count);

    let ext_ip = first_ext_ip(&args.ext_ip_list)?;
    info!("external LB IP: {ext_ip}");
    let hosts_path = args.hosts_file.display().to_string();
    fs::write(&args.hosts_file, hosts_file_contents(&ext_ip))
        .map_err(|e| CiError::Io(hosts_path, e))?;
    info!("S3 endpoints now resolve to {ext_ip}");

    let master = Host::new(0, &args.master_node, &args.username, None).with_password(&args.password);
    let output = exec
        .execute(&master, shell::KUBECTL_GET_NODES, ExecMode::Strict)
        .await?;
    let mut hosts = vec![args.master_node.clone()];
    hosts.extend(parse_worker_nodes(&output.lines));
    if hosts.len() != args.node_count + 1 {
        warn!(
            "expected {} worker nodes, kubectl lists {}",
            args.node_count,
            hosts.len() - 1
        );
    }

    info!("creating setup entry for {}", env.setup_name);
    let template = read_json(&args.setup_entry_json)?;
    let entry = fill_setup_entry(
        template,
        env,
        &hosts,
        &args.username,
        &args.password,
        &args.mgmt_vip,
        &ext_ip,
    )?;
    let entry_path = args.setup_entry_json.display().to_string();
    let rendered =
        serde_json::to_string_pretty(&entry).map_err(|e| CiError::Json(entry_path.clone(), e))?;
    fs::write(&args.setup_entry_json, rendered).map_err(|e| CiError::Io(entry_path, e))?;

    let secrets_path = args.secrets.display().to_string();
    let secrets: DbSecrets = serde_json::from_value(read_json(&args.secrets)?)
        .map_err(|e| CiError::Json(secrets_path, e))?;

    let output = register(args, &secrets, true).await?;
    if output.contains(ENTRY_EXISTS_MARKER) {
        info!("{} is already registered, updating it", env.setup_name);
        let output = register(args, &secrets, false).await?;
        if output.contains(ENTRY_EXISTS_MARKER) {
            return Err(CiError::Registration(format!(
                "could not update the entry for {}",
                env.setup_name
            )));
        }
    }

    info!("setup {} registered", env.setup_name);
    Ok(env.setup_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> CiEnv {
        CiEnv {
            setup_name: "ci-setup-7".to_string(),
            admin_user: "admin".to_string(),
            admin_password: "pw".to_string(),
        }
    }

    #[test]
    fn workers_from_kubectl() {
        let lines: Vec<String> = "NAME STATUS ROLES AGE VERSION\n\
             master-1 Ready control-plane,master 3d v1.22\n\
             worker-1 Ready <none> 3d v1.22\n\
             worker-2 Ready <none> 3d v1.22"
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(parse_worker_nodes(&lines), vec!["worker-1", "worker-2"]);
    }

    #[test]
    fn first_ip_of_list() {
        assert_eq!(first_ext_ip("10.1.1.5, 10.1.1.6").unwrap(), "10.1.1.5");
        assert_eq!(first_ext_ip(" 10.1.1.7").unwrap(), "10.1.1.7");
        assert!(first_ext_ip(" , ").is_err());
    }

    #[test]
    fn setup_entry_filled() {
        let template = json!({
            "setupname": "",
            "csm": { "mgmt_vip": "", "csm_admin_user": { "username": "", "password": "" } },
            "extra": 1
        });
        let hosts = vec!["master".to_string(), "w1".to_string()];
        let entry =
            fill_setup_entry(template, &env(), &hosts, "root", "pw", "10.0.0.1", "10.1.1.5")
                .unwrap();

        assert_eq!(entry["setupname"], "ci-setup-7");
        assert_eq!(entry["product_type"], "k8s");
        assert_eq!(entry["lb"], "10.1.1.5");
        assert_eq!(entry["nodes"][0]["node_type"], "master");
        assert_eq!(entry["nodes"][1]["host"], "srvnode-2");
        assert_eq!(entry["nodes"][1]["node_type"], "worker");
        assert_eq!(entry["csm"]["csm_admin_user"]["username"], "admin");
        assert_eq!(entry["extra"], 1);
    }

    #[test]
    fn hosts_file_points_s3_at_lb() {
        let contents = hosts_file_contents("10.1.1.5");
        assert!(contents
            .lines()
            .any(|l| l.starts_with("10.1.1.5 ") && l.contains("s3.seagate.com")));
    }
}
