// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use tokio::runtime::Runtime;

    use hatest_lib::{
        ci::{self, CiArgs, CiEnv},
        host::{shell, CommandOutput, ExecError, ExecMode, Host, RemoteExec},
    };

    /// Answers `kubectl get nodes` on the master like a cluster with two workers.
    struct FakeMaster;

    impl RemoteExec for FakeMaster {
        async fn execute(
            &self,
            host: &Host,
            command: &str,
            _mode: ExecMode,
        ) -> Result<CommandOutput, ExecError> {
            assert_eq!(host.name(), "master-1");
            assert_eq!(host.password(), Some("nodepw"));
            assert_eq!(command, shell::KUBECTL_GET_NODES);
            Ok(CommandOutput::new(
                0,
                vec![
                    "NAME       STATUS   ROLES                  AGE   VERSION".to_string(),
                    "master-1   Ready    control-plane,master   2d    v1.22.2".to_string(),
                    "worker-1   Ready    worker                 2d    v1.22.2".to_string(),
                    "worker-2   Ready    worker                 2d    v1.22.2".to_string(),
                ],
            ))
        }

        async fn is_reachable(&self, _host: &Host) -> bool {
            true
        }
    }

    /// A registration tool that logs its arguments and reports an existing entry unless asked to
    /// update one.
    fn write_registration_tool(dir: &Path) -> String {
        let log = dir.join("calls.log");
        let script = dir.join("setup_entry.sh");
        fs::write(
            &script,
            format!(
                "echo \"$@\" >> {}\n\
                 case \"$*\" in\n  \
                 *--new_entry*) echo \"Entry updated\" ;;\n  \
                 *) echo \"Entry already exits\" ;;\n\
                 esac\n",
                log.display()
            ),
        )
        .unwrap();
        script.display().to_string()
    }

    fn args(dir: &Path) -> CiArgs {
        CiArgs {
            master_node: "master-1".to_string(),
            node_count: 2,
            password: "nodepw".to_string(),
            mgmt_vip: "10.0.0.100".to_string(),
            ext_ip_list: "10.1.1.5,10.1.1.6".to_string(),
            username: "root".to_string(),
            hosts_file: dir.join("hosts"),
            setup_entry_json: dir.join("setup_entry.json"),
            secrets: dir.join("secrets.json"),
            registration_tool: vec!["sh".to_string(), write_registration_tool(dir)],
        }
    }

    #[test]
    fn registers_existing_setup() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());
        fs::write(
            &args.setup_entry_json,
            r#"{"setupname": "", "csm": {"mgmt_vip": "", "csm_admin_user": {"username": "", "password": ""}}}"#,
        )
        .unwrap();
        fs::write(
            &args.secrets,
            r#"{"DB_USER": "dbuser", "DB_PASSWORD": "dbpw"}"#,
        )
        .unwrap();
        let env = CiEnv {
            setup_name: "ci-k8s-42".to_string(),
            admin_user: "cortxadmin".to_string(),
            admin_password: "adminpw".to_string(),
        };

        let rt = Runtime::new().unwrap();
        let name = rt.block_on(ci::run(&FakeMaster, &args, &env)).unwrap();
        assert_eq!(name, "ci-k8s-42");

        let hosts = fs::read_to_string(&args.hosts_file).unwrap();
        assert!(hosts.contains("10.1.1.5 s3.seagate.com"));
        assert!(!hosts.contains("10.1.1.6"));

        let entry: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&args.setup_entry_json).unwrap()).unwrap();
        assert_eq!(entry["setupname"], "ci-k8s-42");
        assert_eq!(entry["product_family"], "LC");
        assert_eq!(entry["lb"], "10.1.1.5");
        assert_eq!(entry["csm"]["mgmt_vip"], "10.0.0.100");
        assert_eq!(entry["csm"]["csm_admin_user"]["password"], "adminpw");
        let nodes = entry["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0]["hostname"], "master-1");
        assert_eq!(nodes[0]["node_type"], "master");
        assert_eq!(nodes[2]["host"], "srvnode-3");
        assert_eq!(nodes[2]["hostname"], "worker-2");

        // First call reports the entry exists, so the tool is rerun in update mode.
        let calls = fs::read_to_string(dir.path().join("calls.log")).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("--dbuser dbuser --dbpassword dbpw"));
        assert!(!calls[0].contains("--new_entry"));
        assert!(calls[1].ends_with("--new_entry False"));
    }

    #[test]
    fn missing_secrets_fail() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());
        fs::write(&args.setup_entry_json, "{}").unwrap();
        let env = CiEnv {
            setup_name: "ci-k8s-42".to_string(),
            admin_user: "a".to_string(),
            admin_password: "b".to_string(),
        };

        let rt = Runtime::new().unwrap();
        let err = rt.block_on(ci::run(&FakeMaster, &args, &env)).unwrap_err();
        assert!(err.to_string().contains("secrets.json"), "{err}");
    }
}
