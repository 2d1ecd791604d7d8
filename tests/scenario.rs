// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use tokio::runtime::Runtime;

    use hatest_lib::{
        health::{aggregate, Channel},
        host::{shell, ExecMode, RemoteExec},
        locator,
        scenario::{catalog, Phase},
        suite,
        test_env::*,
    };

    const ALL_PHASES: [Phase; 5] = [
        Phase::Healthy,
        Phase::FaultInjected,
        Phase::DegradedConfirmed,
        Phase::Remediated,
        Phase::RecoveredConfirmed,
    ];

    #[test]
    fn safe_shutdown_of_second_node() {
        let sim = SimCluster::new(3);
        let cluster = sim.cluster();
        let settings = sim.settings();
        let spec = catalog::find("one_by_one_safe", 1).unwrap().on_node(1);

        let rt = Runtime::new().unwrap();
        let outcome = rt.block_on(suite::run_test(&sim, &cluster, &settings, &spec));

        assert!(outcome.passed(), "{:?}", outcome.first_error());
        assert_eq!(outcome.log.phases(0), ALL_PHASES);
        assert!(outcome.log.entries().iter().all(|e| e.target == 1));

        // Node 1 never held the management service, so it stayed where it was.
        assert_eq!(sim.holder(), 0);

        let alerts = sim.alerts();
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == "fault" && a.resource_type == "iem" && !a.resolved));
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == "fault_resolved" && a.resolved));
        assert!(sim.all_healthy());
    }

    #[test]
    fn shutdown_of_holder_moves_service() {
        let sim = SimCluster::new(3);
        let cluster = sim.cluster();
        let settings = sim.settings();
        let spec = catalog::find("one_by_one_safe", 1).unwrap().on_node(0);

        let rt = Runtime::new().unwrap();
        let outcome = rt.block_on(suite::run_test(&sim, &cluster, &settings, &spec));

        assert!(outcome.passed(), "{:?}", outcome.first_error());
        assert_eq!(outcome.log.phases(0), ALL_PHASES);
        assert_eq!(sim.holder(), 1);
    }

    #[test]
    fn degraded_vector_after_shutdown() {
        let sim = SimCluster::new(3);
        let cluster = sim.cluster();
        let settings = sim.settings();

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            sim.execute(cluster.host(0), shell::SHUTDOWN, ExecMode::Tolerant)
                .await
                .unwrap();
            assert!(!sim.is_reachable(cluster.host(0)).await);

            let holder = locator::await_service(&sim, &cluster, 0, 1, &settings.failover)
                .await
                .unwrap();
            assert_eq!(holder, 1);

            for channel in Channel::BOTH {
                let snapshot = aggregate::observe(&sim, &cluster, channel, cluster.host(holder))
                    .await
                    .unwrap();
                assert_eq!(snapshot.to_string(), r#"["failed", "online", "online"]"#);
                assert_eq!(snapshot, cluster.expected_with_failed(0));
            }
        });
    }

    #[test]
    fn one_by_one_unsafe_covers_every_node() {
        let sim = SimCluster::new(3);
        let cluster = sim.cluster();
        let settings = sim.settings();
        let spec = catalog::find("TEST-22574", 1).unwrap();

        let rt = Runtime::new().unwrap();
        let outcome = rt.block_on(suite::run_test(&sim, &cluster, &settings, &spec));

        assert!(outcome.passed(), "{:?}", outcome.first_error());
        assert_eq!(outcome.log.completed_cycles(), 3);
        for iteration in 0..3 {
            assert_eq!(outcome.log.phases(iteration), ALL_PHASES);
        }
        let targets: Vec<usize> = outcome
            .log
            .entries()
            .iter()
            .filter(|e| e.phase == Phase::FaultInjected)
            .map(|e| e.target)
            .collect();
        assert_eq!(targets, vec![0, 1, 2]);

        // Faulting node 2 last hands the service back to node 0.
        assert_eq!(sim.holder(), 0);
        assert!(sim.all_healthy());
    }

    #[test]
    fn repeated_scenario_is_idempotent() {
        let sim = SimCluster::new(4);
        let cluster = sim.cluster();
        let settings = sim.settings();
        let spec = catalog::find("single_node_multiple_times_safe", 3)
            .unwrap()
            .with_seed(11);

        let rt = Runtime::new().unwrap();
        let outcome = rt.block_on(suite::run_test(&sim, &cluster, &settings, &spec));

        assert!(outcome.passed(), "{:?}", outcome.first_error());
        let report = outcome.scenario.unwrap().unwrap();
        assert_eq!(report.seed, Some(11));
        assert_eq!(report.targets.len(), 3);
        assert!(report.targets.iter().all(|&t| t == report.targets[0]));
        assert_eq!(outcome.log.completed_cycles(), 3);
        assert!(sim.all_healthy());
        assert!((0..4).all(|i| sim.is_powered(i)));
    }

    #[test]
    fn slow_recovery_is_polled_for() {
        let sim = SimCluster::new(3).with_misbehavior(Misbehavior {
            recovery_lag: 3,
            ..Default::default()
        });
        let cluster = sim.cluster();
        let settings = sim.settings();
        let spec = catalog::find("one_by_one_safe", 1).unwrap().on_node(0);

        let rt = Runtime::new().unwrap();
        let outcome = rt.block_on(suite::run_test(&sim, &cluster, &settings, &spec));

        assert!(outcome.passed(), "{:?}", outcome.first_error());
    }

    #[test]
    fn interface_down_and_up() {
        let sim = SimCluster::new(3);
        let cluster = sim.cluster();
        let settings = sim.settings();
        let spec = catalog::find("one_by_one_nw_down", 1).unwrap().on_node(0);

        let rt = Runtime::new().unwrap();
        let outcome = rt.block_on(suite::run_test(&sim, &cluster, &settings, &spec));

        assert!(outcome.passed(), "{:?}", outcome.first_error());
        assert!(sim.iface_up(0));

        let commands = sim.commands();
        assert!(commands.contains(&(0, "ip link set eth1 down".to_string())));
        assert!(commands.contains(&(0, "ip link set eth1 up".to_string())));
        let ping = shell::ping(&sim.data_addr(0).to_string());
        assert!(commands.iter().any(|(node, cmd)| *node == 1 && *cmd == ping));

        let alerts = sim.alerts();
        assert!(alerts
            .iter()
            .any(|a| a.resource_id.as_deref() == Some("eth1") && !a.resolved));
        assert!(alerts
            .iter()
            .any(|a| a.resource_id.as_deref() == Some("eth1") && a.resolved));
    }

    #[test]
    fn ping_reports_unresolved_while_interface_down() {
        let sim = SimCluster::new(3);
        let cluster = sim.cluster();
        let ping = shell::ping(&sim.data_addr(0).to_string());

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            sim.execute(cluster.host(0), &shell::ip_link("eth1", false), ExecMode::Strict)
                .await
                .unwrap();
            let output = sim
                .execute(cluster.host(1), &ping, ExecMode::Tolerant)
                .await
                .unwrap();
            assert!(output.first_line().contains(shell::PING_UNRESOLVED_MARKER));

            sim.execute(cluster.host(0), &shell::ip_link("eth1", true), ExecMode::Strict)
                .await
                .unwrap();
            let output = sim
                .execute(cluster.host(1), &ping, ExecMode::Tolerant)
                .await
                .unwrap();
            assert!(!output.first_line().contains(shell::PING_UNRESOLVED_MARKER));
        });
    }
}
