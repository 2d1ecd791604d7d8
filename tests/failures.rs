// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use tokio::runtime::Runtime;

    use hatest_lib::{
        alerts::{AlertEvent, AlertSpec, AlertVerifier},
        config::SetupType,
        scenario::{catalog, Phase, ScenarioError, ScenarioRunner, ScenarioSettings, ScenarioSpec},
        suite::{self, TestOutcome},
        test_env::*,
    };

    fn run(sim: &SimCluster, settings: &ScenarioSettings, spec: &ScenarioSpec) -> TestOutcome {
        let cluster = sim.cluster();
        Runtime::new()
            .unwrap()
            .block_on(suite::run_test(sim, &cluster, settings, spec))
    }

    fn safe_on(index: usize) -> ScenarioSpec {
        catalog::find("one_by_one_safe", 1).unwrap().on_node(index)
    }

    /// The scenario's own error, asserting that it is a transition failure.
    fn transition_failure(outcome: &TestOutcome) -> (String, Phase, String) {
        match outcome.scenario.as_ref().unwrap() {
            Err(ScenarioError::Transition {
                target,
                phase,
                reason,
            }) => (target.clone(), *phase, reason.clone()),
            other => panic!("expected a transition failure, got {other:?}"),
        }
    }

    #[test]
    fn channel_disagreement_is_labeled() {
        let sim = SimCluster::new(3).with_misbehavior(Misbehavior {
            rest_ignores_failures: true,
            ..Default::default()
        });
        let outcome = run(&sim, &sim.settings(), &safe_on(1));

        let (target, phase, reason) = transition_failure(&outcome);
        assert_eq!(target, "srvnode-2");
        assert_eq!(phase, Phase::DegradedConfirmed);
        assert!(reason.contains("REST"), "{reason}");
        assert!(reason.contains("srvnode-2"), "{reason}");

        // Teardown still brought the node back.
        assert!(outcome.teardown.is_ok(), "{:?}", outcome.teardown);
        assert!(sim.is_powered(1));
    }

    #[test]
    fn stale_fault_alert_is_not_accepted() {
        let sim = SimCluster::new(3).with_misbehavior(Misbehavior {
            stale_fault_alert: true,
            ..Default::default()
        });
        let outcome = run(&sim, &sim.settings(), &safe_on(1));

        let (_, phase, reason) = transition_failure(&outcome);
        assert_eq!(phase, Phase::DegradedConfirmed);
        assert!(reason.contains("fault alert"), "{reason}");
        assert!(sim.is_powered(1));
    }

    #[test]
    fn alert_just_before_window_is_rejected() {
        let sim = SimCluster::new(3);
        let start = Utc::now();
        sim.inject_alert(AlertEvent {
            id: "early".to_string(),
            alert_type: "fault".to_string(),
            resource_type: "iem".to_string(),
            resource_id: None,
            resolved: false,
            created: start - Duration::seconds(1),
        });

        let mut verifier = AlertVerifier::new(start, sim.settings().alert);
        let rt = Runtime::new().unwrap();
        let spec = AlertSpec::fault("fault", "iem");
        assert!(!rt.block_on(verifier.verify(&sim, &spec)).unwrap());

        sim.inject_alert(AlertEvent {
            id: "on-time".to_string(),
            created: start,
            ..sim.alerts()[0].clone()
        });
        assert!(rt.block_on(verifier.verify(&sim, &spec)).unwrap());
        // Consumed: the same alert cannot satisfy a second check.
        assert!(!rt.block_on(verifier.verify(&sim, &spec)).unwrap());
    }

    #[test]
    fn failover_to_wrong_node() {
        let sim = SimCluster::new(3).with_misbehavior(Misbehavior {
            wrong_failover: true,
            ..Default::default()
        });
        let outcome = run(&sim, &sim.settings(), &safe_on(0));

        let (target, phase, reason) = transition_failure(&outcome);
        assert_eq!(target, "srvnode-1");
        assert_eq!(phase, Phase::DegradedConfirmed);
        assert!(reason.contains("moved to srvnode-3"), "{reason}");
        assert!(reason.contains("expected srvnode-2"), "{reason}");
    }

    #[test]
    fn zero_repetitions_is_not_a_pass() {
        let sim = SimCluster::new(3);
        let spec = catalog::find("single_node_multiple_times_safe", 0).unwrap();
        let outcome = run(&sim, &sim.settings(), &spec);

        assert!(matches!(
            outcome.scenario,
            Some(Err(ScenarioError::Precondition(_)))
        ));
        assert!(!outcome.passed());
        assert!(outcome.log.entries().is_empty());
    }

    #[test]
    fn missing_alert_still_restores_power() {
        let sim = SimCluster::new(3).with_misbehavior(Misbehavior {
            suppress_fault_alert: true,
            ..Default::default()
        });
        let spec = catalog::find("one_by_one_unsafe", 1).unwrap().on_node(2);
        let outcome = run(&sim, &sim.settings(), &spec);

        assert!(matches!(
            outcome.scenario,
            Some(Err(ScenarioError::Transition {
                phase: Phase::DegradedConfirmed,
                ..
            }))
        ));
        assert_eq!(
            outcome.log.phases(0),
            vec![Phase::Healthy, Phase::FaultInjected]
        );
        assert!(outcome.teardown.is_ok(), "{:?}", outcome.teardown);
        assert!(sim.is_powered(2));
        assert!(sim.all_healthy());
    }

    #[test]
    fn node_that_will_not_power_on() {
        let sim = SimCluster::new(3).with_misbehavior(Misbehavior {
            refuse_power_on: true,
            ..Default::default()
        });
        let outcome = run(&sim, &sim.settings(), &safe_on(0));

        assert!(matches!(
            outcome.scenario,
            Some(Err(ScenarioError::External { .. }))
        ));
        assert!(outcome.teardown.is_err());
        assert!(!outcome.passed());
        assert!(!sim.is_powered(0));
    }

    #[test]
    fn liveness_failure_on_unaffected_node() {
        let sim = SimCluster::new(3).with_misbehavior(Misbehavior {
            liveness_fails_on: Some(0),
            ..Default::default()
        });
        let outcome = run(&sim, &sim.settings(), &safe_on(1));

        let (target, phase, reason) = transition_failure(&outcome);
        assert_eq!(target, "srvnode-2");
        assert_eq!(phase, Phase::DegradedConfirmed);
        assert!(reason.contains("srvnode-1"), "{reason}");
    }

    #[test]
    fn unhealthy_cluster_fails_setup() {
        let sim = SimCluster::new(3);
        sim.power_off_externally(2);
        let outcome = run(&sim, &sim.settings(), &safe_on(0));

        assert!(matches!(outcome.setup, Err(ScenarioError::Precondition(_))));
        assert!(outcome.scenario.is_none());
        assert!(outcome.log.entries().is_empty());
    }

    #[test]
    fn hardware_pre_shutdown_step_runs_first() {
        let sim = SimCluster::new(3);
        let mut settings = sim.settings();
        settings.setup_type = SetupType::Hw;
        settings.pre_shutdown_command = Some("pcs property set stonith-enabled=false".to_string());

        let outcome = run(&sim, &settings, &safe_on(1));
        assert!(outcome.passed(), "{:?}", outcome.first_error());

        let on_target: Vec<String> = sim
            .commands()
            .into_iter()
            .filter(|(node, _)| *node == 1)
            .map(|(_, cmd)| cmd)
            .collect();
        let pre = on_target
            .iter()
            .position(|c| c == "pcs property set stonith-enabled=false")
            .unwrap();
        let shutdown = on_target
            .iter()
            .position(|c| c == "shutdown -h now")
            .unwrap();
        assert!(pre < shutdown);
    }

    #[test]
    fn failed_pre_shutdown_step_keeps_holder() {
        let sim = SimCluster::new(3).with_misbehavior(Misbehavior {
            liveness_fails_on: Some(0),
            ..Default::default()
        });
        let cluster = sim.cluster();
        let mut settings = sim.settings();
        settings.setup_type = SetupType::Hw;
        settings.pre_shutdown_command = Some(LIVENESS_COMMAND.to_string());

        let mut runner = ScenarioRunner::new(&sim, &cluster, &settings, 0, Utc::now());
        let rt = Runtime::new().unwrap();
        let result = rt.block_on(runner.run(&safe_on(0)));

        assert!(matches!(
            result,
            Err(ScenarioError::Transition {
                phase: Phase::FaultInjected,
                ..
            })
        ));
        assert_eq!(runner.failover_holder(), Some(0));
        assert!(!runner.is_disrupted());
        assert!(sim.is_powered(0));
        assert_eq!(sim.holder(), 0);
    }
}
