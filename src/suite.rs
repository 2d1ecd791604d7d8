// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Setup and teardown around a scenario run.
//!
//! Setup confirms the cluster is fully healthy and records the start of the alert window.
//! Teardown runs whether or not the scenario succeeded: it undoes anything the scenario left
//! disrupted and re-checks every node.

use {
    chrono::Utc,
    log::{error, info, warn},
};

use crate::{
    backend::Backend,
    cluster::Cluster,
    health::{aggregate, Channel},
    locator,
    scenario::{
        ScenarioError, ScenarioReport, ScenarioRunner, ScenarioSettings, ScenarioSpec, StepLog,
    },
};

/// Everything a scenario run produced.
#[derive(Debug)]
pub struct TestOutcome {
    /// `None` if setup failed and the scenario never ran.
    pub scenario: Option<Result<ScenarioReport, ScenarioError>>,
    pub setup: Result<(), ScenarioError>,
    pub teardown: Result<(), ScenarioError>,
    pub log: StepLog,
}

impl TestOutcome {
    /// The first failure of the run, in setup, scenario, teardown order.
    pub fn first_error(&self) -> Option<&ScenarioError> {
        if let Err(e) = &self.setup {
            return Some(e);
        }
        if let Some(Err(e)) = &self.scenario {
            return Some(e);
        }
        self.teardown.as_ref().err()
    }

    pub fn passed(&self) -> bool {
        self.first_error().is_none()
    }
}

/// Confirm the cluster is fully healthy and find who serves the management service.
pub async fn setup<B: Backend>(
    backend: &B,
    cluster: &Cluster,
    settings: &ScenarioSettings,
) -> Result<usize, ScenarioError> {
    if cluster.len() < 2 {
        return Err(ScenarioError::Precondition(format!(
            "failover needs at least two nodes, cluster has {}",
            cluster.len()
        )));
    }

    aggregate::check_all_nodes_health(backend, cluster)
        .await
        .map_err(|e| ScenarioError::Precondition(e.to_string()))?;

    let holder = locator::find_current(backend, cluster, &settings.failover)
        .await
        .map_err(|e| ScenarioError::Precondition(e.to_string()))?;

    aggregate::await_channels(
        backend,
        cluster,
        cluster.host(holder),
        &cluster.all_online(),
        &Channel::BOTH,
        &settings.health,
    )
    .await
    .map_err(|e| ScenarioError::Precondition(e.to_string()))?;

    info!("cluster is healthy, management service on {}", cluster.host(holder));
    Ok(holder)
}

/// Undo whatever `runner` left disrupted and check every node is healthy again.
pub async fn teardown<B: Backend>(
    runner: &mut ScenarioRunner<'_, B>,
    backend: &B,
    cluster: &Cluster,
) -> Result<(), ScenarioError> {
    if runner.is_disrupted() {
        warn!("scenario left the cluster disrupted, restoring");
    }
    let mut problems = runner.restore().await;
    for problem in &problems {
        error!("teardown: {problem}");
    }

    if let Err(e) = aggregate::check_all_nodes_health(backend, cluster).await {
        problems.push(ScenarioError::Precondition(format!(
            "cluster not healthy after teardown: {e}"
        )));
    }

    match problems.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Run one scenario with setup and teardown around it.
pub async fn run_test<B: Backend>(
    backend: &B,
    cluster: &Cluster,
    settings: &ScenarioSettings,
    spec: &ScenarioSpec,
) -> TestOutcome {
    info!("==== {} ({}): {}", spec.name, spec.tag, spec.description);
    let start = Utc::now();

    let holder = match setup(backend, cluster, settings).await {
        Ok(holder) => holder,
        Err(e) => {
            error!("{}: {e}", spec.name);
            return TestOutcome {
                scenario: None,
                setup: Err(e),
                teardown: Ok(()),
                log: StepLog::default(),
            };
        }
    };

    let mut runner = ScenarioRunner::new(backend, cluster, settings, holder, start);
    let scenario = runner.run(spec).await;
    if let Err(e) = &scenario {
        error!("{}: {e}", spec.name);
    }

    let restored = teardown(&mut runner, backend, cluster).await;

    let outcome = TestOutcome {
        scenario: Some(scenario),
        setup: Ok(()),
        teardown: restored,
        log: runner.into_step_log(),
    };
    if outcome.passed() {
        info!("==== {} passed", spec.name);
    } else {
        error!("==== {} failed", spec.name);
    }
    outcome
}
