// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Tracking which node serves the failover-sensitive management service.
//!
//! When the node hosting the management service goes down, the service moves to the next node
//! in cluster order. The move happens asynchronously after the fault, so the new holder must be
//! observed answering before anything is asked of it.

use std::{error::Error, fmt};

use log::{debug, info};

use crate::{
    cluster::Cluster,
    host::{shell, ExecMode, RemoteExec},
    poll::{poll_until, Backoff},
};

/// Which node currently serves the management service. `None` while the previous holder is
/// down and the new one has not yet been confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FailoverPointer {
    holder: Option<usize>,
}

impl FailoverPointer {
    pub fn new(holder: usize) -> Self {
        Self {
            holder: Some(holder),
        }
    }

    pub fn holder(&self) -> Option<usize> {
        self.holder
    }

    /// The node expected to serve once `down` has gone away. The service only moves when its
    /// holder goes down; otherwise it stays where it is.
    pub fn expected_after(&self, cluster: &Cluster, down: usize) -> usize {
        match self.holder {
            Some(holder) if holder != down => holder,
            _ => cluster.successor(down),
        }
    }

    /// `down` has gone away. Forget the holder if it was `down` and return the node expected to
    /// serve now.
    pub fn relocate(&mut self, cluster: &Cluster, down: usize) -> usize {
        let expected = self.expected_after(cluster, down);
        if self.holder == Some(down) {
            self.holder = None;
        }
        expected
    }

    pub fn confirm(&mut self, holder: usize) {
        self.holder = Some(holder);
    }
}

#[derive(Debug)]
pub struct LocatorError {
    pub down: String,
    pub candidate: String,
    pub reason: String,
}

impl fmt::Display for LocatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "management service did not come up after {} went down (expected on {}): {}",
            self.down, self.candidate, self.reason
        )
    }
}

impl Error for LocatorError {}

/// Whether `index` currently answers as the management service host.
pub async fn is_serving<B: RemoteExec>(backend: &B, cluster: &Cluster, index: usize) -> bool {
    let host = cluster.host(index);
    match backend
        .execute(host, shell::CSM_SERVICE_CHECK, ExecMode::Tolerant)
        .await
    {
        Ok(output) => output.success(),
        Err(e) => {
            debug!("could not ask {host} about the management service: {e}");
            false
        }
    }
}

/// Poll until some node other than `down` serves the management service, checking `candidate`
/// first on every round. Returns the index of whichever node is serving.
pub async fn await_service<B: RemoteExec>(
    backend: &B,
    cluster: &Cluster,
    down: usize,
    candidate: usize,
    backoff: &Backoff,
) -> Result<usize, LocatorError> {
    let order: Vec<usize> = (0..cluster.len())
        .map(|i| (candidate + i) % cluster.len())
        .filter(|&i| i != down)
        .collect();

    let what = format!("management service on {}", cluster.host(candidate));
    let order = &order;
    let holder = poll_until(&what, backoff, move || async move {
        for &i in order {
            if is_serving(backend, cluster, i).await {
                return Ok(i);
            }
        }
        Err("no node answers")
    })
    .await
    .map_err(|timeout| LocatorError {
        down: cluster.host(down).logical_name(),
        candidate: cluster.host(candidate).logical_name(),
        reason: timeout.to_string(),
    })?;

    info!("management service is served by {}", cluster.host(holder));
    Ok(holder)
}

/// Find the current holder without any fault in progress, starting from the first node.
pub async fn find_current<B: RemoteExec>(
    backend: &B,
    cluster: &Cluster,
    backoff: &Backoff,
) -> Result<usize, LocatorError> {
    let what = "management service on any node";
    poll_until(what, backoff, move || async move {
        for i in 0..cluster.len() {
            if is_serving(backend, cluster, i).await {
                return Ok(i);
            }
        }
        Err("no node answers")
    })
    .await
    .map_err(|timeout| LocatorError {
        down: "<none>".to_string(),
        candidate: "any node".to_string(),
        reason: timeout.to_string(),
    })
}
