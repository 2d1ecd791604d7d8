// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    backend::Backend,
    cluster::Cluster,
    commands::{Handle, HandledResult},
    config::Config,
    locator,
    poll::Backoff,
};

#[derive(Args, Debug, Clone)]
pub struct LocateArgs {
    /// Keep looking for up to `ha.failover_timeout_secs` rather than asking each node once.
    #[arg(short, long)]
    wait: bool,
}

pub async fn locate<B: Backend>(
    config: &Config,
    cluster: &Cluster,
    backend: &B,
    args: &LocateArgs,
) -> HandledResult<()> {
    let timeout = if args.wait {
        config.ha.failover_timeout_secs
    } else {
        0
    };
    let backoff = Backoff::from_params(&config.ha, timeout);

    let holder = locator::find_current(backend, cluster, &backoff)
        .await
        .handle_err(|e| eprintln!("{e}"))?;
    println!("{}", cluster.host(holder));
    Ok(())
}
