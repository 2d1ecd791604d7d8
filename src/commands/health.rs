// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::{
    backend::Backend,
    cluster::Cluster,
    commands::{handled_error, Handle, HandledResult},
    health::{aggregate, Channel},
    locator,
    poll::Backoff,
};

#[derive(Args, Debug, Clone)]
pub struct HealthArgs {
    #[arg(short, long, value_enum, default_value_t = ChannelArg::Both)]
    channel: ChannelArg,

    /// Also check every node's own pacemaker view of the cluster.
    #[arg(short, long)]
    nodes: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ChannelArg {
    Cli,
    Rest,
    Both,
}

impl ChannelArg {
    fn channels(self) -> &'static [Channel] {
        match self {
            ChannelArg::Cli => &[Channel::Cli],
            ChannelArg::Rest => &[Channel::Rest],
            ChannelArg::Both => &Channel::BOTH,
        }
    }
}

pub async fn health<B: Backend>(
    cluster: &Cluster,
    backend: &B,
    args: &HealthArgs,
) -> HandledResult<()> {
    let once = Backoff::new(Duration::ZERO, Duration::ZERO, Duration::ZERO);
    let holder = locator::find_current(backend, cluster, &once)
        .await
        .handle_err(|e| eprintln!("{e}"))?;
    let via = cluster.host(holder);
    println!("management service: {via}");

    let mut healthy = true;
    for &channel in args.channels() {
        match aggregate::observe(backend, cluster, channel, via).await {
            Ok(snapshot) => {
                println!("{channel:>4}: {snapshot}");
                healthy &= snapshot == cluster.all_online();
            }
            Err(e) => {
                eprintln!("{channel:>4}: {e}");
                healthy = false;
            }
        }
    }

    if args.nodes {
        for host in cluster.hosts() {
            match aggregate::check_node_health(backend, host).await {
                Ok(()) => println!("{host}: clean"),
                Err(e) => {
                    println!("{host}: {e}");
                    healthy = false;
                }
            }
        }
    }

    if !healthy {
        return handled_error();
    }
    Ok(())
}

impl HealthArgs {
    fn channels(&self) -> &'static [Channel] {
        self.channel.channels()
    }
}
