// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::fmt;

use clap::{Args, ValueEnum};

use crate::{
    backend::Backend,
    cluster::Cluster,
    commands::{handled_error, HandledResult},
    config::Config,
    host::{FenceCommand, Host, PowerControl, RemoteExec},
    poll::{poll_until, Backoff},
};

#[derive(Args, Debug, Clone)]
pub struct PowerArgs {
    /// The power action to perform.
    action: PowerAction,

    /// Hostnames or srvnode-N names. Without any, `status` covers every node in the config.
    #[arg()]
    hostnames: Vec<String>,

    /// Wait until the node answers (on) or stops answering (off) pings.
    #[arg(short, long)]
    wait: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum PowerAction {
    On,
    Off,
    Status,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PowerAction::On => "on",
                PowerAction::Off => "off",
                PowerAction::Status => "status",
            }
        )
    }
}

impl From<PowerAction> for FenceCommand {
    fn from(action: PowerAction) -> Self {
        match action {
            PowerAction::On => FenceCommand::On,
            PowerAction::Off => FenceCommand::Off,
            PowerAction::Status => FenceCommand::Status,
        }
    }
}

pub async fn power<B: Backend>(
    config: &Config,
    cluster: &Cluster,
    backend: &B,
    args: &PowerArgs,
) -> HandledResult<()> {
    let hosts: Vec<&Host> = if args.hostnames.is_empty() {
        match args.action {
            PowerAction::Status => cluster.hosts().iter().collect(),
            other => {
                eprintln!("Must specify host names to perform action \"{other}\".");
                return handled_error();
            }
        }
    } else {
        let mut hosts = Vec::new();
        for name in &args.hostnames {
            match cluster.get_host_by_name(name) {
                Some(host) => hosts.push(host),
                None => {
                    eprintln!("Host '{name}' is not in the config.");
                    return handled_error();
                }
            }
        }
        hosts
    };

    let backoff = Backoff::from_params(&config.ha, config.ha.power_timeout_secs);
    let mut error_seen = false;
    for host in hosts {
        match backend.power(host, args.action.into()).await {
            Ok(state) => println!("{host}: {state:?}"),
            Err(e) => {
                eprintln!("{host}: power {} failed: {e}", args.action);
                error_seen = true;
                continue;
            }
        }

        let reachable = match args.action {
            PowerAction::On => true,
            PowerAction::Off => false,
            PowerAction::Status => continue,
        };
        if args.wait {
            let result = poll_until(&format!("{host}"), &backoff, move || async move {
                if backend.is_reachable(host).await == reachable {
                    Ok(())
                } else {
                    Err("still waiting")
                }
            })
            .await;
            if let Err(e) = result {
                eprintln!("{e}");
                error_seen = true;
            }
        }
    }

    if error_seen {
        return handled_error();
    }
    Ok(())
}
