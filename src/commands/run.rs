// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    backend::Backend,
    cluster::Cluster,
    commands::{handled_error, Handle, HandledResult},
    config::Config,
    scenario::{catalog, ScenarioSettings, ScenarioSpec},
    suite,
};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Scenario names or test tags to run, in order.
    #[arg(short, long = "scenario")]
    scenarios: Vec<String>,

    /// Run every scenario.
    #[arg(long, conflicts_with = "scenarios")]
    all: bool,

    /// Seed for the random node choice of the repeated scenarios.
    #[arg(long)]
    seed: Option<u64>,

    /// Fault only this node (hostname or srvnode-N), once.
    #[arg(long)]
    node: Option<String>,

    /// Override `ha.loop_count` from the config file.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    loop_count: Option<u32>,

    /// List the scenarios and exit.
    #[arg(long)]
    list: bool,
}

fn selected(
    args: &RunArgs,
    cluster: &Cluster,
    loop_count: u32,
) -> HandledResult<Vec<ScenarioSpec>> {
    let node = match &args.node {
        Some(name) => Some(
            cluster
                .get_host_by_name(name)
                .map(|host| host.index())
                .ok_or(name)
                .handle_err(|name| eprintln!("Host '{name}' is not in the config."))?,
        ),
        None => None,
    };

    let specs = if args.all {
        catalog::all(loop_count)
    } else {
        if args.scenarios.is_empty() {
            eprintln!("Name at least one scenario with --scenario, or use --all.");
            handled_error()?;
        }
        let mut specs = Vec::new();
        for name in &args.scenarios {
            let spec = catalog::find(name, loop_count)
                .ok_or(name)
                .handle_err(|name| eprintln!("Unknown scenario '{name}'; see --list."))?;
            specs.push(spec);
        }
        specs
    };

    Ok(specs
        .into_iter()
        .map(|spec| match (node, args.seed) {
            (Some(index), _) => spec.on_node(index),
            (None, Some(seed)) => spec.with_seed(seed),
            (None, None) => spec,
        })
        .collect())
}

pub async fn run<B: Backend>(
    config: &Config,
    cluster: &Cluster,
    backend: &B,
    args: &RunArgs,
) -> HandledResult<()> {
    let settings = ScenarioSettings::from_config(config)
        .handle_err(|e| eprintln!("Invalid configuration: {e}"))?;
    let loop_count = args.loop_count.unwrap_or(settings.loop_count);

    if args.list {
        for spec in catalog::all(loop_count) {
            println!("{:<36} {:<12} {}", spec.name, spec.tag, spec.description);
        }
        return Ok(());
    }

    let specs = selected(args, cluster, loop_count)?;
    let mut failed = 0;
    for spec in &specs {
        let outcome = suite::run_test(backend, cluster, &settings, spec).await;
        match outcome.first_error() {
            None => println!(
                "PASS {} ({}): {} cycle(s)",
                spec.name,
                spec.tag,
                outcome.log.completed_cycles()
            ),
            Some(e) => {
                failed += 1;
                println!("FAIL {} ({}): {e}", spec.name, spec.tag);
            }
        }
    }

    println!("{} passed, {failed} failed", specs.len() - failed);
    if failed > 0 {
        return handled_error();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::commands::{Cli, Commands};

    #[test]
    fn loop_count_must_be_positive() {
        assert!(Cli::try_parse_from(["hatest", "run", "--all", "--loop-count", "0"]).is_err());

        let cli = Cli::try_parse_from(["hatest", "run", "--all", "--loop-count", "2"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected the run subcommand");
        };
        assert_eq!(args.loop_count, Some(2));
    }
}
