// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod alerts;
pub mod health;
pub mod locate;
pub mod power;
pub mod run;
pub mod validate;

use {
    alerts::AlertsArgs, health::HealthArgs, locate::LocateArgs, power::PowerArgs, run::RunArgs,
};

use clap::{Parser, Subcommand};

use crate::{backend::LiveBackend, cluster::Cluster, config::Config};

/// A `HandledError` represents an error that has already been handled. When you call a function
/// that returns a `HandledError` or `HandledResult`, you don't need to do anything with that error,
/// other than just be aware that it happened, and return it on to your caller.
///
/// `main()` has a special responsibility: since its "caller" is, in a certain sense, the operating
/// system, `main()` must return a nonzero exit status when it gets a `HandledError`.
///
/// The primary way to construct a `HandledError` is with the `handle_err()` function, which turns a
/// generic error into a `HandledError`, and also runs some caller-provided code to handle the
/// error. That provided code would normally do something like report the error to stderr.
#[derive(Debug, PartialEq)]
pub struct HandledError {}

pub type HandledResult<T> = std::result::Result<T, HandledError>;

pub fn handled_error() -> HandledResult<()> {
    HandledResult::Err(HandledError {})
}

pub trait Handle<T, F> {
    fn handle_err(self, handler: F) -> HandledResult<T>;
}

impl<T, E, F: FnOnce(E)> Handle<T, F> for std::result::Result<T, E> {
    /// Handle an error by running the provided `handler` code, giving it the error.
    ///
    /// Then, return a `HandledResult`, so that transitive callers of this function know that they
    /// do not need to do anything further to handle the error.
    fn handle_err(self, handler: F) -> HandledResult<T> {
        self.map_err(|e| {
            handler(e);
            HandledError {}
        })
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "High-availability test harness", long_about = None)]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run HA scenarios against the cluster.
    Run(RunArgs),
    /// Show node health as seen over CLI and REST.
    Health(HealthArgs),
    /// Power nodes on or off, or show their power state.
    Power(PowerArgs),
    /// Find the node serving the management service.
    Locate(LocateArgs),
    /// List recent alerts.
    Alerts(AlertsArgs),
    /// Check the config file and print a summary.
    Validate,
}

/// Load the config file named on the command line, or the default one.
pub fn load_config(cli: &Cli) -> HandledResult<Config> {
    Config::load(cli.config.as_deref()).handle_err(|e| eprintln!("Could not load config: {e}"))
}

/// Build the cluster model and the live backend from `config`.
pub fn connect(config: &Config) -> HandledResult<(Cluster, LiveBackend)> {
    let cluster = Cluster::from_config(config)
        .handle_err(|e| eprintln!("Invalid node configuration: {e}"))?;
    let backend = LiveBackend::new(config)
        .handle_err(|e| eprintln!("Could not set up the management client: {e}"))?;
    Ok((cluster, backend))
}

pub fn main(cli: &Cli) -> HandledResult<()> {
    let config = load_config(cli)?;
    if let Commands::Validate = cli.command {
        return validate::validate(&config);
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .handle_err(|e| eprintln!("Error launching tokio runtime: {e}"))?;

    let (cluster, backend) = connect(&config)?;
    rt.block_on(async {
        match &cli.command {
            Commands::Run(args) => run::run(&config, &cluster, &backend, args).await,
            Commands::Health(args) => health::health(&cluster, &backend, args).await,
            Commands::Power(args) => power::power(&config, &cluster, &backend, args).await,
            Commands::Locate(args) => locate::locate(&config, &cluster, &backend, args).await,
            Commands::Alerts(args) => alerts::alerts(&backend, args).await,
            Commands::Validate => unreachable!(),
        }
    })
}
