// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use crate::{
    cluster::Cluster,
    commands::{Handle, HandledResult},
    config::Config,
};

/// The config has already been parsed and validated by the time this runs; also check the BMC
/// settings of every node resolve to a known fence agent.
pub fn validate(config: &Config) -> HandledResult<()> {
    Cluster::from_config(config).handle_err(|e| eprintln!("Invalid node configuration: {e}"))?;

    config.print_summary();

    Ok(())
}
