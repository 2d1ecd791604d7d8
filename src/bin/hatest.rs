// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;

use hatest_lib::commands::{self, Cli};

/// The hatest binary runs HA scenarios against a cluster and offers the individual checks they
/// are built from ("health", "locate", "power", ...) as standalone commands.
fn main() {
    hatest_lib::init_logging();

    let args = Cli::parse();

    if commands::main(&args).is_err() {
        std::process::exit(1);
    }
}
