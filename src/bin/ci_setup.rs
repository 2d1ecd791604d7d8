// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;

use hatest_lib::{
    ci::{self, CiArgs, CiEnv},
    commands::Handle,
    host::SshExecutor,
};

fn main() {
    hatest_lib::init_logging();

    let args = CiArgs::parse();

    let result = CiEnv::from_env()
        .handle_err(|e| eprintln!("{e}"))
        .and_then(|env| {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .handle_err(|e| eprintln!("Error launching tokio runtime: {e}"))?;
            rt.block_on(ci::run(&SshExecutor::default(), &args, &env))
                .handle_err(|e| eprintln!("CI setup failed: {e}"))
        });

    match result {
        Ok(setup_name) => println!("target_name: {setup_name}"),
        Err(_) => std::process::exit(1),
    }
}
