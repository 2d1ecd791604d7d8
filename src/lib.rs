// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod alerts;
pub mod backend;
pub mod ci;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod health;
pub mod host;
pub mod locator;
pub mod poll;
pub mod scenario;
pub mod suite;
pub mod test_env;

pub fn default_config_path() -> String {
    match std::env::var("HATEST_CONFIG") {
        Ok(conf) => conf,
        Err(_) => "/etc/hatest/hatest.toml".to_string(),
    }
}

/// Default port of the management REST endpoint when the config does not name one.
pub fn default_mgmt_port() -> u16 {
    match std::env::var("HATEST_MGMT_PORT") {
        Ok(port) => port.parse::<u16>().unwrap_or(28100),
        Err(_) => 28100,
    }
}

/// Initialize the `log` backend for a binary.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("HATEST_LOG", "info"))
        .init();
}
