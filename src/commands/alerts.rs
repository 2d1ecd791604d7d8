// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use {
    chrono::{Duration, Utc},
    clap::Args,
};

use crate::{
    alerts::AlertChannel,
    commands::{Handle, HandledResult},
};

#[derive(Args, Debug, Clone)]
pub struct AlertsArgs {
    /// How far back to look, in minutes.
    #[arg(short, long, default_value_t = 60)]
    minutes: i64,
}

pub async fn alerts<A: AlertChannel>(channel: &A, args: &AlertsArgs) -> HandledResult<()> {
    let since = Utc::now() - Duration::minutes(args.minutes);
    let mut events = channel
        .fetch_alerts(since)
        .await
        .handle_err(|e| eprintln!("{e}"))?;
    events.retain(|e| e.created >= since);
    events.sort_by_key(|e| e.created);

    for event in events {
        println!(
            "{} {:<10} {:<20} {:<16} {}",
            event.created.to_rfc3339(),
            if event.resolved { "resolved" } else { "fault" },
            event.alert_type,
            event.resource_id.as_deref().unwrap_or(&event.resource_type),
            event.id
        );
    }
    Ok(())
}
