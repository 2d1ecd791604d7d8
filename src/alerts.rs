// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Verification that the cluster raised the alerts a fault or its resolution should produce.

use std::{collections::HashSet, error::Error, fmt};

use {
    chrono::{DateTime, SubsecRound, Utc},
    log::{debug, info},
};

use crate::poll::{poll_until, Backoff};

/// An alert as reported by the cluster's alerting subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub id: String,
    pub alert_type: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    /// `true` for the resolution of an earlier fault.
    pub resolved: bool,
    pub created: DateTime<Utc>,
}

/// What an expected alert looks like.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertSpec {
    pub alert_type: String,
    /// Matched against either the resource type or the resource id of the alert.
    pub resource: String,
    pub resolved: bool,
}

impl AlertSpec {
    pub fn fault(alert_type: &str, resource: &str) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            resource: resource.to_string(),
            resolved: false,
        }
    }

    pub fn resolution(alert_type: &str, resource: &str) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            resource: resource.to_string(),
            resolved: true,
        }
    }

    pub fn matches(&self, event: &AlertEvent) -> bool {
        event.alert_type == self.alert_type
            && event.resolved == self.resolved
            && (event.resource_type == self.resource
                || event.resource_id.as_deref() == Some(self.resource.as_str()))
    }
}

impl fmt::Display for AlertSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} alert '{}' for '{}'",
            if self.resolved { "resolution" } else { "fault" },
            self.alert_type,
            self.resource
        )
    }
}

#[derive(Debug)]
pub struct AlertError(pub String);

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alert query failed: {}", self.0)
    }
}

impl Error for AlertError {}

/// A source of alert records.
#[allow(async_fn_in_trait)]
pub trait AlertChannel {
    /// Alerts created at or after `since`. Implementations may return older alerts as well; the
    /// verifier filters them.
    async fn fetch_alerts(&self, since: DateTime<Utc>) -> Result<Vec<AlertEvent>, AlertError>;
}

enum Miss {
    NotYet,
    Query(AlertError),
}

impl fmt::Display for Miss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Miss::NotYet => write!(f, "no matching alert yet"),
            Miss::Query(e) => write!(f, "{e}"),
        }
    }
}

/// Tracks the alert window of a running scenario.
///
/// The window starts at `start`, rounded down to the second; an alert created before it never
/// satisfies a check. Each
/// matched alert is consumed, so one alert cannot satisfy two checks. The scenario moves the
/// window forward once a fault/recovery cycle is complete.
#[derive(Debug)]
pub struct AlertVerifier {
    start: DateTime<Utc>,
    consumed: HashSet<String>,
    backoff: Backoff,
}

impl AlertVerifier {
    pub fn new(start: DateTime<Utc>, backoff: Backoff) -> Self {
        Self {
            start,
            consumed: HashSet::new(),
            backoff,
        }
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn reset_window(&mut self, start: DateTime<Utc>) {
        debug!("alert window moved from {} to {start}", self.start);
        self.start = start;
    }

    /// The first unconsumed event inside the window matching `spec`.
    ///
    /// Alert timestamps carry whole seconds, so the window opens at the start of the second
    /// `start` falls in.
    pub fn find_match<'e>(
        &self,
        events: &'e [AlertEvent],
        spec: &AlertSpec,
    ) -> Option<&'e AlertEvent> {
        let opens = self.start.trunc_subsecs(0);
        events.iter().find(|event| {
            event.created >= opens && !self.consumed.contains(&event.id) && spec.matches(event)
        })
    }

    /// Poll the alert channel until an alert matching `spec` shows up inside the window.
    ///
    /// Returns `Ok(false)` if none appeared before the timeout. A channel that kept failing
    /// until the timeout is reported as an error instead.
    pub async fn verify<A: AlertChannel>(
        &mut self,
        channel: &A,
        spec: &AlertSpec,
    ) -> Result<bool, AlertError> {
        let what = spec.to_string();
        let this = &*self;
        let result = poll_until(&what, &self.backoff, move || async move {
            let events = channel.fetch_alerts(this.start).await.map_err(Miss::Query)?;
            this.find_match(&events, spec)
                .map(|event| event.id.clone())
                .ok_or(Miss::NotYet)
        })
        .await;

        match result {
            Ok(id) => {
                info!("found {spec} ({id})");
                self.consumed.insert(id);
                Ok(true)
            }
            Err(timeout) => match timeout.last {
                Miss::NotYet => Ok(false),
                Miss::Query(e) => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn event(id: &str, created: DateTime<Utc>, resolved: bool) -> AlertEvent {
        AlertEvent {
            id: id.to_string(),
            alert_type: if resolved { "fault_resolved" } else { "fault" }.to_string(),
            resource_type: "iem".to_string(),
            resource_id: None,
            resolved,
            created,
        }
    }

    fn verifier(start: DateTime<Utc>) -> AlertVerifier {
        AlertVerifier::new(
            start,
            Backoff::new(
                std::time::Duration::from_millis(1),
                std::time::Duration::from_millis(1),
                std::time::Duration::from_millis(0),
            ),
        )
    }

    #[test]
    fn event_before_window_rejected() {
        let start = Utc::now();
        let verifier = verifier(start);
        let spec = AlertSpec::fault("fault", "iem");
        let stale = [event("a", start - Duration::seconds(1), false)];
        assert!(verifier.find_match(&stale, &spec).is_none());

        let fresh = [event("b", start, false)];
        assert_eq!(verifier.find_match(&fresh, &spec).unwrap().id, "b");
    }

    #[test]
    fn whole_second_timestamp_in_opening_second_accepted() {
        let second = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let verifier = verifier(second + Duration::milliseconds(750));
        let spec = AlertSpec::fault("fault", "iem");

        let same_second = [event("a", second, false)];
        assert_eq!(verifier.find_match(&same_second, &spec).unwrap().id, "a");

        let previous = [event("b", second - Duration::seconds(1), false)];
        assert!(verifier.find_match(&previous, &spec).is_none());
    }

    #[test]
    fn direction_must_match() {
        let start = Utc::now();
        let verifier = verifier(start);
        let events = [event("a", start, true)];
        assert!(verifier
            .find_match(&events, &AlertSpec::fault("fault", "iem"))
            .is_none());
        assert!(verifier
            .find_match(&events, &AlertSpec::resolution("fault_resolved", "iem"))
            .is_some());
    }

    #[test]
    fn resource_id_matches_interface() {
        let spec = AlertSpec::fault("node:interface:nw", "eth1");
        let mut ev = event("a", Utc::now(), false);
        ev.alert_type = "node:interface:nw".to_string();
        ev.resource_type = "node:interface".to_string();
        ev.resource_id = Some("eth1".to_string());
        assert!(spec.matches(&ev));
    }
}
