// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Bounded polling for external state that converges eventually.
//!
//! The cluster under test offers no readiness notifications, so every "wait until X" in the
//! scenarios is a probe repeated with exponential backoff until it succeeds or a timeout
//! elapses. Nothing here retries forever.

use std::{error::Error, fmt, future::Future, time::Duration};

use {log::debug, tokio::time::Instant};

use crate::config::HaParams;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max_interval: Duration, timeout: Duration) -> Self {
        Self {
            initial,
            max_interval,
            timeout,
        }
    }

    /// Backoff using the configured poll intervals, bounded by `timeout_secs`.
    pub fn from_params(params: &HaParams, timeout_secs: u64) -> Self {
        Self::new(
            Duration::from_millis(params.poll_initial_ms),
            Duration::from_millis(params.poll_max_interval_ms),
            Duration::from_secs(timeout_secs),
        )
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_interval)
    }
}

/// A poll that ran out of time, carrying the last reason the probe gave for not being done.
#[derive(Debug)]
pub struct PollTimeout<E> {
    pub what: String,
    pub attempts: u32,
    pub elapsed: Duration,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for PollTimeout<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timed out after {:?} ({} attempts) waiting for {}: {}",
            self.elapsed, self.attempts, self.what, self.last
        )
    }
}

impl<E: fmt::Debug + fmt::Display> Error for PollTimeout<E> {}

/// Run `probe` until it returns `Ok`, sleeping with exponential backoff between attempts.
///
/// The probe always runs at least once, and runs one final time once the timeout is reached.
pub async fn poll_until<T, E, F, Fut>(
    what: &str,
    backoff: &Backoff,
    mut probe: F,
) -> Result<T, PollTimeout<E>>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut interval = backoff.initial;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let last = match probe().await {
            Ok(value) => {
                debug!("{what}: done after {attempts} attempt(s)");
                return Ok(value);
            }
            Err(e) => e,
        };

        let elapsed = start.elapsed();
        if elapsed >= backoff.timeout {
            return Err(PollTimeout {
                what: what.to_string(),
                attempts,
                elapsed,
                last,
            });
        }

        debug!("{what}: attempt {attempts} not done yet: {last}");
        let remaining = backoff.timeout - elapsed;
        tokio::time::sleep(interval.min(remaining)).await;
        interval = backoff.next_interval(interval);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn fast(timeout_ms: u64) -> Backoff {
        Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn converges_early() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let calls = Cell::new(0);
        let result = rt.block_on(poll_until("counter", &fast(5_000), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n >= 3 {
                    Ok(n)
                } else {
                    Err("not yet")
                }
            }
        }));
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn times_out_with_last_reason() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), _> =
            rt.block_on(poll_until("never", &fast(20), || async { Err("still down") }));
        let err = result.unwrap_err();
        assert_eq!(err.last, "still down");
        assert!(err.attempts >= 2);
    }

    #[test]
    fn zero_timeout_probes_once() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let calls = Cell::new(0);
        let result: Result<(), _> = rt.block_on(poll_until("once", &fast(0), || {
            calls.set(calls.get() + 1);
            async { Err("no") }
        }));
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn interval_capped() {
        let backoff = fast(10);
        assert_eq!(
            backoff.next_interval(Duration::from_millis(3)),
            Duration::from_millis(4)
        );
    }
}
