// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// Bounded retry policy with capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// A policy with `max_attempts` attempts and no delay between them
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Whether another attempt is allowed after `attempt` attempts
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Run `op` until it succeeds or the attempts are used up
    ///
    /// The closure receives the 1-based attempt number. The last error is
    /// returned when every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if self.allows_retry(attempt) => {
                    let delay = self.backoff(attempt);
                    debug!(attempt, ?delay, error = %e, "attempt failed, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
