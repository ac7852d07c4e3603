// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Fixed-delay retries and bounded polling against the live system.
//!
//! NiFi answers `404` for a component created a moment ago on another request
//! path, and `409` when a revision moved underneath us. Creation retries the
//! former, deletes and updates retry the latter. Everything else fails at once.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::deployer_config::DeploySettings;
use crate::domain::deployment::DeployError;
use crate::domain::live_system::LiveSystemError;

/// Which transient error class an operation may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryable {
    NotFound,
    Conflict,
}

impl Retryable {
    fn matches(self, err: &LiveSystemError) -> bool {
        match self {
            Retryable::NotFound => err.is_not_found(),
            Retryable::Conflict => err.is_conflict(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &DeploySettings) -> Self {
        Self {
            attempts: settings.retry_attempts.max(1),
            delay: settings.retry_delay,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Exhaustion reports the last error verbatim.
    pub async fn run<T, F, Fut>(
        &self,
        name: &str,
        retry_on: Retryable,
        mut operation: F,
    ) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LiveSystemError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if retry_on.matches(&err) => {
                    if attempt >= self.attempts {
                        return Err(DeployError::RetriesExhausted {
                            operation: name.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        name,
                        attempt,
                        self.attempts,
                        err,
                        self.delay
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Result of a single poll attempt.
#[derive(Debug)]
pub enum PollState<T> {
    Ready(T),
    /// Not there yet; carries a description of the observed state
    Pending(String),
}

#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Poller {
    pub fn from_settings(settings: &DeploySettings) -> Self {
        Self {
            timeout: settings.poll_timeout,
            interval: settings.poll_interval,
        }
    }

    /// Poll until ready or until the timeout elapses, in which case the last
    /// observed state is reported.
    pub async fn until<T, F, Fut>(&self, what: &str, mut check: F) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollState<T>, LiveSystemError>>,
    {
        let started = Instant::now();
        loop {
            let last_observed = match check().await? {
                PollState::Ready(value) => return Ok(value),
                PollState::Pending(observed) => observed,
            };
            let waited = started.elapsed();
            if waited >= self.timeout {
                return Err(DeployError::StabilizationTimeout {
                    what: what.to_string(),
                    last_observed,
                    waited,
                });
            }
            tracing::debug!("Waiting for {}: {}", what, last_observed);
            tokio::time::sleep(self.interval).await;
        }
    }
}
