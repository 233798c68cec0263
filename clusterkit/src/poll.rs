//! Bounded readiness polling

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::errors::{ClusterError, Result};

/// How long and how often to retry a readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between two attempts
    pub interval: Duration,

    /// Give up once this much time has passed since the first attempt
    pub deadline: Option<Duration>,

    /// Give up after this many failed attempts
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            deadline: Some(Duration::from_secs(600)),
            max_attempts: None,
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline: Some(deadline),
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Call `check` until it reports ready; returns the number of attempts made.
    ///
    /// Errors from the check abort polling. Running out of time or attempts
    /// yields `Timeout`.
    pub async fn poll<P, PF>(&self, what: &str, check: P) -> Result<u32>
    where
        P: FnMut(u32) -> PF,
        PF: Future<Output = Result<bool>>,
    {
        self.poll_with(what, check, tokio::time::sleep).await
    }

    /// Same as [`PollPolicy::poll`] with an injected sleep function
    pub async fn poll_with<P, PF, S, SF>(&self, what: &str, mut check: P, sleep_fn: S) -> Result<u32>
    where
        P: FnMut(u32) -> PF,
        PF: Future<Output = Result<bool>>,
        S: Fn(Duration) -> SF,
        SF: Future<Output = ()>,
    {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            if check(attempt).await? {
                debug!("{} ready after {} attempt(s)", what, attempt);
                return Ok(attempt);
            }
            if self.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(ClusterError::Timeout(format!(
                    "{what} not ready after {attempt} attempts"
                )));
            }
            if self
                .deadline
                .is_some_and(|deadline| started.elapsed() + self.interval > deadline)
            {
                return Err(ClusterError::Timeout(format!(
                    "{what} not ready within {:?} ({attempt} attempts)",
                    self.deadline.unwrap_or_default()
                )));
            }
            debug!("{} not ready yet (attempt {}), retrying", what, attempt);
            sleep_fn(self.interval).await;
        }
    }
}
