//! Retry decisions for failed requests.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::RequestError;

/// What to do after a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-issue the identical request after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Retries are exhausted; the counter has been reset.
    GiveUp { attempts: u32 },
    /// The failure is not retryable.
    Fail,
}

/// Fixed-interval retry with a bounded attempt counter.
///
/// Only retryable failures (see [`RequestError::is_retryable`]) count
/// against the limit. Any success resets the counter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    limit: u32,
    interval: Duration,
    attempts: u32,
}

impl RetryPolicy {
    pub fn new(limit: u32, interval: Duration) -> Self {
        Self {
            limit,
            interval,
            attempts: 0,
        }
    }

    /// Retries spent since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failure and decides whether to retry.
    pub fn on_failure(&mut self, err: &RequestError) -> RetryDecision {
        if !err.is_retryable() {
            self.attempts = 0;
            return RetryDecision::Fail;
        }

        self.attempts += 1;
        if self.attempts > self.limit {
            let attempts = self.attempts;
            self.attempts = 0;
            return RetryDecision::GiveUp { attempts };
        }

        RetryDecision::Retry {
            attempt: self.attempts,
            delay: self.interval,
        }
    }

    /// Records a success.
    pub fn on_success(&mut self) {
        self.attempts = 0;
    }

    /// Sleeps for `delay`, or until `cancel` fires.
    ///
    /// Returns `false` if the wait was cancelled and the retry must not be
    /// issued.
    pub async fn wait(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}
