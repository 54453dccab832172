//! Jittered, cancellable retries of upstream calls.

use crate::{ChainClient, ChainClientError, Metrics, RetryError};
use backon::{BackoffBuilder, Retryable};
use rand::Rng;
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Builds a [`Jitter`] backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitteredBackoff {
    min: Duration,
    max: Duration,
}

/// Unbounded sequence of delays drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct Jitter {
    min: Duration,
    max: Duration,
}

impl JitteredBackoff {
    /// Creates a backoff between `min` and `max`. Inverted bounds collapse to `min`.
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }
}

impl BackoffBuilder for JitteredBackoff {
    type Backoff = Jitter;

    fn build(self) -> Self::Backoff {
        Jitter { min: self.min, max: self.max }
    }
}

impl Iterator for Jitter {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.max <= self.min {
            return Some(self.min);
        }
        Some(rand::rng().random_range(self.min..=self.max))
    }
}

/// Retries transient upstream failures until they succeed or shutdown is
/// requested.
///
/// Each task owns its own retrier, so a failing call never blocks a sibling task.
#[derive(Debug, Clone)]
pub struct Retrier {
    backoff: JitteredBackoff,
    cancellation: CancellationToken,
}

impl Retrier {
    /// Creates a retrier sleeping between `min` and `max` between attempts.
    pub const fn new(min: Duration, max: Duration, cancellation: CancellationToken) -> Self {
        Self { backoff: JitteredBackoff::new(min, max), cancellation }
    }

    /// Returns the token that aborts pending retries.
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error or
    /// the retrier is cancelled.
    ///
    /// `call` names the operation in logs.
    pub async fn run<T, F, Fut>(&self, call: &'static str, operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainClientError>>,
    {
        let attempt = operation
            .retry(self.backoff)
            .when(ChainClientError::is_retryable)
            .notify(|err, delay| {
                warn!(target: "chain_client", call, %err, ?delay, "Upstream call failed, retrying");
                Metrics::record_rpc_retry();
            });

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(RetryError::Cancelled),
            result = attempt => result.map_err(RetryError::Fatal),
        }
    }

    /// Waits until the node answers requests.
    pub async fn wait_for_connection<C>(&self, client: &C) -> Result<(), RetryError>
    where
        C: ChainClient + ?Sized,
    {
        self.run("is_connected", move || async move {
            if client.is_connected().await {
                Ok(())
            } else {
                Err(ChainClientError::Disconnected("node unreachable".to_string()))
            }
        })
        .await
    }
}
