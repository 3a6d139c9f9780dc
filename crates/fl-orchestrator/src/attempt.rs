//! Attempt driver - runs one ledger operation under timeout, retry and
//! cancellation until it reaches a terminal state

use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use fl_types::TransactionOutcome;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a single attempt resolved
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolution {
    Outcome(TransactionOutcome),
    /// Exceeded the per-attempt timeout; treated as a transient failure
    TimedOut(Duration),
    /// The ledger call panicked; never retried
    Panicked(String),
    Cancelled,
}

impl Resolution {
    /// Transient outcome a timed-out attempt is retried as
    pub fn timed_out_outcome(timeout: Duration) -> TransactionOutcome {
        TransactionOutcome::transient(timeout_reason(timeout))
    }
}

pub(crate) fn timeout_reason(after: Duration) -> String {
    format!("attempt timed out after {}ms", after.as_millis())
}

/// Trace of one attempt
#[derive(Debug, Clone)]
pub(crate) struct AttemptTrace {
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub latency: Duration,
    /// Delay waited before this attempt
    pub backoff: Duration,
    pub resolution: Resolution,
}

pub(crate) struct AttemptDriver<'a> {
    pub policy: &'a RetryPolicy,
    pub max_retries: u32,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
    pub limiter: Option<&'a Semaphore>,
}

impl AttemptDriver<'_> {
    /// Drive `call` until it commits, fails fatally, exhausts the retry
    /// budget or is cancelled.
    ///
    /// The returned traces are in attempt order and never empty; only the
    /// last one is terminal.
    pub async fn drive<F, Fut>(&self, mut call: F) -> Vec<AttemptTrace>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransactionOutcome>,
    {
        let mut traces = Vec::new();
        let mut attempt_number = 1;
        let mut backoff = Duration::ZERO;

        loop {
            let (started_at, latency, resolution) = self.attempt(&mut call).await;

            let retry = match &resolution {
                Resolution::Outcome(outcome) => {
                    self.policy
                        .should_retry(outcome, attempt_number, self.max_retries)
                }
                Resolution::TimedOut(timeout) => self.policy.should_retry(
                    &Resolution::timed_out_outcome(*timeout),
                    attempt_number,
                    self.max_retries,
                ),
                Resolution::Panicked(_) | Resolution::Cancelled => false,
            };

            traces.push(AttemptTrace {
                attempt_number,
                started_at,
                latency,
                backoff,
                resolution,
            });

            if !retry {
                return traces;
            }

            backoff = self.policy.next_delay(attempt_number);
            attempt_number += 1;

            let sleep_started = Instant::now();
            let cancelled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = tokio::time::sleep(backoff) => false,
            };

            if cancelled {
                // The next attempt never reached the ledger
                traces.push(AttemptTrace {
                    attempt_number,
                    started_at: Utc::now(),
                    latency: Duration::ZERO,
                    backoff: sleep_started.elapsed(),
                    resolution: Resolution::Cancelled,
                });
                return traces;
            }
        }
    }

    async fn attempt<F, Fut>(&self, call: &mut F) -> (DateTime<Utc>, Duration, Resolution)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransactionOutcome>,
    {
        // Permits are held for the ledger call only, never across backoff
        let _permit = match self.limiter {
            Some(limiter) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return (Utc::now(), Duration::ZERO, Resolution::Cancelled);
                }
                permit = limiter.acquire() => permit.ok(),
            },
            None => None,
        };

        let started_at = Utc::now();
        let started = Instant::now();

        // A panic in the adapter ends this attempt only; earlier traces survive
        let guarded = AssertUnwindSafe(call()).catch_unwind();

        let resolution = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Resolution::Cancelled,
            result = tokio::time::timeout(self.timeout, guarded) => match result {
                Ok(Ok(outcome)) => Resolution::Outcome(outcome),
                Ok(Err(payload)) => Resolution::Panicked(format!(
                    "ledger call panicked: {}",
                    panic_message(payload.as_ref())
                )),
                Err(_) => Resolution::TimedOut(self.timeout),
            },
        };

        (started_at, started.elapsed(), resolution)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
