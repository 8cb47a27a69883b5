//! # Bounded retry of store calls.
//!
//! [`RetryPolicy`] wraps an async store call and re-issues it on transient
//! failure ([`StoreError::is_retryable`]) until `attempts` calls were made,
//! sleeping [`BackoffPolicy::next`] between them.
//!
//! ```text
//! attempt 1 ──► Err(transient) ──► RetryScheduled ──► sleep(backoff.next(0))
//! attempt 2 ──► Err(transient) ──► RetryScheduled ──► sleep(backoff.next(1))
//! attempt 3 ──► Err(_)         ──► return Err      (attempts exhausted)
//! ```
//!
//! Non-retryable errors return immediately; [`RetryPolicy::run_when`] takes
//! its own predicate for boundaries that retry every error.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StoreError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;

/// Number of attempts plus the delay schedule between them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one (min 1).
    pub attempts: u32,
    /// Delay schedule between calls.
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, backoff: BackoffPolicy) -> Self {
        Self { attempts, backoff }
    }

    /// Single attempt, no retry.
    pub const fn once() -> Self {
        Self::new(
            1,
            BackoffPolicy::exponential(Duration::ZERO, 1.0, Duration::ZERO),
        )
    }

    /// Calls `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `call` receives the 0-indexed attempt number. Every scheduled retry is
    /// logged and published as [`EventKind::RetryScheduled`].
    pub async fn run<T, F, Fut>(
        &self,
        bus: &Bus,
        run_id: Option<&str>,
        op: &'static str,
        call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run_when(bus, run_id, op, StoreError::is_retryable, call)
            .await
    }

    /// Like [`run`](Self::run), but `retry_if` decides which errors are retried.
    pub async fn run_when<T, F, Fut, P>(
        &self,
        bus: &Bus,
        run_id: Option<&str>,
        op: &'static str,
        retry_if: P,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
        P: Fn(&StoreError) -> bool,
    {
        let attempts = self.attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            let err = match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempt += 1;
            if !retry_if(&err) || attempt >= attempts {
                return Err(err);
            }

            let delay = self.backoff.next(attempt - 1);
            warn!(
                op,
                attempt,
                attempts,
                delay = ?delay,
                error = %err,
                "store call failed, retrying"
            );
            let mut ev = Event::new(EventKind::RetryScheduled)
                .with_op(op)
                .with_attempt(attempt)
                .with_delay(delay)
                .with_reason(err.to_string());
            if let Some(run_id) = run_id {
                ev = ev.with_run(run_id);
            }
            bus.publish(ev);

            tokio::time::sleep(delay).await;
        }
    }
}
