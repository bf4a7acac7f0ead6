//! Bounded polling with cancellation.
//!
//! Every wait in a validation run has the same shape: ask the cloud a
//! question, and if the answer is "not yet", ask again after a fixed interval
//! until a deadline. [`poll_immediate`] is that loop. It has no domain
//! knowledge: the condition decides whether an observation is terminal
//! (`Err`), finished (`Ok(true)`) or worth another look (`Ok(false)`).
//!
//! # Example
//!
//! ```ignore
//! use egress_verifier::poll::{poll_immediate, PollConfig, TokioClock};
//!
//! poll_immediate(&TokioClock, &cancel, &PollConfig::new(interval, timeout), "instance", || async {
//!     Ok::<_, Error>(client.get_instance_status(&name).await? == "RUNNING")
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Source of time for polling loops.
///
/// Production code uses [`TokioClock`]; tests substitute a clock that
/// advances virtually so deadlines can be exercised without real delay.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Interval and deadline for one polling phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between condition checks
    pub interval: Duration,
    /// Maximum time the phase may take
    pub timeout: Duration,
}

impl PollConfig {
    /// Create a config from an interval and a timeout
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Why a poll ended without success
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The deadline elapsed before the condition was met
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The cancellation token fired
    #[error("cancelled")]
    Cancelled,

    /// The condition reported a terminal error
    #[error("{0}")]
    Condition(E),
}

/// Poll `condition` until it returns `Ok(true)`, returns `Err`, the deadline
/// passes, or `cancel` fires.
///
/// The first check happens immediately. Errors from the condition are
/// surfaced as [`PollError::Condition`] and never retried. The sleep before
/// the deadline is shortened to the time remaining, so a condition that never
/// succeeds times out at the deadline rather than up to one interval later.
/// A timeout too large to represent as an instant means no deadline.
pub async fn poll_immediate<C, F, Fut, E>(
    clock: &C,
    cancel: &CancellationToken,
    config: &PollConfig,
    operation_name: &str,
    mut condition: F,
) -> Result<(), PollError<E>>
where
    C: Clock + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let deadline = clock.now().checked_add(config.timeout);
    let expired = |now: Instant| deadline.is_some_and(|d| now >= d);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        attempt += 1;
        if condition().await.map_err(PollError::Condition)? {
            debug!(operation = %operation_name, attempt, "Poll condition met");
            return Ok(());
        }

        let now = clock.now();
        if expired(now) {
            warn!(
                operation = %operation_name,
                attempt,
                timeout = ?config.timeout,
                "Poll deadline elapsed"
            );
            return Err(PollError::Timeout(config.timeout));
        }

        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let delay = match deadline {
            Some(d) => config.interval.min(d - now),
            None => config.interval,
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = clock.sleep(delay) => {}
        }

        if expired(clock.now()) {
            warn!(
                operation = %operation_name,
                attempt,
                timeout = ?config.timeout,
                "Poll deadline elapsed"
            );
            return Err(PollError::Timeout(config.timeout));
        }
    }
}
