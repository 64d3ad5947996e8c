//! Bounded polling for cross-venue settlement.
//!
//! Bridges, withdrawals and position closes settle asynchronously. Callers
//! poll at a fixed interval up to an explicit deadline and get back
//! [`PollStatus::Pending`] on expiry instead of blocking forever, so the
//! enclosing workflow can be re-run later and resume.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a bounded poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Settled(T),
    Pending { waited: Duration },
}

impl<T> PollStatus<T> {
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

/// Calls `check` every `interval` until it yields `Some`, or `deadline` elapses.
///
/// The check runs at least once even with a zero deadline.
///
/// # Errors
///
/// Propagates the first error returned by `check`.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    deadline: Duration,
    mut check: F,
) -> Result<PollStatus<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = check().await? {
            return Ok(PollStatus::Settled(value));
        }

        let waited = started.elapsed();
        if waited >= deadline {
            tracing::warn!(
                waited = ?waited,
                "Settlement still pending at deadline"
            );
            return Ok(PollStatus::Pending { waited });
        }

        tokio::time::sleep(interval.min(deadline - waited)).await;
    }
}
