//! Deadline accounting for connection-lifecycle I/O.
//!
//! Every socket operation is bracketed by a start/stop timestamp; elapsed
//! time is subtracted from the remaining budget before the next operation
//! is attempted. [`Deadline::race`] is the single combinator used to bound
//! an I/O future, generalizing the `tokio::select!` pattern used throughout
//! the connection lifecycle.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;

/// A countdown budget for a single logical phase of a connection (reading
/// a request, sending a response, the connection's total lifetime).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    remaining: Duration,
}

impl Deadline {
    #[inline(always)]
    pub(crate) fn new(budget: Duration) -> Self {
        Self { remaining: budget }
    }

    #[inline(always)]
    pub(crate) fn is_expired(&self) -> bool {
        self.remaining.is_zero()
    }

    /// Races `fut` against the remaining budget. On success, the elapsed
    /// wall-clock time is subtracted from the budget. On timeout, the
    /// budget is zeroed and [`Elapsed`] is returned.
    pub(crate) async fn race<F, T>(&mut self, fut: F) -> Result<T, Elapsed>
    where
        F: Future<Output = T>,
    {
        if self.remaining.is_zero() {
            return Err(Elapsed);
        }

        let start = Instant::now();
        tokio::select! {
            biased;
            out = fut => {
                self.remaining = self.remaining.saturating_sub(start.elapsed());
                Ok(out)
            }
            _ = sleep(self.remaining) => {
                self.remaining = Duration::ZERO;
                Err(Elapsed)
            }
        }
    }
}

/// Marker error returned by [`Deadline::race`] when the budget is exhausted.
/// Callers attach phase-specific meaning (see `ErrorKind::Timeout*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Elapsed;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn race_completes_before_deadline() {
        let mut deadline = Deadline::new(Duration::from_millis(200));
        let out = deadline.race(async { 7 }).await;
        assert_eq!(out, Ok(7));
        assert!(!deadline.is_expired());
    }

    #[tokio::test]
    async fn race_times_out() {
        let mut deadline = Deadline::new(Duration::from_millis(5));
        let out = deadline
            .race(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                7
            })
            .await;
        assert_eq!(out, Err(Elapsed));
        assert!(deadline.is_expired());
    }
}
