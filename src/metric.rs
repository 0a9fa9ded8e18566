//! Lightweight per-request, per-connection, and per-server counters.
//!
//! `Metric` travels alongside a [`crate::Request`] and a [`crate::Response`]
//! so handlers and observability hooks can read timing/size facts about the
//! exchange currently in flight without the parser or the send stage
//! threading extra return values through every call site.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Facts about one direction (receive or send) of a single request/response
/// exchange: how many operations it took, how many bytes moved, and the
/// timing spread across those operations.
#[derive(Debug, Clone, Copy)]
pub struct Metric {
    started_at: Instant,
    first: Option<Instant>,
    last: Option<Instant>,
    elapsed: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
    bytes: u64,
    ops: u64,
}

impl Metric {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            started_at: Instant::now(),
            first: None,
            last: None,
            elapsed: Duration::ZERO,
            min: None,
            max: None,
            bytes: 0,
            ops: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Records one completed socket operation (a single `read` or `write`
    /// call): its duration and the number of bytes it moved.
    #[inline(always)]
    pub(crate) fn record(&mut self, duration: Duration, bytes: usize) {
        let now = Instant::now();
        if self.first.is_none() {
            self.first = Some(now);
        }
        self.last = Some(now);

        self.elapsed += duration;
        self.min = Some(self.min.map_or(duration, |m| m.min(duration)));
        self.max = Some(self.max.map_or(duration, |m| m.max(duration)));
        self.bytes += bytes as u64;
        self.ops += 1;
    }

    /// Wall-clock time since this direction's stage began, independent of
    /// how many individual operations it took.
    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Timestamp of the first recorded operation, if any.
    #[inline(always)]
    pub const fn first(&self) -> Option<Instant> {
        self.first
    }

    /// Timestamp of the most recently recorded operation, if any.
    #[inline(always)]
    pub const fn last(&self) -> Option<Instant> {
        self.last
    }

    /// Sum of every recorded operation's duration.
    #[inline(always)]
    pub const fn elapsed_ops(&self) -> Duration {
        self.elapsed
    }

    /// Shortest single operation recorded so far, if any.
    #[inline(always)]
    pub const fn min_op(&self) -> Option<Duration> {
        self.min
    }

    /// Longest single operation recorded so far, if any.
    #[inline(always)]
    pub const fn max_op(&self) -> Option<Duration> {
        self.max
    }

    /// Total bytes moved across every recorded operation.
    #[inline(always)]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Number of socket operations recorded (a single `read`/`write` call
    /// each); `1` means the whole exchange completed in one syscall.
    #[inline(always)]
    pub const fn ops(&self) -> u64 {
        self.ops
    }
}

/// Connection-scoped counters, surfaced for observability hooks.
#[derive(Debug)]
pub(crate) struct ConnectionMetric {
    pub(crate) created_at: Instant,
    pub(crate) request_count: usize,
}

impl ConnectionMetric {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            created_at: Instant::now(),
            request_count: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Process-wide byte counters shared by every connection worker.
///
/// Each [`HttpConnection`](crate::server::connection::HttpConnection)
/// increments these at the end of its receive and send stages; atomics are
/// required since every worker task shares the one [`ServerMetrics`] owned
/// by the [`crate::Server`].
#[derive(Debug, Default)]
pub struct ServerMetrics {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl ServerMetrics {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub(crate) fn add_bytes_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn add_bytes_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    /// Total bytes read off client sockets since the server started.
    #[inline(always)]
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    /// Total bytes written to client sockets since the server started.
    #[inline(always)]
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_totals_and_span() {
        let mut metric = Metric::new();
        metric.record(Duration::from_millis(5), 10);
        metric.record(Duration::from_millis(1), 20);
        metric.record(Duration::from_millis(9), 5);

        assert_eq!(metric.bytes(), 35);
        assert_eq!(metric.ops(), 3);
        assert_eq!(metric.elapsed_ops(), Duration::from_millis(15));
        assert_eq!(metric.min_op(), Some(Duration::from_millis(1)));
        assert_eq!(metric.max_op(), Some(Duration::from_millis(9)));
        assert!(metric.first().is_some());
        assert!(metric.last().is_some());
    }

    #[test]
    fn fresh_metric_has_no_recorded_ops() {
        let metric = Metric::new();
        assert_eq!(metric.ops(), 0);
        assert_eq!(metric.bytes(), 0);
        assert_eq!(metric.min_op(), None);
        assert_eq!(metric.max_op(), None);
    }

    #[test]
    fn server_metrics_accumulate_across_connections() {
        let metrics = ServerMetrics::new();
        metrics.add_bytes_in(100);
        metrics.add_bytes_in(50);
        metrics.add_bytes_out(30);

        assert_eq!(metrics.bytes_in(), 150);
        assert_eq!(metrics.bytes_out(), 30);
    }
}
