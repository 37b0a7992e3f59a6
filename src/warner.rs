//! Rate limiting for dropped-record warnings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default interval between dropped-record warnings.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Counts dropped records and emits at most one warning per interval.
///
/// Callers bump the counter with [`record_drop`](Self::record_drop); the next
/// [`warn_if_due`](Self::warn_if_due) invokes the provided callback with the
/// accumulated count once the interval has elapsed. [`flush`](Self::flush)
/// reports any pending count immediately.
pub struct DropWarner {
    interval: Duration,
    dropped: AtomicU64,
    last_warn: Mutex<Option<Instant>>,
}

impl DropWarner {
    /// Create a warner. The first warning fires without waiting.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            dropped: AtomicU64::new(0),
            last_warn: Mutex::new(None),
        }
    }

    /// Count one dropped record.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Invoke `warn` with the pending drop count if the interval has elapsed.
    pub fn warn_if_due(&self, warn: impl FnOnce(u64)) {
        let now = Instant::now();
        let mut last = self.last_warn.lock();
        let due = last.is_none_or(|at| now.duration_since(at) >= self.interval);
        if !due {
            return;
        }
        let count = self.dropped.swap(0, Ordering::Relaxed);
        if count > 0 {
            *last = Some(now);
            warn(count);
        }
    }

    /// Report any pending drops immediately.
    pub fn flush(&self, warn: impl FnOnce(u64)) {
        let count = self.dropped.swap(0, Ordering::Relaxed);
        if count > 0 {
            *self.last_warn.lock() = Some(Instant::now());
            warn(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_warning_fires_immediately() {
        let warner = DropWarner::new(Duration::from_secs(60));
        let mut seen = Vec::new();
        warner.record_drop();
        warner.warn_if_due(|count| seen.push(count));
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn warnings_are_rate_limited() {
        let warner = DropWarner::new(Duration::from_secs(60));
        let mut seen = Vec::new();
        warner.record_drop();
        warner.warn_if_due(|count| seen.push(count));
        warner.record_drop();
        warner.warn_if_due(|count| seen.push(count));
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn flush_reports_pending_drops() {
        let warner = DropWarner::new(Duration::from_secs(60));
        let mut seen = Vec::new();
        warner.record_drop();
        warner.record_drop();
        warner.flush(|count| seen.push(count));
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn nothing_is_reported_without_drops() {
        let warner = DropWarner::new(Duration::from_millis(0));
        let mut called = false;
        warner.warn_if_due(|_| called = true);
        warner.flush(|_| called = true);
        assert!(!called);
    }
}
