//! Reclamation Metrics
//!
//! Thread-safe counters shared by every reclaimer in a pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::dependency::EntityKind;

const KINDS: usize = EntityKind::ALL.len();

/// Thread-safe metrics for tracking reclamation
#[derive(Debug, Clone)]
pub struct ReclaimMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Rows permanently removed, per entity kind
    reclaimed: [AtomicUsize; KINDS],
    /// Items whose reclamation failed, per entity kind
    failed: [AtomicUsize; KINDS],
    /// Candidates kept because something still references them
    retained: [AtomicUsize; KINDS],
    audits_forwarded: AtomicUsize,
    audits_failed: AtomicUsize,
    notifications_sent: AtomicUsize,
    notifications_failed: AtomicUsize,
    /// Best-effort file or certificate cleanups that failed
    cleanup_failures: AtomicUsize,
    users_reassigned: AtomicUsize,
}

impl Default for ReclaimMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReclaimMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub fn record_reclaimed(&self, kind: EntityKind) {
        self.inner.reclaimed[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, kind: EntityKind) {
        self.inner.failed[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retained(&self, kind: EntityKind) {
        self.inner.retained[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_forwarded(&self) {
        self.inner.audits_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_failed(&self) {
        self.inner.audits_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.inner.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failed(&self) {
        self.inner
            .notifications_failed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleanup_failure(&self) {
        self.inner.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_user_reassigned(&self) {
        self.inner.users_reassigned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reclaimed(&self, kind: EntityKind) -> usize {
        self.inner.reclaimed[kind.index()].load(Ordering::Relaxed)
    }

    pub fn failed(&self, kind: EntityKind) -> usize {
        self.inner.failed[kind.index()].load(Ordering::Relaxed)
    }

    pub fn retained(&self, kind: EntityKind) -> usize {
        self.inner.retained[kind.index()].load(Ordering::Relaxed)
    }

    pub fn audits_forwarded(&self) -> usize {
        self.inner.audits_forwarded.load(Ordering::Relaxed)
    }

    pub fn audits_failed(&self) -> usize {
        self.inner.audits_failed.load(Ordering::Relaxed)
    }

    pub fn notifications_sent(&self) -> usize {
        self.inner.notifications_sent.load(Ordering::Relaxed)
    }

    pub fn notifications_failed(&self) -> usize {
        self.inner.notifications_failed.load(Ordering::Relaxed)
    }

    pub fn cleanup_failures(&self) -> usize {
        self.inner.cleanup_failures.load(Ordering::Relaxed)
    }

    pub fn users_reassigned(&self) -> usize {
        self.inner.users_reassigned.load(Ordering::Relaxed)
    }

    /// Get a snapshot of current metrics
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            reclaimed: EntityKind::ALL.map(|k| (k, self.reclaimed(k))),
            failed: EntityKind::ALL.map(|k| (k, self.failed(k))),
            retained: EntityKind::ALL.map(|k| (k, self.retained(k))),
            audits_forwarded: self.audits_forwarded(),
            audits_failed: self.audits_failed(),
            notifications_sent: self.notifications_sent(),
            notifications_failed: self.notifications_failed(),
            cleanup_failures: self.cleanup_failures(),
            users_reassigned: self.users_reassigned(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub reclaimed: [(EntityKind, usize); KINDS],
    pub failed: [(EntityKind, usize); KINDS],
    pub retained: [(EntityKind, usize); KINDS],
    pub audits_forwarded: usize,
    pub audits_failed: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub cleanup_failures: usize,
    pub users_reassigned: usize,
}

impl MetricsSummary {
    pub fn total_reclaimed(&self) -> usize {
        self.reclaimed.iter().map(|(_, n)| n).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.failed.iter().map(|(_, n)| n).sum()
    }

    /// Log the metrics summary
    pub fn log(&self) {
        log::info!("=== Reclamation Metrics Summary ===");
        for ((kind, reclaimed), ((_, failed), (_, retained))) in self
            .reclaimed
            .iter()
            .zip(self.failed.iter().zip(self.retained.iter()))
        {
            log::info!("{kind}: {reclaimed} reclaimed, {failed} failed, {retained} retained");
        }
        log::info!(
            "Audit snapshots: {} forwarded, {} failed",
            self.audits_forwarded,
            self.audits_failed
        );
        log::info!(
            "Notifications: {} sent, {} failed",
            self.notifications_sent,
            self.notifications_failed
        );
        log::info!(
            "Best-effort cleanup failures: {}, users reassigned: {}",
            self.cleanup_failures,
            self.users_reassigned
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = ReclaimMetrics::new();
        let summary = metrics.summary();

        assert_eq!(summary.total_reclaimed(), 0);
        assert_eq!(summary.total_failed(), 0);
        assert_eq!(summary.audits_forwarded, 0);
    }

    #[test]
    fn test_counters_are_per_kind() {
        let metrics = ReclaimMetrics::new();

        metrics.record_reclaimed(EntityKind::Template);
        metrics.record_reclaimed(EntityKind::Template);
        metrics.record_failed(EntityKind::Group);
        metrics.record_retained(EntityKind::Contact);

        assert_eq!(metrics.reclaimed(EntityKind::Template), 2);
        assert_eq!(metrics.reclaimed(EntityKind::Group), 0);
        assert_eq!(metrics.failed(EntityKind::Group), 1);
        assert_eq!(metrics.retained(EntityKind::Contact), 1);

        let summary = metrics.summary();
        assert_eq!(summary.total_reclaimed(), 2);
        assert_eq!(summary.total_failed(), 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = ReclaimMetrics::new();
        let clone = metrics.clone();

        clone.record_audit_forwarded();
        clone.record_notification_failed();
        clone.record_cleanup_failure();
        clone.record_user_reassigned();

        assert_eq!(metrics.audits_forwarded(), 1);
        assert_eq!(metrics.notifications_failed(), 1);
        assert_eq!(metrics.cleanup_failures(), 1);
        assert_eq!(metrics.users_reassigned(), 1);
    }

    #[test]
    fn test_metrics_thread_safety() {
        use std::thread;

        let metrics = ReclaimMetrics::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record_reclaimed(EntityKind::User);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.reclaimed(EntityKind::User), 800);
    }
}
