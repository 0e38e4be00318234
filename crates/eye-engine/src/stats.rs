//! Observation counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

/// Point-in-time copy of [`ObservationStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sessions_created: u64,
    pub frames_observed: u64,
    pub thumbnails_published: u64,
    pub pointer_updates: u64,
    pub snapshots_published: u64,
    pub alignments_published: u64,
    pub matrix_frames_published: u64,
    pub sink_failures: u64,
}

/// Counters shared between the observation worker and the engine.
pub struct ObservationStats {
    sessions_created: AtomicU64,
    frames_observed: AtomicU64,
    thumbnails_published: AtomicU64,
    pointer_updates: AtomicU64,
    snapshots_published: AtomicU64,
    alignments_published: AtomicU64,
    matrix_frames_published: AtomicU64,
    sink_failures: AtomicU64,
    log_interval: Duration,
    last_log_time: RwLock<Instant>,
}

impl ObservationStats {
    pub fn new(log_interval: Duration) -> Self {
        Self {
            sessions_created: AtomicU64::new(0),
            frames_observed: AtomicU64::new(0),
            thumbnails_published: AtomicU64::new(0),
            pointer_updates: AtomicU64::new(0),
            snapshots_published: AtomicU64::new(0),
            alignments_published: AtomicU64::new(0),
            matrix_frames_published: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            log_interval,
            last_log_time: RwLock::new(Instant::now()),
        }
    }

    /// Minimum time between two stats log lines.
    pub fn log_interval(&self) -> Duration {
        self.log_interval
    }

    pub fn record_session(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_thumbnail(&self) {
        self.thumbnails_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pointer_update(&self) {
        self.pointer_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alignment(&self) {
        self.alignments_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_matrix_frame(&self) {
        self.matrix_frames_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            frames_observed: self.frames_observed.load(Ordering::Relaxed),
            thumbnails_published: self.thumbnails_published.load(Ordering::Relaxed),
            pointer_updates: self.pointer_updates.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
            alignments_published: self.alignments_published.load(Ordering::Relaxed),
            matrix_frames_published: self.matrix_frames_published.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }

    /// Log the counters if the log interval has passed.
    pub fn log_if_due(&self) {
        if self.last_log_time.read().elapsed() < self.log_interval {
            return;
        }
        *self.last_log_time.write() = Instant::now();

        let stats = self.snapshot();
        info!(
            "Observation stats: frames={}, thumbnails={}, pointer={}, snapshots={}, alignments={}, matrix={}, sink_failures={}, sessions={}",
            stats.frames_observed,
            stats.thumbnails_published,
            stats.pointer_updates,
            stats.snapshots_published,
            stats.alignments_published,
            stats.matrix_frames_published,
            stats.sink_failures,
            stats.sessions_created
        );
    }
}

impl Default for ObservationStats {
    fn default() -> Self {
        Self::new(crate::EngineConfig::DEFAULT_STATS_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = ObservationStats::default();
        stats.record_frame();
        stats.record_frame();
        stats.record_matrix_frame();
        stats.record_sink_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_observed, 2);
        assert_eq!(snapshot.matrix_frames_published, 1);
        assert_eq!(snapshot.sink_failures, 1);
        assert_eq!(snapshot.snapshots_published, 0);
    }

    #[test]
    fn test_log_resets_timer() {
        let stats = ObservationStats::new(Duration::ZERO);
        stats.log_if_due();
        assert!(stats.last_log_time.read().elapsed() < Duration::from_secs(1));
    }
}
