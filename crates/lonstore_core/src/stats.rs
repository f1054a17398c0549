//! Store statistics.
//!
//! Counters for monitoring flash wear and persistence health.

use std::sync::atomic::{AtomicU64, Ordering};

/// Segment store statistics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Commit passes executed.
    commit_passes: AtomicU64,
    /// Segments committed successfully.
    commits: AtomicU64,
    /// Segment commits that failed.
    commit_failures: AtomicU64,
    /// Segments restored successfully.
    restores: AtomicU64,
    /// Restores that fell back to defaults.
    losses: AtomicU64,
    /// Segment erases (one per store or explicit erase).
    erases: AtomicU64,
    /// Payload bytes written, headers included.
    bytes_written: AtomicU64,
    /// Payload bytes read, headers included.
    bytes_read: AtomicU64,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit_pass(&self) {
        self.commit_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, bytes: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restore(&self, bytes: u64) {
        self.restores.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_loss(&self) {
        self.losses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_erase(&self) {
        self.erases.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of commit passes executed.
    pub fn commit_passes(&self) -> u64 {
        self.commit_passes.load(Ordering::Relaxed)
    }

    /// Returns the number of successful segment commits.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of failed segment commits.
    pub fn commit_failures(&self) -> u64 {
        self.commit_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of successful restores.
    pub fn restores(&self) -> u64 {
        self.restores.load(Ordering::Relaxed)
    }

    /// Returns the number of restores that lost data.
    pub fn losses(&self) -> u64 {
        self.losses.load(Ordering::Relaxed)
    }

    /// Returns the number of segment erases.
    pub fn erases(&self) -> u64 {
        self.erases.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commit_passes: self.commit_passes(),
            commits: self.commits(),
            commit_failures: self.commit_failures(),
            restores: self.restores(),
            losses: self.losses(),
            erases: self.erases(),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of store statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Commit passes executed.
    pub commit_passes: u64,
    /// Successful segment commits.
    pub commits: u64,
    /// Failed segment commits.
    pub commit_failures: u64,
    /// Successful restores.
    pub restores: u64,
    /// Restores that lost data.
    pub losses: u64,
    /// Segment erases.
    pub erases: u64,
    /// Bytes written.
    pub bytes_written: u64,
    /// Bytes read.
    pub bytes_read: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(StoreStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = StoreStats::new();
        stats.record_commit_pass();
        stats.record_commit(40);
        stats.record_commit(24);
        stats.record_commit_failure();
        stats.record_restore(40);
        stats.record_loss();
        stats.record_erase();

        let snap = stats.snapshot();
        assert_eq!(snap.commit_passes, 1);
        assert_eq!(snap.commits, 2);
        assert_eq!(snap.bytes_written, 64);
        assert_eq!(snap.commit_failures, 1);
        assert_eq!(snap.restores, 1);
        assert_eq!(snap.bytes_read, 40);
        assert_eq!(snap.losses, 1);
        assert_eq!(snap.erases, 1);
    }
}
