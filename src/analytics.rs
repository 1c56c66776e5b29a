//! Fire-and-forget save analytics.
//!
//! The engine reports what it did; it never reads anything back, and a
//! sink cannot fail an operation.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use crate::model::SaveKind;

/// Receiver for engine activity.
pub trait SaveAnalytics: Send + Sync {
    fn record_save(&self, owner_id: &str, kind: SaveKind, byte_size: usize);
    fn record_load(&self, owner_id: &str);
    fn record_sync(&self, owner_id: &str, had_conflict: bool);
    fn record_conflict_resolved(&self, owner_id: &str);
    fn record_corruption(&self, owner_id: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

impl SaveAnalytics for NoopAnalytics {
    fn record_save(&self, _: &str, _: SaveKind, _: usize) {}
    fn record_load(&self, _: &str) {}
    fn record_sync(&self, _: &str, _: bool) {}
    fn record_conflict_resolved(&self, _: &str) {}
    fn record_corruption(&self, _: &str) {}
}

/// Emits each call as a `debug` tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalytics;

impl SaveAnalytics for TracingAnalytics {
    fn record_save(&self, owner_id: &str, kind: SaveKind, byte_size: usize) {
        debug!(target: "gamesave::analytics", owner_id, %kind, byte_size, "save");
    }

    fn record_load(&self, owner_id: &str) {
        debug!(target: "gamesave::analytics", owner_id, "load");
    }

    fn record_sync(&self, owner_id: &str, had_conflict: bool) {
        debug!(target: "gamesave::analytics", owner_id, had_conflict, "sync");
    }

    fn record_conflict_resolved(&self, owner_id: &str) {
        debug!(target: "gamesave::analytics", owner_id, "conflict_resolved");
    }

    fn record_corruption(&self, owner_id: &str) {
        debug!(target: "gamesave::analytics", owner_id, "corruption");
    }
}

/// Per-owner counters.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct OwnerStats {
    pub total_saves: u64,
    pub manual_saves: u64,
    pub auto_saves: u64,
    pub quick_saves: u64,
    pub total_loads: u64,
    pub sync_count: u64,
    pub conflict_count: u64,
    pub conflicts_resolved: u64,
    pub corruption_count: u64,
    pub total_bytes: u64,
}

impl OwnerStats {
    /// Mean stored size of a save, zero before the first save.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_save_size(&self) -> f64 {
        if self.total_saves == 0 {
            0.0
        } else {
            self.total_bytes as f64 / self.total_saves as f64
        }
    }
}

/// Per-owner counters kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryAnalytics {
    stats: Mutex<HashMap<String, OwnerStats>>,
}

impl InMemoryAnalytics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one owner's counters.
    #[must_use]
    pub fn stats(&self, owner_id: &str) -> OwnerStats {
        self.stats
            .lock()
            .map(|s| s.get(owner_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn with<F: FnOnce(&mut OwnerStats)>(&self, owner_id: &str, f: F) {
        // A poisoned lock only loses counters.
        if let Ok(mut stats) = self.stats.lock() {
            f(stats.entry(owner_id.to_string()).or_default());
        }
    }
}

impl SaveAnalytics for InMemoryAnalytics {
    fn record_save(&self, owner_id: &str, kind: SaveKind, byte_size: usize) {
        self.with(owner_id, |s| {
            s.total_saves += 1;
            s.total_bytes += byte_size as u64;
            match kind {
                SaveKind::Manual => s.manual_saves += 1,
                SaveKind::Auto => s.auto_saves += 1,
                SaveKind::Quicksave => s.quick_saves += 1,
            }
        });
    }

    fn record_load(&self, owner_id: &str) {
        self.with(owner_id, |s| s.total_loads += 1);
    }

    fn record_sync(&self, owner_id: &str, had_conflict: bool) {
        self.with(owner_id, |s| {
            s.sync_count += 1;
            if had_conflict {
                s.conflict_count += 1;
            }
        });
    }

    fn record_conflict_resolved(&self, owner_id: &str) {
        self.with(owner_id, |s| s.conflicts_resolved += 1);
    }

    fn record_corruption(&self, owner_id: &str) {
        self.with(owner_id, |s| s.corruption_count += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_counts_per_owner() {
        let analytics = InMemoryAnalytics::new();
        analytics.record_save("p1", SaveKind::Manual, 100);
        analytics.record_save("p1", SaveKind::Auto, 300);
        analytics.record_sync("p1", true);
        analytics.record_sync("p1", false);
        analytics.record_load("p2");

        let p1 = analytics.stats("p1");
        assert_eq!(p1.total_saves, 2);
        assert_eq!(p1.manual_saves, 1);
        assert_eq!(p1.auto_saves, 1);
        assert_eq!(p1.sync_count, 2);
        assert_eq!(p1.conflict_count, 1);
        assert!((p1.average_save_size() - 200.0).abs() < f64::EPSILON);

        assert_eq!(analytics.stats("p2").total_loads, 1);
        assert_eq!(analytics.stats("nobody"), OwnerStats::default());
    }
}
