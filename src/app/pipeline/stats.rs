//! Pipeline operation statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about pipeline operations
///
/// Counters accumulate over the pipeline's lifetime; `*_count` fields and
/// `preheat_suspended` are gauges refreshed when a snapshot is taken.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Total tasks created, preheat tasks included
    pub tasks_created: u64,
    /// Tasks that reached Completed
    pub tasks_completed: u64,
    /// Tasks that reached Cancelled
    pub tasks_cancelled: u64,
    /// Completions satisfied synchronously from cache
    pub fast_path_hits: u64,
    /// Loads handed to the external loader
    pub loads_started: u64,
    /// Preheat requests admitted to the queue
    pub preheat_admitted: u64,
    /// Preheat requests skipped because an equivalent load was in flight
    pub preheat_deduplicated: u64,
    /// Tasks currently tracked in any non-terminal state
    pub tracked_count: u64,
    /// Tasks currently executing through the loader
    pub executing_count: u64,
    /// Preheat tasks admitted but not yet started
    pub preheat_pending_count: u64,
    /// Preheat tasks currently running
    pub preheat_active_count: u64,
    /// Whether the preheat queue is suspended right now
    pub preheat_suspended: bool,
    /// Pipeline creation time
    pub created_at: DateTime<Utc>,
}

impl PipelineStats {
    /// Create new statistics with current timestamp
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Total tasks that reached a terminal state
    pub fn terminal_count(&self) -> u64 {
        self.tasks_completed + self.tasks_cancelled
    }

    /// Share of completed tasks served from cache, as a percentage
    pub fn fast_path_rate(&self) -> f64 {
        if self.tasks_completed == 0 {
            0.0
        } else {
            (self.fast_path_hits as f64 / self.tasks_completed as f64) * 100.0
        }
    }

    /// Share of finished tasks that were cancelled, as a percentage
    pub fn cancellation_rate(&self) -> f64 {
        let terminal = self.terminal_count();
        if terminal == 0 {
            0.0
        } else {
            (self.tasks_cancelled as f64 / terminal as f64) * 100.0
        }
    }

    /// Share of preheat submissions skipped as duplicates, as a percentage
    pub fn dedup_rate(&self) -> f64 {
        let submitted = self.preheat_admitted + self.preheat_deduplicated;
        if submitted == 0 {
            0.0
        } else {
            (self.preheat_deduplicated as f64 / submitted as f64) * 100.0
        }
    }

    /// Check if the pipeline is tracking no work
    pub fn is_idle(&self) -> bool {
        self.tracked_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_guard_division_by_zero() {
        let stats = PipelineStats::new();
        assert_eq!(stats.fast_path_rate(), 0.0);
        assert_eq!(stats.cancellation_rate(), 0.0);
        assert_eq!(stats.dedup_rate(), 0.0);
        assert!(stats.is_idle());
    }

    #[test]
    fn test_derived_rates() {
        let stats = PipelineStats {
            tasks_completed: 8,
            tasks_cancelled: 2,
            fast_path_hits: 4,
            preheat_admitted: 3,
            preheat_deduplicated: 1,
            ..PipelineStats::new()
        };

        assert_eq!(stats.terminal_count(), 10);
        assert_eq!(stats.fast_path_rate(), 50.0);
        assert_eq!(stats.cancellation_rate(), 20.0);
        assert_eq!(stats.dedup_rate(), 25.0);
    }

    #[test]
    fn test_idle_tracks_gauge() {
        let stats = PipelineStats {
            tracked_count: 1,
            ..PipelineStats::new()
        };
        assert!(!stats.is_idle());
    }
}
