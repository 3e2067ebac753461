//! Application constants for the Aperture pipeline
//!
//! This module centralizes all constants used throughout the crate,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// Preheating (background prefetch) configuration
pub mod preheat {
    /// Default maximum number of concurrently running preheat tasks
    pub const DEFAULT_MAX_CONCURRENT: usize = 2;
}

/// Completion dispatch configuration
pub mod dispatch {
    use super::Duration;

    /// Name of the dedicated completion delivery thread
    pub const AFFINITY_THREAD_NAME: &str = "aperture-completions";

    /// Completion batches that occupy the affinity context longer than this
    /// are logged, since slow callbacks stall every later delivery
    pub const SLOW_BATCH_THRESHOLD: Duration = Duration::from_millis(16);
}

/// Pipeline bookkeeping thresholds
pub mod pipeline {
    use super::Duration;

    /// Tracked-task count above which a leak warning is logged
    ///
    /// Terminal tasks are always removed from tracking, so a count this
    /// high means callers are creating tasks and never resuming them.
    pub const TRACKED_TASKS_WARN_THRESHOLD: usize = 10_000;

    /// State-lock waits longer than this are logged for diagnostics
    pub const LOCK_CONTENTION_THRESHOLD: Duration = Duration::from_millis(10);
}

/// Logging and debugging constants
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

// Re-export commonly used constants for convenience
pub use dispatch::{AFFINITY_THREAD_NAME, SLOW_BATCH_THRESHOLD};
pub use preheat::DEFAULT_MAX_CONCURRENT;
