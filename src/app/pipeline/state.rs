//! Mutable pipeline state, guarded by the orchestrator's lock
//!
//! Everything a pipeline operation reads or writes lives here: the id-keyed
//! task storage, the executing set that drives concurrency accounting, the
//! preheat dedup map and queue, and the statistics counters. The orchestrator
//! in [`core`](super::core) is the only code that touches this struct, always
//! with its mutex held.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::app::models::RequestKey;

use super::config::PipelineConfig;
use super::preheat::PreheatQueue;
use super::stats::PipelineStats;
use super::task::{TaskId, TaskRecord};

pub(crate) struct PipelineState {
    /// Every non-terminal task, keyed by id
    pub(crate) tasks: HashMap<TaskId, TaskRecord>,
    /// Tasks currently executing through the loader
    pub(crate) executing: HashSet<TaskId>,
    /// In-flight preheat tasks by request identity, for dedup
    pub(crate) preheating: HashMap<RequestKey, TaskId>,
    /// Bounded background queue
    pub(crate) queue: PreheatQueue,
    /// Lifetime counters; gauges are filled in on snapshot
    pub(crate) stats: PipelineStats,
    /// Once set, every mutating operation is a silent no-op
    pub(crate) invalidated: bool,
    next_task_id: u64,
    warn_threshold: usize,
}

impl PipelineState {
    pub(crate) fn new(config: &PipelineConfig) -> Self {
        Self {
            tasks: HashMap::new(),
            executing: HashSet::new(),
            preheating: HashMap::new(),
            queue: PreheatQueue::new(config.preheat_concurrency),
            stats: PipelineStats::new(),
            invalidated: false,
            next_task_id: 0,
            warn_threshold: config.tracked_tasks_warn_threshold,
        }
    }

    /// Hand out the next task id, unique for this pipeline's lifetime
    pub(crate) fn allocate_id(&mut self) -> TaskId {
        self.next_task_id += 1;
        TaskId::new(self.next_task_id)
    }

    /// Start tracking a task
    pub(crate) fn insert_task(&mut self, record: TaskRecord) {
        let id = record.shared.id;
        self.tasks.insert(id, record);
        self.stats.tasks_created += 1;

        if self.tasks.len() == self.warn_threshold {
            warn!(
                "tracking {} tasks, callers may be leaking suspended tasks",
                self.warn_threshold
            );
        }
    }

    /// Drop a terminal task from every tracking collection
    ///
    /// Returns true when the task was in the executing set, in which case the
    /// caller must recompute backpressure.
    pub(crate) fn forget_task(&mut self, id: TaskId, key: &RequestKey) -> bool {
        let was_executing = self.executing.remove(&id);
        self.queue.on_terminal(id);
        if self.preheating.get(key) == Some(&id) {
            self.preheating.remove(key);
        }
        was_executing
    }

    /// Re-derive the preheat suspension flag from the executing count
    ///
    /// Preheating suspends while foreground demand exceeds the queue's own
    /// concurrency bound. Returns the new flag value when it changed.
    pub(crate) fn recompute_backpressure(&mut self) -> Option<bool> {
        let should_suspend = self.executing.len() > self.queue.max_concurrent();
        if self.queue.set_suspended(should_suspend) {
            Some(should_suspend)
        } else {
            None
        }
    }

    /// Clone the counters with current gauge values filled in
    pub(crate) fn snapshot_stats(&self) -> PipelineStats {
        let mut stats = self.stats.clone();
        stats.tracked_count = self.tasks.len() as u64;
        stats.executing_count = self.executing.len() as u64;
        stats.preheat_pending_count = self.queue.pending_count() as u64;
        stats.preheat_active_count = self.queue.active_count() as u64;
        stats.preheat_suspended = self.queue.is_suspended();
        stats
    }
}
