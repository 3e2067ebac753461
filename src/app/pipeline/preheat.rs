//! Bounded background prefetch queue
//!
//! Holds preheat tasks that have been admitted but not yet started. The queue
//! enforces its own concurrency bound and a suspension flag driven by the
//! pipeline's foreground-priority policy. It stores task ids only; all state
//! lives in the pipeline's task storage, and every method here is called with
//! the pipeline lock held.

use std::collections::{HashSet, VecDeque};

use super::task::TaskId;

/// FIFO queue of pending preheat tasks with an active-count bound
#[derive(Debug)]
pub(crate) struct PreheatQueue {
    /// Admitted tasks waiting to start, oldest first
    pending: VecDeque<TaskId>,
    /// Preheat tasks currently running
    active: HashSet<TaskId>,
    /// While set, no pending task starts regardless of capacity
    suspended: bool,
    max_concurrent: usize,
}

impl PreheatQueue {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            active: HashSet::new(),
            suspended: false,
            max_concurrent,
        }
    }

    /// Admit a task to the back of the pending queue
    pub(crate) fn enqueue(&mut self, id: TaskId) {
        self.pending.push_back(id);
    }

    /// Check whether a pending task may start right now
    pub(crate) fn can_start(&self) -> bool {
        !self.suspended && self.active.len() < self.max_concurrent
    }

    /// Pop the oldest pending task if capacity allows
    ///
    /// The caller is responsible for re-validating the task's state and for
    /// calling [`mark_active`](Self::mark_active) once it actually starts.
    pub(crate) fn pop_candidate(&mut self) -> Option<TaskId> {
        if self.can_start() {
            self.pending.pop_front()
        } else {
            None
        }
    }

    /// Record that a popped candidate has started running
    pub(crate) fn mark_active(&mut self, id: TaskId) {
        self.active.insert(id);
    }

    /// Forget a task that reached a terminal state, wherever it was
    pub(crate) fn on_terminal(&mut self, id: TaskId) {
        if !self.active.remove(&id) {
            self.pending.retain(|pending| *pending != id);
        }
    }

    /// Set the suspension flag; returns true when the value changed
    pub(crate) fn set_suspended(&mut self, suspended: bool) -> bool {
        if self.suspended == suspended {
            false
        } else {
            self.suspended = suspended;
            true
        }
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
