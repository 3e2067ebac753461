//! Task state machine and caller-facing handles
//!
//! A task is tracked by the pipeline in id-keyed storage while non-terminal;
//! callers hold a cheap cloneable [`TaskHandle`]. Terminal outcomes are
//! published into a write-once cell on the shared allocation so a handle can
//! read the final state and response long after the pipeline has stopped
//! tracking the task.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::app::dispatch::Completion;
use crate::app::models::{ImageRequest, RequestKey, Response};
use crate::errors::LoadError;

use super::core::PipelineInner;

/// Unique identity of a task within its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value, for correlation in loader implementations
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created but not yet started
    Suspended,
    /// Handed to the loader (or mid cache probe)
    Running,
    /// Finished with a response
    Completed,
    /// Cancelled before a response was produced
    Cancelled,
}

impl TaskState {
    /// Check whether a transition to `to` is legal from this state
    ///
    /// Anything not listed here is rejected before any mutation, so an
    /// illegal request has zero side effects.
    pub fn can_advance(self, to: TaskState) -> bool {
        matches!(
            (self, to),
            (TaskState::Suspended, TaskState::Running)
                | (TaskState::Suspended, TaskState::Cancelled)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Cancelled)
        )
    }

    /// Check if this state is a sink (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }

    /// Check if this state is Suspended
    pub fn is_suspended(&self) -> bool {
        matches!(self, TaskState::Suspended)
    }

    /// Check if this state is Running
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Suspended => "suspended",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Work units reported by the loader while a task is Running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskProgress {
    /// Units completed so far
    pub completed_units: u64,
    /// Expected total units, 0 when the loader does not know
    pub total_units: u64,
}

impl TaskProgress {
    /// Completed fraction in `0.0..=1.0`, or `None` when the total is unknown
    pub fn fraction(&self) -> Option<f64> {
        if self.total_units == 0 {
            None
        } else {
            Some((self.completed_units as f64 / self.total_units as f64).min(1.0))
        }
    }
}

/// Terminal snapshot published exactly once per task
#[derive(Debug, Clone)]
pub(crate) struct TaskOutcome {
    /// The sink state the task ended in
    pub(crate) state: TaskState,
    /// The final response delivered to completions
    pub(crate) response: Response,
}

/// State shared between the pipeline's record and every handle
///
/// The pipeline's mutex guards tracked state, response, and completions; the
/// outcome cell and the progress cell live here so handles can read them
/// without that lock, including after tracking ends.
pub(crate) struct TaskShared {
    pub(crate) id: TaskId,
    pub(crate) request: ImageRequest,
    pub(crate) key: RequestKey,
    outcome: OnceLock<TaskOutcome>,
    progress: Mutex<TaskProgress>,
}

impl TaskShared {
    pub(crate) fn new(id: TaskId, request: ImageRequest) -> Self {
        let key = request.key();
        Self {
            id,
            request,
            key,
            outcome: OnceLock::new(),
            progress: Mutex::new(TaskProgress::default()),
        }
    }

    /// Publish the terminal outcome; returns false if one was already set
    pub(crate) fn publish_outcome(&self, state: TaskState, response: Response) -> bool {
        self.outcome.set(TaskOutcome { state, response }).is_ok()
    }

    pub(crate) fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.get()
    }

    pub(crate) fn set_progress(&self, progress: TaskProgress) {
        *self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = progress;
    }

    pub(crate) fn progress(&self) -> TaskProgress {
        *self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TaskShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskShared")
            .field("id", &self.id)
            .field("key", &self.key.to_string())
            .field("terminal", &self.outcome.get().map(|o| o.state))
            .finish()
    }
}

/// Pipeline-owned record for a tracked task
///
/// Lives in the orchestrator's id-keyed storage and is only touched while
/// the pipeline lock is held. Removed from storage on terminal transition.
pub(crate) struct TaskRecord {
    pub(crate) shared: Arc<TaskShared>,
    pub(crate) state: TaskState,
    pub(crate) completions: Vec<Completion>,
    pub(crate) created_at: DateTime<Utc>,
}

impl TaskRecord {
    pub(crate) fn new(shared: Arc<TaskShared>) -> Self {
        Self {
            shared,
            state: TaskState::Suspended,
            completions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Advance the state if the transition is legal; no side effects here
    pub(crate) fn advance(&mut self, to: TaskState) -> bool {
        if self.state.can_advance(to) {
            self.state = to;
            true
        } else {
            false
        }
    }

    /// Capture the registered completions, leaving the record empty
    pub(crate) fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    /// Milliseconds since the task was created, for terminal logging
    pub(crate) fn age_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.created_at)
            .num_milliseconds()
    }
}

/// Caller-facing handle to a task
///
/// Cloning is cheap and every clone addresses the same task. All mutating
/// methods are safe to call from any context at any time: attempts that are
/// illegal for the current state, or that arrive after the pipeline was
/// invalidated, do nothing.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) shared: Arc<TaskShared>,
    pub(crate) pipeline: Weak<PipelineInner>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Arc<TaskShared>, pipeline: Weak<PipelineInner>) -> Self {
        Self { shared, pipeline }
    }

    /// Identity of this task within its pipeline
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// The request this task was created for
    pub fn request(&self) -> &ImageRequest {
        &self.shared.request
    }

    /// The request's canonical identity
    pub fn key(&self) -> &RequestKey {
        &self.shared.key
    }

    /// Current lifecycle state
    ///
    /// Terminal states are read from the published outcome; while tracked,
    /// the pipeline is consulted. A handle whose pipeline is gone and whose
    /// task never ran reports Suspended, which is what it will stay forever.
    pub fn state(&self) -> TaskState {
        if let Some(outcome) = self.shared.outcome() {
            return outcome.state;
        }
        match self.pipeline.upgrade() {
            Some(inner) => inner.task_state(&self.shared),
            None => TaskState::Suspended,
        }
    }

    /// Final response; `None` until the task reaches a terminal state
    pub fn response(&self) -> Option<Response> {
        self.shared.outcome().map(|outcome| outcome.response.clone())
    }

    /// Latest loader-reported progress
    pub fn progress(&self) -> TaskProgress {
        self.shared.progress()
    }

    /// Start the task (Suspended → Running)
    ///
    /// Illegal from any other state; returns the handle for chaining either
    /// way. Use [`Pipeline::resume`] to observe whether the transition was
    /// accepted.
    ///
    /// [`Pipeline::resume`]: super::core::Pipeline::resume
    pub fn resume(&self) -> &Self {
        if let Some(inner) = self.pipeline.upgrade() {
            inner.resume_task(&self.shared);
        }
        self
    }

    /// Cancel the task from Suspended or Running
    pub fn cancel(&self) -> &Self {
        if let Some(inner) = self.pipeline.upgrade() {
            inner.cancel_task(&self.shared);
        }
        self
    }

    /// Register a completion callback
    ///
    /// Fires exactly once with the final response; on an already-terminal
    /// task the stored response is delivered immediately via the dispatcher.
    pub fn add_completion(&self, completion: impl FnOnce(Response) + Send + 'static) -> &Self {
        if let Some(inner) = self.pipeline.upgrade() {
            inner.add_completion(&self.shared, Box::new(completion));
        }
        self
    }

    /// Await the final response
    ///
    /// Resolves immediately on terminal tasks. Resolves with a cancellation
    /// failure when the pipeline is invalidated or dropped before the task
    /// finishes.
    pub async fn wait(&self) -> Response {
        if let Some(outcome) = self.shared.outcome() {
            return outcome.response.clone();
        }

        let (tx, rx) = oneshot::channel();
        let registered = match self.pipeline.upgrade() {
            Some(inner) => inner.add_completion(
                &self.shared,
                Box::new(move |response| {
                    let _ = tx.send(response);
                }),
            ),
            None => false,
        };

        if !registered {
            return Err(LoadError::Cancelled);
        }

        match rx.await {
            Ok(response) => response,
            Err(_) => Err(LoadError::Cancelled),
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}
