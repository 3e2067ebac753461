//! Loader facade, the pipeline's only door to real work
//!
//! The pipeline does no I/O of its own. Cache probes and asynchronous loads
//! go through a [`Loader`] implementation, which reports back through the
//! [`LoadHandle`] it receives with each load. The handle encodes the
//! reporting contract in its types: progress can be reported many times, a
//! terminal report consumes the handle.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::app::models::{ImageRequest, ImageResponse, LoadOutput, RequestKey};
use crate::app::pipeline::task::TaskShared;
use crate::app::pipeline::{PipelineInner, TaskId, TaskProgress};
use crate::errors::{LoadError, LoaderCause};

/// Cache lookup and asynchronous loading, implemented by the embedder
///
/// All methods are synchronous entry points. `start_load` must hand the work
/// off to the loader's own execution resources and return promptly; the
/// pipeline calls it with internal state already settled, from whatever
/// context resumed the task.
pub trait Loader: Send + Sync {
    /// Probe the in-memory cache for a previously produced response
    ///
    /// Must be non-blocking. The pipeline calls this while holding its state
    /// lock, so implementations must not call back into the pipeline here.
    fn cached_response(&self, key: &RequestKey) -> Option<ImageResponse>;

    /// Begin asynchronous work for a load
    ///
    /// The loader must eventually call [`LoadHandle::succeed`] or
    /// [`LoadHandle::fail`] unless [`stop_load`](Self::stop_load) arrives
    /// first. Reports for a task the pipeline has since finished are ignored,
    /// so a loader that races a stop signal stays harmless.
    fn start_load(&self, intent: LoadIntent);

    /// Best-effort signal to abandon the work for a task
    ///
    /// The task is already Cancelled when this runs; whether the underlying
    /// work physically stops is up to the loader. Unknown ids must be
    /// tolerated.
    fn stop_load(&self, id: TaskId);

    /// Release loader resources; no further reports will be honored
    fn invalidate(&self);

    /// Drop cached responses, both in memory and in any persistent store
    fn clear_cache(&self);
}

/// One load, as handed to [`Loader::start_load`]
pub struct LoadIntent {
    /// The request to satisfy
    pub request: ImageRequest,
    /// Reporting channel back into the pipeline for this task
    pub handle: LoadHandle,
}

impl LoadIntent {
    /// Identity of the task driving this load
    pub fn task_id(&self) -> TaskId {
        self.handle.task_id()
    }
}

impl fmt::Debug for LoadIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadIntent")
            .field("task", &self.task_id())
            .field("resource", &self.request.resource.as_str())
            .finish()
    }
}

/// Reporting handle for one load
///
/// Progress reports take `&self` and may repeat; `succeed` and `fail` take
/// the handle by value so a loader cannot report two outcomes for the same
/// load. Reports arriving after the task reached a terminal state through
/// another path (cancellation, invalidation) are silently dropped.
pub struct LoadHandle {
    shared: Arc<TaskShared>,
    pipeline: Weak<PipelineInner>,
}

impl LoadHandle {
    pub(crate) fn new(shared: Arc<TaskShared>, pipeline: Weak<PipelineInner>) -> Self {
        Self { shared, pipeline }
    }

    /// Identity of the task this handle reports for
    pub fn task_id(&self) -> TaskId {
        self.shared.id
    }

    /// Check if the task already reached a terminal state
    ///
    /// Loaders may poll this to stop producing work early after a
    /// cancellation they have not yet observed through `stop_load`.
    pub fn is_finished(&self) -> bool {
        self.shared.outcome().is_some() || self.pipeline.upgrade().is_none()
    }

    /// Report work units for a still-running load
    ///
    /// No state transition and no completion delivery happens here; reports
    /// after the terminal transition are dropped.
    pub fn progress(&self, completed_units: u64, total_units: u64) {
        if self.shared.outcome().is_some() {
            return;
        }
        self.shared.set_progress(TaskProgress {
            completed_units,
            total_units,
        });
    }

    /// Report a produced artifact, driving the task to Completed
    pub fn succeed(self, output: LoadOutput) {
        if let Some(inner) = self.pipeline.upgrade() {
            inner.finish_task(&self.shared, Ok(output));
        }
    }

    /// Report a failure, driving the task to Completed with a failure response
    ///
    /// A missing cause is recorded as an unknown loader failure.
    pub fn fail(self, cause: Option<LoaderCause>) {
        if let Some(inner) = self.pipeline.upgrade() {
            inner.finish_task(&self.shared, Err(LoadError::from_loader(cause)));
        }
    }
}

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("task", &self.shared.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    use crate::app::models::Artifact;
    use crate::app::pipeline::TaskState;

    fn create_test_handle() -> LoadHandle {
        let url = Url::parse("https://images.example.com/handle.jpg").unwrap();
        let shared = Arc::new(TaskShared::new(TaskId::new(9), ImageRequest::new(url)));
        LoadHandle::new(shared, Weak::new())
    }

    #[test]
    fn test_progress_updates_until_terminal() {
        let handle = create_test_handle();
        handle.progress(1, 4);
        assert_eq!(handle.shared.progress().completed_units, 1);

        handle
            .shared
            .publish_outcome(TaskState::Cancelled, Err(LoadError::Cancelled));
        handle.progress(4, 4);

        // Report after the terminal transition is dropped
        assert_eq!(handle.shared.progress().completed_units, 1);
        assert!(handle.is_finished());
    }

    #[test]
    fn test_reports_without_pipeline_are_noops() {
        let handle = create_test_handle();
        assert!(handle.is_finished());
        handle.fail(None);

        let handle = create_test_handle();
        handle.succeed(LoadOutput::new(Artifact::new(vec![0u8; 8], 2, 2)));
    }
}
