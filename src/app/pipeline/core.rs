//! Task orchestration for the image pipeline
//!
//! The [`Pipeline`] owns all mutable task state behind a single mutex.
//! Every operation follows the same shape: take the lock, validate the
//! transition, mutate state and collect side effects, release the lock, run
//! the effects. Loader calls and completion delivery therefore never happen
//! inside the critical section, and completion callbacks are free to call
//! straight back into the pipeline.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use tracing::{debug, info};

use crate::app::dispatch::{AffinityContext, AffinityThread, Completion, CompletionDispatcher};
use crate::app::loader::{LoadHandle, LoadIntent, Loader};
use crate::app::models::{ImageRequest, ImageResponse, LoadOutput, Response};
use crate::constants::pipeline::LOCK_CONTENTION_THRESHOLD;
use crate::errors::{LoadError, LoadResult, PipelineError, PipelineResult};

use super::config::PipelineConfig;
use super::state::PipelineState;
use super::stats::PipelineStats;
use super::task::{TaskHandle, TaskId, TaskRecord, TaskShared, TaskState};

/// Side effect computed under the lock, executed after it is released
enum Effect {
    /// Hand a load to the external loader
    StartLoad(LoadIntent),
    /// Tell the loader to abandon a task's work, best effort
    StopLoad(TaskId),
    /// Deliver captured completions with the final response
    Deliver {
        task: TaskId,
        completions: Vec<Completion>,
        response: Response,
    },
    /// Re-examine the preheat queue for startable tasks
    Pump,
}

/// What a resume attempt did
enum ResumeOutcome {
    /// Transition was illegal or the pipeline is invalidated
    Rejected,
    /// Satisfied synchronously from cache, task is already Completed
    FastPath,
    /// Handed to the loader, task is Running
    Loading,
}

/// Shared handle to the image loading pipeline
///
/// Cloning is cheap; all clones drive the same pipeline. Operations are
/// callable from any thread, including from completion callbacks. Attempts
/// that are illegal for a task's current state, or that arrive after
/// [`invalidate_and_cancel`](Self::invalidate_and_cancel), do nothing and
/// report `false` where a return value exists.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Create a pipeline with default configuration
    pub fn new(loader: Arc<dyn Loader>, context: Arc<dyn AffinityContext>) -> Self {
        Self::from_parts(PipelineConfig::new(), loader, context)
    }

    /// Create a pipeline with a custom configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn with_config(
        config: PipelineConfig,
        loader: Arc<dyn Loader>,
        context: Arc<dyn AffinityContext>,
    ) -> PipelineResult<Self> {
        config
            .validate()
            .map_err(|reason| PipelineError::InvalidConfiguration { reason })?;
        Ok(Self::from_parts(config, loader, context))
    }

    /// Start building a pipeline
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    fn from_parts(
        config: PipelineConfig,
        loader: Arc<dyn Loader>,
        context: Arc<dyn AffinityContext>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<PipelineInner>| PipelineInner {
            state: Mutex::new(PipelineState::new(&config)),
            loader,
            dispatcher: CompletionDispatcher::new(context),
            config,
            self_ref: weak.clone(),
        });
        info!(
            "pipeline created, preheat concurrency {}",
            inner.config.preheat_concurrency
        );
        Self { inner }
    }

    /// Create a new Suspended task for `request`
    ///
    /// Always succeeds and has no side effects beyond allocation. Tasks
    /// created after invalidation are inert: every operation on them is a
    /// no-op.
    pub fn create_task(&self, request: ImageRequest) -> TaskHandle {
        self.inner.create_task(request)
    }

    /// Start a task (Suspended → Running)
    ///
    /// Probes the cache first: on a hit the task completes synchronously with
    /// a fast-path response before this method returns, and the loader is
    /// never involved. Returns whether the transition was accepted; a task
    /// that is already running, already terminal, or belongs to another
    /// pipeline is left untouched.
    pub fn resume(&self, task: &TaskHandle) -> bool {
        self.owns(task) && self.inner.resume_task(&task.shared)
    }

    /// Cancel a task from Suspended or Running
    ///
    /// A running task's loader work is signalled to stop, best effort.
    /// Completions fire with a cancellation failure. Returns whether the
    /// transition was accepted.
    pub fn cancel(&self, task: &TaskHandle) -> bool {
        self.owns(task) && self.inner.cancel_task(&task.shared)
    }

    /// Register a completion callback on a task
    ///
    /// Fires exactly once with the final response, in registration order
    /// relative to other completions on the same task. On an already-terminal
    /// task the stored response is delivered immediately. Returns false when
    /// the callback was dropped instead (pipeline invalidated, or the task is
    /// not one of ours).
    pub fn add_completion(
        &self,
        task: &TaskHandle,
        completion: impl FnOnce(Response) + Send + 'static,
    ) -> bool {
        self.owns(task) && self.inner.add_completion(&task.shared, Box::new(completion))
    }

    /// Admit background prefetch tasks for `requests`
    ///
    /// Requests whose key matches an in-flight preheat task are skipped. The
    /// rest are queued and started by the pipeline as capacity allows, at
    /// most the configured bound at a time and never while foreground demand
    /// exceeds that bound.
    pub fn start_preheating(&self, requests: impl IntoIterator<Item = ImageRequest>) {
        self.inner.start_preheating(requests.into_iter().collect());
    }

    /// Cancel the in-flight preheat tasks matching `requests`
    ///
    /// Requests with no matching preheat task are ignored.
    pub fn stop_preheating(&self, requests: impl IntoIterator<Item = ImageRequest>) {
        self.inner.stop_preheating(requests.into_iter().collect());
    }

    /// Cancel every tracked preheat task
    pub fn stop_all_preheating(&self) {
        self.inner.stop_all_preheating();
    }

    /// Permanently shut the pipeline down
    ///
    /// Cancels every tracked task, flushes their completions with a
    /// cancellation failure, releases the loader, and makes every further
    /// mutating operation a silent no-op. One way; there is no inverse.
    pub fn invalidate_and_cancel(&self) {
        self.inner.invalidate_and_cancel();
    }

    /// Drop every cached response, in memory and in persistent storage
    pub fn remove_all_cached_artifacts(&self) {
        self.inner.remove_all_cached_artifacts();
    }

    /// Snapshot of pipeline statistics
    pub fn stats(&self) -> PipelineStats {
        self.inner.lock_state().snapshot_stats()
    }

    /// The configuration this pipeline runs with
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Check whether the pipeline has been invalidated
    pub fn is_invalidated(&self) -> bool {
        self.inner.lock_state().invalidated
    }

    fn owns(&self, task: &TaskHandle) -> bool {
        std::ptr::eq(task.pipeline.as_ptr(), Arc::as_ptr(&self.inner))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.inner.config)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

/// Builder for assembling a pipeline from its components
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    loader: Option<Arc<dyn Loader>>,
    context: Option<Arc<dyn AffinityContext>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            config: None,
            loader: None,
            context: None,
        }
    }

    /// Set the pipeline configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the loader facade
    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the completion delivery context
    ///
    /// Defaults to a dedicated [`AffinityThread`] when not provided.
    pub fn context(mut self, context: Arc<dyn AffinityContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Build the pipeline
    ///
    /// # Errors
    ///
    /// Returns an error if no loader was provided or the configuration fails
    /// validation.
    pub fn build(self) -> PipelineResult<Pipeline> {
        let loader = self.loader.ok_or_else(|| PipelineError::MissingComponent {
            component: "loader".to_string(),
        })?;
        let context = self
            .context
            .unwrap_or_else(|| Arc::new(AffinityThread::new()));
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|reason| PipelineError::InvalidConfiguration { reason })?;
        Ok(Pipeline::from_parts(config, loader, context))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The orchestrator behind every [`Pipeline`] clone and task handle
pub(crate) struct PipelineInner {
    state: Mutex<PipelineState>,
    loader: Arc<dyn Loader>,
    dispatcher: CompletionDispatcher,
    config: PipelineConfig,
    self_ref: Weak<PipelineInner>,
}

impl PipelineInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        let start = Instant::now();
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let waited = start.elapsed();
        if waited > LOCK_CONTENTION_THRESHOLD {
            debug!("pipeline lock acquired after {:?}", waited);
        }
        guard
    }

    pub(crate) fn create_task(&self, request: ImageRequest) -> TaskHandle {
        let mut state = self.lock_state();
        if state.invalidated {
            drop(state);
            // Inert handle: never tracked, id 0 is never allocated
            let shared = Arc::new(TaskShared::new(TaskId::new(0), request));
            return TaskHandle::new(shared, Weak::new());
        }

        let id = state.allocate_id();
        let shared = Arc::new(TaskShared::new(id, request));
        state.insert_task(TaskRecord::new(Arc::clone(&shared)));
        debug!("{}: created for {}", id, shared.key);
        TaskHandle::new(shared, self.self_ref.clone())
    }

    pub(crate) fn resume_task(&self, shared: &Arc<TaskShared>) -> bool {
        let mut effects = Vec::new();
        let outcome = {
            let mut state = self.lock_state();
            self.resume_locked(&mut state, shared, &mut effects)
        };
        self.drive(effects);
        !matches!(outcome, ResumeOutcome::Rejected)
    }

    pub(crate) fn cancel_task(&self, shared: &Arc<TaskShared>) -> bool {
        let mut effects = Vec::new();
        let accepted = {
            let mut state = self.lock_state();
            if state.invalidated {
                false
            } else {
                conclude_locked(
                    &mut state,
                    shared,
                    TaskState::Cancelled,
                    Err(LoadError::Cancelled),
                    &mut effects,
                )
            }
        };
        self.drive(effects);
        accepted
    }

    /// Loader-reported terminal outcome for a task
    ///
    /// Both success and loader failure drive the Completed transition; the
    /// failure travels in the response. Reports for tasks that are no longer
    /// tracked, or that arrive after invalidation, are dropped.
    pub(crate) fn finish_task(&self, shared: &Arc<TaskShared>, result: LoadResult<LoadOutput>) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            if !state.invalidated {
                let response = result.map(ImageResponse::from_output);
                conclude_locked(
                    &mut state,
                    shared,
                    TaskState::Completed,
                    response,
                    &mut effects,
                );
            }
        }
        self.drive(effects);
    }

    pub(crate) fn add_completion(&self, shared: &Arc<TaskShared>, completion: Completion) -> bool {
        let mut effects = Vec::new();
        let accepted = {
            let mut state = self.lock_state();
            if state.invalidated {
                false
            } else if let Some(record) = state.tasks.get_mut(&shared.id) {
                record.completions.push(completion);
                true
            } else if let Some(outcome) = shared.outcome() {
                // Already terminal: immediate delivery, nothing is appended
                effects.push(Effect::Deliver {
                    task: shared.id,
                    completions: vec![completion],
                    response: outcome.response.clone(),
                });
                true
            } else {
                false
            }
        };
        self.drive(effects);
        accepted
    }

    pub(crate) fn task_state(&self, shared: &Arc<TaskShared>) -> TaskState {
        let state = self.lock_state();
        state
            .tasks
            .get(&shared.id)
            .map(|record| record.state)
            .or_else(|| shared.outcome().map(|outcome| outcome.state))
            .unwrap_or(TaskState::Suspended)
    }

    pub(crate) fn start_preheating(&self, requests: Vec<ImageRequest>) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            if state.invalidated {
                return;
            }

            let mut admitted = 0usize;
            for request in requests {
                let key = request.key();
                if state.preheating.contains_key(&key) {
                    state.stats.preheat_deduplicated += 1;
                    debug!("preheat duplicate for {}, skipping", key);
                    continue;
                }

                let id = state.allocate_id();
                let shared = Arc::new(TaskShared::new(id, request));
                state.insert_task(TaskRecord::new(Arc::clone(&shared)));
                state.preheating.insert(key, id);
                state.queue.enqueue(id);
                state.stats.preheat_admitted += 1;
                admitted += 1;
            }

            if admitted > 0 {
                debug!("admitted {} preheat task(s)", admitted);
                effects.push(Effect::Pump);
            }
        }
        self.drive(effects);
    }

    pub(crate) fn stop_preheating(&self, requests: Vec<ImageRequest>) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            if state.invalidated {
                return;
            }

            for request in requests {
                let key = request.key();
                let Some(id) = state.preheating.get(&key).copied() else {
                    continue;
                };
                if let Some(record) = state.tasks.get(&id) {
                    let shared = Arc::clone(&record.shared);
                    conclude_locked(
                        &mut state,
                        &shared,
                        TaskState::Cancelled,
                        Err(LoadError::Cancelled),
                        &mut effects,
                    );
                }
            }
        }
        self.drive(effects);
    }

    pub(crate) fn stop_all_preheating(&self) {
        let mut effects = Vec::new();
        {
            let mut state = self.lock_state();
            if state.invalidated {
                return;
            }

            let ids: Vec<TaskId> = state.preheating.values().copied().collect();
            for id in ids {
                if let Some(record) = state.tasks.get(&id) {
                    let shared = Arc::clone(&record.shared);
                    conclude_locked(
                        &mut state,
                        &shared,
                        TaskState::Cancelled,
                        Err(LoadError::Cancelled),
                        &mut effects,
                    );
                }
            }
        }
        self.drive(effects);
    }

    pub(crate) fn invalidate_and_cancel(&self) {
        let mut effects = Vec::new();
        let cancelled = {
            let mut state = self.lock_state();
            if state.invalidated {
                return;
            }

            let shareds: Vec<Arc<TaskShared>> = state
                .tasks
                .values()
                .map(|record| Arc::clone(&record.shared))
                .collect();
            for shared in &shareds {
                conclude_locked(
                    &mut state,
                    shared,
                    TaskState::Cancelled,
                    Err(LoadError::Cancelled),
                    &mut effects,
                );
            }
            state.invalidated = true;
            shareds.len()
        };

        self.drive(effects);
        self.loader.invalidate();
        info!("pipeline invalidated, {} task(s) cancelled", cancelled);
    }

    pub(crate) fn remove_all_cached_artifacts(&self) {
        let invalidated = self.lock_state().invalidated;
        if invalidated {
            return;
        }
        self.loader.clear_cache();
    }

    /// Attempt Suspended → Running, taking the cache fast path when possible
    fn resume_locked(
        &self,
        state: &mut PipelineState,
        shared: &Arc<TaskShared>,
        effects: &mut Vec<Effect>,
    ) -> ResumeOutcome {
        if state.invalidated {
            return ResumeOutcome::Rejected;
        }
        match state.tasks.get_mut(&shared.id) {
            Some(record) => {
                if !record.advance(TaskState::Running) {
                    return ResumeOutcome::Rejected;
                }
            }
            None => return ResumeOutcome::Rejected,
        }

        // Cache probe happens under the lock; the loader contract keeps it
        // non-blocking. A hit completes the task within this same lock hold,
        // so a racing cancel can never slip in between.
        if let Some(cached) = self.loader.cached_response(&shared.key) {
            state.stats.fast_path_hits += 1;
            debug!("{}: completed from cache", shared.id);
            conclude_locked(
                state,
                shared,
                TaskState::Completed,
                Ok(cached.into_fast_path()),
                effects,
            );
            return ResumeOutcome::FastPath;
        }

        state.executing.insert(shared.id);
        state.stats.loads_started += 1;
        log_backpressure(state.recompute_backpressure());
        effects.push(Effect::StartLoad(LoadIntent {
            request: shared.request.clone(),
            handle: LoadHandle::new(Arc::clone(shared), self.self_ref.clone()),
        }));
        ResumeOutcome::Loading
    }

    /// Start as many pending preheat tasks as bounds allow
    fn pump(&self) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut state = self.lock_state();
        if state.invalidated {
            return effects;
        }

        while let Some(id) = state.queue.pop_candidate() {
            let shared = match state.tasks.get(&id) {
                Some(record) if record.state.is_suspended() => Arc::clone(&record.shared),
                // Cancelled or already driven through another path
                _ => continue,
            };
            match self.resume_locked(&mut state, &shared, &mut effects) {
                ResumeOutcome::Loading => state.queue.mark_active(id),
                ResumeOutcome::FastPath | ResumeOutcome::Rejected => {}
            }
        }
        effects
    }

    /// Run collected effects, none of which may hold the state lock
    fn drive(&self, mut effects: Vec<Effect>) {
        while !effects.is_empty() {
            let mut followups = Vec::new();
            for effect in effects {
                match effect {
                    Effect::StartLoad(intent) => {
                        debug!("{}: handing load to the loader", intent.task_id());
                        self.loader.start_load(intent);
                    }
                    Effect::StopLoad(id) => {
                        debug!("{}: signalling loader to stop", id);
                        self.loader.stop_load(id);
                    }
                    Effect::Deliver {
                        task,
                        completions,
                        response,
                    } => self.dispatcher.deliver(task, completions, response),
                    Effect::Pump => followups.extend(self.pump()),
                }
            }
            effects = followups;
        }
    }
}

/// Drive a tracked task into a terminal state
///
/// The single place a task leaves tracking: checks transition legality,
/// publishes the outcome, captures completions for out-of-lock delivery,
/// clears every tracking collection, and re-derives the suspension policy.
/// Returns false when the transition was illegal, with zero side effects.
fn conclude_locked(
    state: &mut PipelineState,
    shared: &Arc<TaskShared>,
    to: TaskState,
    response: Response,
    effects: &mut Vec<Effect>,
) -> bool {
    let (previous, completions, age_ms) = match state.tasks.get_mut(&shared.id) {
        Some(record) => {
            let previous = record.state;
            if !record.advance(to) {
                return false;
            }
            (previous, record.take_completions(), record.age_ms())
        }
        None => return false,
    };

    // Stop signal precedes completion delivery for cancelled in-flight work
    if to == TaskState::Cancelled && previous.is_running() {
        effects.push(Effect::StopLoad(shared.id));
    }

    shared.publish_outcome(to, response.clone());
    state.tasks.remove(&shared.id);
    state.forget_task(shared.id, &shared.key);
    log_backpressure(state.recompute_backpressure());

    match to {
        TaskState::Completed => state.stats.tasks_completed += 1,
        TaskState::Cancelled => state.stats.tasks_cancelled += 1,
        TaskState::Suspended | TaskState::Running => {}
    }
    debug!("{}: {} after {} ms", shared.id, to, age_ms);

    effects.push(Effect::Deliver {
        task: shared.id,
        completions,
        response,
    });
    effects.push(Effect::Pump);
    true
}

fn log_backpressure(change: Option<bool>) {
    match change {
        Some(true) => debug!("preheating suspended, foreground demand exceeds the bound"),
        Some(false) => debug!("preheating resumed"),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use url::Url;

    use crate::app::dispatch::ContextJob;
    use crate::app::models::{Artifact, RequestKey};

    /// Loader that records calls and lets tests finish loads by hand
    struct FakeLoader {
        cache: Mutex<HashMap<RequestKey, ImageResponse>>,
        started: Mutex<Vec<LoadIntent>>,
        stopped: Mutex<Vec<TaskId>>,
        invalidated: AtomicBool,
        cache_cleared: AtomicBool,
    }

    impl FakeLoader {
        fn new() -> Self {
            Self {
                cache: Mutex::new(HashMap::new()),
                started: Mutex::new(Vec::new()),
                stopped: Mutex::new(Vec::new()),
                invalidated: AtomicBool::new(false),
                cache_cleared: AtomicBool::new(false),
            }
        }

        fn preload(&self, request: &ImageRequest) {
            let response = ImageResponse::from_output(test_output());
            self.cache.lock().unwrap().insert(request.key(), response);
        }

        fn take_started(&self) -> Vec<LoadIntent> {
            self.started.lock().unwrap().drain(..).collect()
        }

        fn stopped_ids(&self) -> Vec<TaskId> {
            self.stopped.lock().unwrap().clone()
        }
    }

    impl Loader for FakeLoader {
        fn cached_response(&self, key: &RequestKey) -> Option<ImageResponse> {
            self.cache.lock().unwrap().get(key).cloned()
        }

        fn start_load(&self, intent: LoadIntent) {
            self.started.lock().unwrap().push(intent);
        }

        fn stop_load(&self, id: TaskId) {
            self.stopped.lock().unwrap().push(id);
        }

        fn invalidate(&self) {
            self.invalidated.store(true, Ordering::SeqCst);
        }

        fn clear_cache(&self) {
            self.cache_cleared.store(true, Ordering::SeqCst);
            self.cache.lock().unwrap().clear();
        }
    }

    /// Context that claims to always be current, so delivery runs inline
    struct InlineContext;

    impl AffinityContext for InlineContext {
        fn is_current(&self) -> bool {
            true
        }

        fn post(&self, job: ContextJob) {
            job();
        }
    }

    fn create_test_pipeline() -> (Pipeline, Arc<FakeLoader>) {
        let loader = Arc::new(FakeLoader::new());
        let pipeline = Pipeline::builder()
            .config(PipelineConfig::for_testing())
            .loader(Arc::clone(&loader) as Arc<dyn Loader>)
            .context(Arc::new(InlineContext))
            .build()
            .unwrap();
        (pipeline, loader)
    }

    fn test_request(path: &str) -> ImageRequest {
        let url = Url::parse(&format!("https://images.example.com/{path}")).unwrap();
        ImageRequest::new(url)
    }

    fn test_output() -> LoadOutput {
        LoadOutput::new(Artifact::new(vec![1, 2, 3, 4], 2, 2))
    }

    #[test]
    fn test_resume_hands_load_to_loader() {
        let (pipeline, loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("a.jpg"));

        assert_eq!(task.state(), TaskState::Suspended);
        assert!(pipeline.resume(&task));
        assert_eq!(task.state(), TaskState::Running);

        let started = loader.take_started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].task_id(), task.id());
        assert_eq!(pipeline.stats().executing_count, 1);
    }

    #[test]
    fn test_resume_is_rejected_when_already_running() {
        let (pipeline, _loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("a.jpg"));

        assert!(pipeline.resume(&task));
        assert!(!pipeline.resume(&task));
        assert_eq!(pipeline.stats().loads_started, 1);
    }

    #[test]
    fn test_fast_path_completes_before_resume_returns() {
        let (pipeline, loader) = create_test_pipeline();
        let request = test_request("cached.jpg");
        loader.preload(&request);

        let task = pipeline.create_task(request);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        task.add_completion(move |response| {
            sink.lock().unwrap().push(response);
        });

        assert!(pipeline.resume(&task));
        assert_eq!(task.state(), TaskState::Completed);

        // No loader handoff and no executing-count change
        assert!(loader.take_started().is_empty());
        let stats = pipeline.stats();
        assert_eq!(stats.executing_count, 0);
        assert_eq!(stats.fast_path_hits, 1);

        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].as_ref().unwrap().is_fast_path());
    }

    #[test]
    fn test_loader_completion_drives_completed() {
        let (pipeline, loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("b.jpg"));
        pipeline.resume(&task);

        let intent = loader.take_started().pop().unwrap();
        intent.handle.succeed(test_output());

        assert_eq!(task.state(), TaskState::Completed);
        let response = task.response().unwrap().unwrap();
        assert!(!response.is_fast_path());
        assert_eq!(pipeline.stats().executing_count, 0);
    }

    #[test]
    fn test_loader_failure_completes_with_failure_response() {
        let (pipeline, loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("c.jpg"));
        pipeline.resume(&task);

        let intent = loader.take_started().pop().unwrap();
        intent.handle.fail(None);

        assert_eq!(task.state(), TaskState::Completed);
        assert!(matches!(task.response(), Some(Err(LoadError::Unknown))));
    }

    #[test]
    fn test_cancel_suspended_skips_stop_hook() {
        let (pipeline, loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("d.jpg"));

        assert!(pipeline.cancel(&task));
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(matches!(task.response(), Some(Err(LoadError::Cancelled))));

        // Never started, so the loader is never told to stop
        assert!(loader.stopped_ids().is_empty());
    }

    #[test]
    fn test_cancel_running_stops_loader_exactly_once() {
        let (pipeline, loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("e.jpg"));
        pipeline.resume(&task);

        assert!(pipeline.cancel(&task));
        assert_eq!(loader.stopped_ids(), vec![task.id()]);

        // Double cancel is silently rejected
        assert!(!pipeline.cancel(&task));
        assert_eq!(loader.stopped_ids(), vec![task.id()]);
    }

    #[test]
    fn test_late_loader_report_never_overwrites_response() {
        let (pipeline, loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("f.jpg"));
        pipeline.resume(&task);
        let intent = loader.take_started().pop().unwrap();

        pipeline.cancel(&task);
        assert!(matches!(task.response(), Some(Err(LoadError::Cancelled))));

        // The loader raced the cancel and reports anyway
        intent.handle.succeed(test_output());
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(matches!(task.response(), Some(Err(LoadError::Cancelled))));
        assert_eq!(pipeline.stats().tasks_completed, 0);
    }

    #[test]
    fn test_completions_fire_once_in_registration_order() {
        let (pipeline, loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("g.jpg"));

        let order = Arc::new(Mutex::new(Vec::new()));
        for index in 0..2 {
            let order = Arc::clone(&order);
            task.add_completion(move |response| {
                assert!(response.is_ok());
                order.lock().unwrap().push(index);
            });
        }

        pipeline.resume(&task);
        loader.take_started().pop().unwrap().handle.succeed(test_output());

        assert_eq!(*order.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_add_completion_on_terminal_task_delivers_immediately() {
        let (pipeline, _loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("h.jpg"));
        pipeline.cancel(&task);

        let fired = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&fired);
        assert!(pipeline.add_completion(&task, move |response| {
            assert!(matches!(response, Err(LoadError::Cancelled)));
            *sink.lock().unwrap() += 1;
        }));
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn test_handles_from_another_pipeline_are_rejected() {
        let (pipeline, _loader) = create_test_pipeline();
        let (other, _other_loader) = create_test_pipeline();
        let foreign = other.create_task(test_request("i.jpg"));

        assert!(!pipeline.resume(&foreign));
        assert!(!pipeline.cancel(&foreign));
        assert_eq!(pipeline.stats().loads_started, 0);

        // Still usable on its own pipeline
        assert!(other.resume(&foreign));
    }

    #[test]
    fn test_preheating_dedups_by_request_key() {
        let (pipeline, loader) = create_test_pipeline();
        let request = test_request("j.jpg");

        pipeline.start_preheating(vec![request.clone(), request.clone()]);
        pipeline.start_preheating(vec![request.clone()]);

        let stats = pipeline.stats();
        assert_eq!(stats.preheat_admitted, 1);
        assert_eq!(stats.preheat_deduplicated, 2);
        assert_eq!(loader.take_started().len(), 1);
    }

    #[test]
    fn test_preheat_slot_reopens_after_completion() {
        let (pipeline, loader) = create_test_pipeline();
        let request = test_request("k.jpg");
        pipeline.start_preheating(vec![request.clone()]);

        loader.take_started().pop().unwrap().handle.succeed(test_output());
        assert_eq!(pipeline.stats().preheat_active_count, 0);

        // Same key is admissible again once the first preheat finished
        pipeline.start_preheating(vec![request]);
        assert_eq!(pipeline.stats().preheat_admitted, 2);
        assert_eq!(loader.take_started().len(), 1);
    }

    #[test]
    fn test_stop_all_preheating_cancels_tracked_tasks() {
        let (pipeline, loader) = create_test_pipeline();
        pipeline.start_preheating(vec![
            test_request("l1.jpg"),
            test_request("l2.jpg"),
            test_request("l3.jpg"),
        ]);

        // Bound of 2: two running, one still pending
        assert_eq!(pipeline.stats().preheat_active_count, 2);
        assert_eq!(pipeline.stats().preheat_pending_count, 1);

        pipeline.stop_all_preheating();
        let stats = pipeline.stats();
        assert_eq!(stats.preheat_active_count, 0);
        assert_eq!(stats.preheat_pending_count, 0);
        assert_eq!(stats.tasks_cancelled, 3);
        assert!(stats.is_idle());

        // The two in-flight loads were told to stop
        assert_eq!(loader.stopped_ids().len(), 2);
    }

    #[test]
    fn test_stop_preheating_targets_matching_requests_only() {
        let (pipeline, _loader) = create_test_pipeline();
        let keep = test_request("m1.jpg");
        let drop_me = test_request("m2.jpg");
        pipeline.start_preheating(vec![keep.clone(), drop_me.clone()]);

        pipeline.stop_preheating(vec![drop_me, test_request("never-preheated.jpg")]);

        let stats = pipeline.stats();
        assert_eq!(stats.tasks_cancelled, 1);
        assert_eq!(stats.preheat_active_count, 1);
    }

    #[test]
    fn test_foreground_demand_suspends_preheating() {
        let (pipeline, loader) = create_test_pipeline();

        // Three foreground loads exceed the bound of two
        let tasks: Vec<TaskHandle> = (0..3)
            .map(|index| {
                let task = pipeline.create_task(test_request(&format!("fg{index}.jpg")));
                pipeline.resume(&task);
                task
            })
            .collect();
        let mut running = loader.take_started();
        assert!(pipeline.stats().preheat_suspended);

        pipeline.start_preheating(vec![test_request("bg1.jpg"), test_request("bg2.jpg")]);
        assert_eq!(pipeline.stats().preheat_pending_count, 2);
        assert!(loader.take_started().is_empty());

        // Dropping back to the bound resumes the queue
        let finished = running.pop().unwrap();
        let finished_id = finished.task_id();
        finished.handle.succeed(test_output());

        let completed = tasks.iter().find(|task| task.id() == finished_id).unwrap();
        assert_eq!(completed.state(), TaskState::Completed);
        assert_eq!(pipeline.stats().preheat_active_count, 1);
        assert_eq!(loader.take_started().len(), 1);
    }

    #[test]
    fn test_invalidate_cancels_everything_and_goes_inert() {
        let (pipeline, loader) = create_test_pipeline();
        let running = pipeline.create_task(test_request("n1.jpg"));
        pipeline.resume(&running);
        let suspended = pipeline.create_task(test_request("n2.jpg"));
        pipeline.start_preheating(vec![test_request("n3.jpg")]);

        let fired = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&fired);
        running.add_completion(move |response| {
            assert!(matches!(response, Err(LoadError::Cancelled)));
            *sink.lock().unwrap() += 1;
        });

        pipeline.invalidate_and_cancel();

        assert!(pipeline.is_invalidated());
        assert!(loader.invalidated.load(Ordering::SeqCst));
        assert_eq!(running.state(), TaskState::Cancelled);
        assert_eq!(suspended.state(), TaskState::Cancelled);
        assert_eq!(*fired.lock().unwrap(), 1);
        assert!(pipeline.stats().is_idle());

        // Everything afterwards is a silent no-op
        let late = pipeline.create_task(test_request("n4.jpg"));
        assert!(!pipeline.resume(&late));
        assert!(!pipeline.cancel(&late));
        pipeline.start_preheating(vec![test_request("n5.jpg")]);
        assert!(loader.take_started().is_empty());
        assert_eq!(pipeline.stats().tasks_created, 3);

        let dropped = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&dropped);
        assert!(!pipeline.add_completion(&running, move |_| {
            *sink.lock().unwrap() += 1;
        }));
        assert_eq!(*dropped.lock().unwrap(), 0);

        // Second invalidation is a no-op as well
        pipeline.invalidate_and_cancel();
    }

    #[test]
    fn test_remove_all_cached_artifacts_forwards_until_invalidated() {
        let (pipeline, loader) = create_test_pipeline();
        pipeline.remove_all_cached_artifacts();
        assert!(loader.cache_cleared.load(Ordering::SeqCst));

        loader.cache_cleared.store(false, Ordering::SeqCst);
        pipeline.invalidate_and_cancel();
        pipeline.remove_all_cached_artifacts();
        assert!(!loader.cache_cleared.load(Ordering::SeqCst));
    }

    #[test]
    fn test_builder_requires_a_loader() {
        let result = Pipeline::builder().build();
        assert!(matches!(
            result,
            Err(PipelineError::MissingComponent { .. })
        ));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let loader: Arc<dyn Loader> = Arc::new(FakeLoader::new());
        let config = PipelineConfig {
            preheat_concurrency: 0,
            ..PipelineConfig::new()
        };
        let result = Pipeline::builder().config(config).loader(loader).build();
        assert!(matches!(
            result,
            Err(PipelineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_with_config_validates_before_assembly() {
        let loader: Arc<dyn Loader> = Arc::new(FakeLoader::new());
        let pipeline = Pipeline::with_config(
            PipelineConfig::for_testing(),
            Arc::clone(&loader),
            Arc::new(InlineContext),
        )
        .unwrap();
        assert_eq!(pipeline.config().preheat_concurrency, 2);

        let invalid = PipelineConfig {
            preheat_concurrency: 0,
            ..PipelineConfig::new()
        };
        let result = Pipeline::with_config(invalid, loader, Arc::new(InlineContext));
        assert!(matches!(
            result,
            Err(PipelineError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_resolves_with_final_response() {
        let (pipeline, loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("o.jpg"));
        pipeline.resume(&task);
        let intent = loader.take_started().pop().unwrap();

        let waiter = tokio::spawn({
            let task = task.clone();
            async move { task.wait().await }
        });
        intent.handle.succeed(test_output());

        let response = waiter.await.unwrap();
        assert!(response.is_ok());

        // A second wait on the terminal task resolves immediately
        assert!(task.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_after_invalidation_resolves_cancelled() {
        let (pipeline, _loader) = create_test_pipeline();
        let task = pipeline.create_task(test_request("p.jpg"));
        pipeline.resume(&task);

        pipeline.invalidate_and_cancel();
        assert!(matches!(task.wait().await, Err(LoadError::Cancelled)));
    }
}
