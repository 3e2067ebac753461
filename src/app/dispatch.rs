//! Completion delivery on a designated affinity context
//!
//! Completions captured under the pipeline lock are handed to a
//! [`CompletionDispatcher`] after the lock is released. The dispatcher
//! delivers them on the configured affinity context: synchronously when the
//! triggering code is already running there, otherwise as an async post.
//! Callbacks therefore never observe the pipeline lock held and are free to
//! call back into the pipeline.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::app::models::Response;
use crate::app::pipeline::TaskId;
use crate::constants::dispatch::{AFFINITY_THREAD_NAME, SLOW_BATCH_THRESHOLD};

/// A registered completion callback, fired exactly once with the final response
pub type Completion = Box<dyn FnOnce(Response) + Send + 'static>;

/// Unit of work posted to an affinity context
pub type ContextJob = Box<dyn FnOnce() + Send + 'static>;

/// Execution context on which completions are delivered
///
/// Implementations wrap whatever the hosting environment considers its
/// callback home, such as a UI event loop or a dedicated worker thread. The
/// pipeline never assumes a concrete runtime; it only needs these two
/// capabilities.
pub trait AffinityContext: Send + Sync {
    /// Check whether the calling code is already on this context
    fn is_current(&self) -> bool;

    /// Schedule a job to run on this context
    ///
    /// Jobs must run in the order they were posted. Jobs posted after the
    /// context shuts down may be dropped.
    fn post(&self, job: ContextJob);
}

enum ThreadJob {
    Run(ContextJob),
    Stop,
}

/// Default affinity context backed by a dedicated named thread
///
/// Jobs are queued over an unbounded channel and executed one at a time in
/// FIFO order. Dropping the handle stops the thread after the jobs already
/// queued have run.
pub struct AffinityThread {
    sender: mpsc::UnboundedSender<ThreadJob>,
    thread_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AffinityThread {
    /// Spawn the delivery thread
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to spawn a thread.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ThreadJob>();
        let worker = thread::Builder::new()
            .name(AFFINITY_THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    match job {
                        ThreadJob::Run(job) => job(),
                        ThreadJob::Stop => break,
                    }
                }
            })
            .expect("failed to spawn completion delivery thread");

        let thread_id = worker.thread().id();
        Self {
            sender,
            thread_id,
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl Default for AffinityThread {
    fn default() -> Self {
        Self::new()
    }
}

impl AffinityContext for AffinityThread {
    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn post(&self, job: ContextJob) {
        if self.sender.send(ThreadJob::Run(job)).is_err() {
            warn!("completion delivery thread is gone, dropping posted job");
        }
    }
}

impl Drop for AffinityThread {
    fn drop(&mut self) {
        let _ = self.sender.send(ThreadJob::Stop);

        // A join from a job running on the worker itself would never return;
        // let the thread wind down on its own in that case.
        if thread::current().id() == self.thread_id {
            return;
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for AffinityThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinityThread")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

/// Delivers captured completion batches on the affinity context
///
/// A batch is always delivered whole and in registration order, each callback
/// receiving the same final response.
#[derive(Clone)]
pub(crate) struct CompletionDispatcher {
    context: Arc<dyn AffinityContext>,
}

impl CompletionDispatcher {
    pub(crate) fn new(context: Arc<dyn AffinityContext>) -> Self {
        Self { context }
    }

    /// Deliver a batch for `task`, synchronously if already on the context
    pub(crate) fn deliver(&self, task: TaskId, completions: Vec<Completion>, response: Response) {
        if completions.is_empty() {
            return;
        }

        debug!("{}: delivering {} completion(s)", task, completions.len());
        if self.context.is_current() {
            run_batch(task, completions, response);
        } else {
            self.context
                .post(Box::new(move || run_batch(task, completions, response)));
        }
    }
}

impl fmt::Debug for CompletionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionDispatcher").finish()
    }
}

fn run_batch(task: TaskId, completions: Vec<Completion>, response: Response) {
    let count = completions.len();
    let started = Instant::now();

    for completion in completions {
        completion(response.clone());
    }

    let elapsed = started.elapsed();
    if elapsed > SLOW_BATCH_THRESHOLD {
        warn!(
            "{}: completion batch of {} took {:?}, callbacks should stay light",
            task, count, elapsed
        );
    }
}
