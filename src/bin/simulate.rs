//! Pipeline Simulation Binary
//!
//! This educational binary demonstrates the image loading pipeline under
//! synthetic load: randomized fetch-and-decode latency, injected loader
//! failures, warm-cache fast paths, bounded preheating, and mid-flight
//! cancellation.
//!
//! Run with: `cargo run --bin simulate`

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use aperture::app::pipeline::PipelineConfigBuilder;
use aperture::app::{
    Artifact, ContentMode, ImageRequest, ImageResponse, LoadIntent, LoadOutput, Loader, Pipeline,
    RequestKey, TargetSize, TaskId,
};
use aperture::{LoadError, LoaderCause};

/// Synthetic workload for the image loading pipeline
#[derive(Parser, Debug, Clone)]
#[command(
    name = "simulate",
    version,
    about = "Exercise the image loading pipeline with synthetic load",
    long_about = "Drives the pipeline the way a scrolling image feed would: a burst of \
foreground load requests over a shared resource pool, preheating ahead of the burst, \
random cancellations, and optional mid-run invalidation."
)]
struct SimulateArgs {
    /// Number of foreground load requests to issue
    #[arg(long, default_value = "200")]
    tasks: usize,

    /// Number of distinct image resources (smaller pool = more cache hits)
    #[arg(long, default_value = "64")]
    resources: usize,

    /// Number of resources to preheat before the foreground burst
    #[arg(long, default_value = "32")]
    preheat: usize,

    /// Preheat concurrency bound
    #[arg(long, default_value = "2")]
    preheat_concurrency: usize,

    /// Probability that a load fails (0.0-1.0)
    #[arg(long, default_value = "0.05")]
    failure_rate: f64,

    /// Probability that a foreground task is cancelled mid-flight (0.0-1.0)
    #[arg(long, default_value = "0.10")]
    cancel_rate: f64,

    /// Minimum simulated fetch-and-decode time (milliseconds)
    #[arg(long, default_value = "5")]
    min_latency_ms: u64,

    /// Maximum simulated fetch-and-decode time (milliseconds)
    #[arg(long, default_value = "40")]
    max_latency_ms: u64,

    /// Invalidate the pipeline halfway through the foreground burst
    #[arg(long)]
    invalidate: bool,

    /// RNG seed for reproducible runs
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long)]
    very_verbose: bool,
}

/// Synthetic loader failure injected by the simulation
#[derive(Debug, Clone, Copy, thiserror::Error)]
enum SimFailure {
    #[error("simulated network timeout")]
    Timeout,
    #[error("simulated HTTP 503 from origin")]
    Overloaded,
    #[error("simulated decode failure: truncated payload")]
    Truncated,
}

/// Everything a single synthetic load needs, decided up front so the
/// spawned worker holds no RNG across await points
#[derive(Debug, Clone, Copy)]
struct LoadPlan {
    latency: Duration,
    failure: Option<SimFailure>,
    width: u32,
    height: u32,
}

/// Loader that fabricates artifacts after a randomized delay
///
/// Successful loads are remembered so repeat requests for the same key hit
/// the pipeline's synchronous cache fast path.
struct SimLoader {
    runtime: Handle,
    min_latency_ms: u64,
    max_latency_ms: u64,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    cache: Arc<Mutex<HashMap<RequestKey, ImageResponse>>>,
    inflight: Arc<Mutex<HashMap<TaskId, JoinHandle<()>>>>,
    stops_received: AtomicU64,
}

impl SimLoader {
    fn new(args: &SimulateArgs) -> Self {
        Self {
            runtime: Handle::current(),
            min_latency_ms: args.min_latency_ms,
            max_latency_ms: args.max_latency_ms,
            failure_rate: args.failure_rate,
            rng: Mutex::new(StdRng::seed_from_u64(args.seed.wrapping_add(1))),
            cache: Arc::new(Mutex::new(HashMap::new())),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            stops_received: AtomicU64::new(0),
        }
    }

    /// Draw all random decisions for one load
    fn draw_plan(&self) -> LoadPlan {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let latency =
            Duration::from_millis(rng.gen_range(self.min_latency_ms..=self.max_latency_ms));
        let failure = if rng.gen_bool(self.failure_rate) {
            Some(match rng.gen_range(0..3) {
                0 => SimFailure::Timeout,
                1 => SimFailure::Overloaded,
                _ => SimFailure::Truncated,
            })
        } else {
            None
        };
        let width = rng.gen_range(16..=96) * 8;
        let height = rng.gen_range(16..=96) * 8;

        LoadPlan {
            latency,
            failure,
            width,
            height,
        }
    }

    fn stop_count(&self) -> u64 {
        self.stops_received.load(Ordering::Relaxed)
    }

    fn cached_count(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Loader for SimLoader {
    fn cached_response(&self, key: &RequestKey) -> Option<ImageResponse> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn start_load(&self, intent: LoadIntent) {
        let LoadIntent { request, handle } = intent;
        let id = handle.task_id();
        let key = request.key();
        let plan = self.draw_plan();

        debug!(
            "{}: loading {} ({:?} simulated latency)",
            id, request.resource, plan.latency
        );

        let cache = Arc::clone(&self.cache);
        let inflight = Arc::clone(&self.inflight);
        let worker = self.runtime.spawn(async move {
            // Report progress in coarse steps while the fake decode runs
            let step = plan.latency / 4;
            for completed in 1..=4u64 {
                sleep(step).await;
                if handle.is_finished() {
                    debug!("{}: load abandoned", id);
                    inflight
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                    return;
                }
                handle.progress(completed, 4);
            }

            match plan.failure {
                Some(failure) => {
                    debug!("{}: {}", id, failure);
                    handle.fail(Some(LoaderCause::new(failure)));
                }
                None => {
                    let pixels = plan.width as usize * plan.height as usize;
                    let artifact = Artifact::new(vec![0xAB; pixels / 16], plan.width, plan.height);
                    let output = LoadOutput::new(artifact).with_metadata(serde_json::json!({
                        "source": "simulate",
                        "latency_ms": plan.latency.as_millis() as u64,
                    }));
                    cache
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key, ImageResponse::from_output(output.clone()));
                    handle.succeed(output);
                }
            }

            inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });

        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, worker);
    }

    fn stop_load(&self, id: TaskId) {
        self.stops_received.fetch_add(1, Ordering::Relaxed);
        let worker = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(worker) = worker {
            worker.abort();
            debug!("{}: load aborted", id);
        }
    }

    fn invalidate(&self) {
        let workers: Vec<(TaskId, JoinHandle<()>)> = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, worker) in &workers {
            worker.abort();
        }
        info!("loader invalidated, {} in-flight loads aborted", workers.len());
    }

    fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let evicted = cache.len();
        cache.clear();
        info!("artifact cache cleared ({} entries)", evicted);
    }
}

/// How a foreground task's wait resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimOutcome {
    Loaded,
    FastPath,
    Failed,
    Cancelled,
}

/// Generate the shared pool of image requests the burst draws from
fn build_resource_pool(args: &SimulateArgs, rng: &mut StdRng) -> anyhow::Result<Vec<ImageRequest>> {
    let mut pool = Vec::with_capacity(args.resources);

    for index in 0..args.resources {
        let url = Url::parse(&format!(
            "https://images.example.com/photo-{:04}.jpg",
            index
        ))?;
        let mut request = ImageRequest::new(url);

        // Mix natural-size and sized requests so distinct keys share a resource
        if rng.gen_bool(0.5) {
            let edge = rng.gen_range(1..=8) * 128;
            request = request.with_target_size(TargetSize::new(edge, edge));
            if rng.gen_bool(0.3) {
                request = request.with_content_mode(ContentMode::AspectFill);
            }
        }

        pool.push(request);
    }

    Ok(pool)
}

/// Progress bar for the foreground burst, hidden when not attached to a terminal
fn foreground_progress(total: u64) -> ProgressBar {
    if !atty::is(atty::Stream::Stderr) {
        return ProgressBar::hidden();
    }

    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    progress.set_message("loading");
    progress
}

/// Main simulation: preheat, foreground burst, drain, report
async fn run_simulation(args: SimulateArgs) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let pool = build_resource_pool(&args, &mut rng)?;
    let loader = Arc::new(SimLoader::new(&args));

    let config = PipelineConfigBuilder::new()
        .preheat_concurrency(args.preheat_concurrency)
        .build();
    let pipeline = Pipeline::builder()
        .loader(Arc::clone(&loader) as Arc<dyn Loader>)
        .config(config)
        .build()?;

    info!(
        "simulation starting: {} tasks over {} resources, preheat {} at bound {}",
        args.tasks, args.resources, args.preheat, args.preheat_concurrency
    );

    // Phase 1: preheat a slice of the pool, with a few duplicates to show dedup
    let mut preheat_batch: Vec<ImageRequest> = pool
        .iter()
        .take(args.preheat)
        .cloned()
        .collect();
    preheat_batch.extend(pool.iter().take(args.preheat / 4).cloned());
    pipeline.start_preheating(preheat_batch);

    // Phase 2: foreground burst with random arrival gaps and cancellations
    let progress = foreground_progress(args.tasks as u64);
    let invalidate_at = if args.invalidate { args.tasks / 2 } else { usize::MAX };
    let mut waiters: Vec<JoinHandle<SimOutcome>> = Vec::with_capacity(args.tasks);

    for issued in 0..args.tasks {
        if issued == invalidate_at {
            warn!("invalidating pipeline after {} tasks", issued);
            pipeline.invalidate_and_cancel();
        }

        let request = pool[rng.gen_range(0..pool.len())].clone();
        let task = pipeline.create_task(request);
        task.resume();

        if rng.gen_bool(args.cancel_rate) {
            let victim = task.clone();
            let delay = Duration::from_millis(rng.gen_range(0..args.max_latency_ms.max(1)));
            tokio::spawn(async move {
                sleep(delay).await;
                victim.cancel();
            });
        }

        let bar = progress.clone();
        waiters.push(tokio::spawn(async move {
            let response = task.wait().await;
            bar.inc(1);
            match response {
                Ok(response) if response.is_fast_path() => SimOutcome::FastPath,
                Ok(_) => SimOutcome::Loaded,
                Err(LoadError::Cancelled) => SimOutcome::Cancelled,
                Err(_) => SimOutcome::Failed,
            }
        }));

        if issued % 50 == 49 {
            let snapshot = pipeline.stats();
            debug!(
                "issued {}: {} executing, {} preheat pending (suspended: {})",
                issued + 1,
                snapshot.executing_count,
                snapshot.preheat_pending_count,
                snapshot.preheat_suspended
            );
        }

        sleep(Duration::from_millis(rng.gen_range(0..3))).await;
    }

    // Tally the burst
    let mut loaded = 0u64;
    let mut fast_path = 0u64;
    let mut failed = 0u64;
    let mut cancelled = 0u64;
    for outcome in futures::future::join_all(waiters).await {
        match outcome {
            Ok(SimOutcome::Loaded) => loaded += 1,
            Ok(SimOutcome::FastPath) => fast_path += 1,
            Ok(SimOutcome::Failed) => failed += 1,
            Ok(SimOutcome::Cancelled) => cancelled += 1,
            Err(join_error) => warn!("waiter panicked: {}", join_error),
        }
    }
    progress.finish_and_clear();

    // Phase 3: let the preheat trickle drain before reporting
    let drain_deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = pipeline.stats();
        if snapshot.executing_count == 0 && snapshot.preheat_pending_count == 0 {
            break;
        }
        if Instant::now() >= drain_deadline {
            warn!(
                "drain timed out with {} loads still executing",
                snapshot.executing_count
            );
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    pipeline.stop_all_preheating();

    let stats = pipeline.stats();
    let elapsed = started.elapsed().as_secs_f64();

    println!("\n📊 Simulation Results:");
    println!("├─ Duration: {:.1} seconds", elapsed);
    println!("├─ Foreground tasks: {}", args.tasks);
    println!("├─ Loaded from origin: {}", loaded);
    println!(
        "├─ Fast-path cache hits: {} ({:.1}% of terminal tasks)",
        fast_path,
        stats.fast_path_rate()
    );
    println!("├─ Failed: {}", failed);
    println!("├─ Cancelled: {}", cancelled);
    println!(
        "├─ Preheat admitted: {} ({} duplicates rejected)",
        stats.preheat_admitted, stats.preheat_deduplicated
    );
    println!("├─ Loads started: {}", stats.loads_started);
    println!("├─ Loader stop requests: {}", loader.stop_count());
    println!("└─ Artifacts cached: {}", loader.cached_count());

    if args.invalidate {
        println!("\n✅ Pipeline invalidated mid-run; later tasks resolved as cancelled");
    } else {
        println!("\n✅ Simulation completed");
        println!("Key observations:");
        println!("  • Repeat requests resolved synchronously from the warm cache");
        println!("  • Preheating stayed within its concurrency bound");
        println!("  • Cancelled tasks stopped their loads and still resolved exactly once");
    }

    Ok(())
}

/// Initialize logging based on CLI verbosity settings
fn init_logging(args: &SimulateArgs) {
    let log_level = if args.very_verbose {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("aperture={}", log_level).parse().unwrap());

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(args.very_verbose)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = SimulateArgs::parse();

    anyhow::ensure!(
        (0.0..=1.0).contains(&args.failure_rate),
        "failure rate must be between 0.0 and 1.0"
    );
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.cancel_rate),
        "cancel rate must be between 0.0 and 1.0"
    );
    anyhow::ensure!(
        args.min_latency_ms <= args.max_latency_ms,
        "minimum latency must not exceed maximum latency"
    );
    anyhow::ensure!(args.resources > 0, "resource pool must not be empty");

    init_logging(&args);
    run_simulation(args).await
}
