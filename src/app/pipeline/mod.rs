//! Task lifecycle orchestration
//!
//! This module provides the pipeline core: task creation, the
//! Suspended/Running/Completed/Cancelled state machine, the cache fast path,
//! bounded background preheating, and exactly-once completion delivery.
//!
//! # Features
//!
//! - **Single lock**: every mutation funnels through one orchestrator-owned
//!   mutex, never exposed to callers
//! - **Deferred effects**: loader calls and completion delivery always run
//!   outside the lock, so callbacks can safely re-enter the pipeline
//! - **Cache fast path**: resuming a cached request completes synchronously,
//!   before `resume` returns and without loader involvement
//! - **Bounded preheating**: background prefetch with request dedup, suspended
//!   whenever foreground demand exceeds the configured bound
//! - **Exactly-once delivery**: completions fire once each, in registration
//!   order, with the final response, on the affinity context
//! - **Silent rejection**: illegal transitions are no-ops, with the attempt's
//!   success still reported to the caller
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use aperture::app::loader::Loader;
//! use aperture::app::models::ImageRequest;
//! use aperture::app::pipeline::Pipeline;
//! use url::Url;
//!
//! # async fn example(loader: Arc<dyn Loader>) -> Result<(), Box<dyn std::error::Error>> {
//! // Create a pipeline with default configuration
//! let pipeline = Pipeline::builder().loader(loader).build()?;
//!
//! // Load one image and await the outcome
//! let request = ImageRequest::new(Url::parse("https://images.example.com/hero.jpg")?);
//! let task = pipeline.create_task(request);
//! task.resume();
//!
//! match task.wait().await {
//!     Ok(image) => println!("decoded {} bytes", image.artifact.byte_len()),
//!     Err(error) => eprintln!("load failed: {}", error),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Advanced Configuration
//!
//! ```rust,no_run
//! use aperture::app::pipeline::{ConfigPresets, Pipeline, PipelineConfigBuilder};
//!
//! # use std::sync::Arc;
//! # use aperture::app::loader::Loader;
//! # fn example(loader: Arc<dyn Loader>) -> Result<(), Box<dyn std::error::Error>> {
//! // Use a preset configuration
//! let pipeline = Pipeline::builder()
//!     .config(ConfigPresets::high_throughput())
//!     .loader(Arc::clone(&loader))
//!     .build()?;
//!
//! // Or build a custom configuration
//! let config = PipelineConfigBuilder::new().preheat_concurrency(4).build();
//! let custom = Pipeline::builder().config(config).loader(loader).build()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Preheating and Monitoring
//!
//! ```rust,no_run
//! use aperture::app::models::ImageRequest;
//! use aperture::app::pipeline::Pipeline;
//! use url::Url;
//!
//! # fn example(pipeline: &Pipeline) -> Result<(), Box<dyn std::error::Error>> {
//! // Warm the cache for images the user is likely to need next
//! let upcoming: Vec<ImageRequest> = (1..=4)
//!     .map(|page| {
//!         Url::parse(&format!("https://images.example.com/page-{page}.jpg"))
//!             .map(ImageRequest::new)
//!     })
//!     .collect::<Result<_, _>>()?;
//! pipeline.start_preheating(upcoming);
//!
//! let stats = pipeline.stats();
//! println!(
//!     "{} running, {} preheats pending",
//!     stats.executing_count, stats.preheat_pending_count
//! );
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod stats;
pub mod task;

mod preheat;
mod state;

// Re-export main types for public API
pub use self::config::{ConfigLoader, ConfigPresets, PipelineConfig, PipelineConfigBuilder};
pub use self::core::{Pipeline, PipelineBuilder};
pub use self::stats::PipelineStats;
pub use self::task::{TaskHandle, TaskId, TaskProgress, TaskState};

// Crate-internal plumbing shared with the loader facade
pub(crate) use self::core::PipelineInner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_structure() {
        // Ensure public API is accessible
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(ConfigPresets::testing().preheat_concurrency, 2);
        assert!(!TaskState::Suspended.is_terminal());
    }
}
