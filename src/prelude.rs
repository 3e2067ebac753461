//! Prelude module for the Aperture library
//!
//! This module re-exports the most commonly used items from the library,
//! providing a convenient way to import everything needed for typical usage
//! with a single `use aperture::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use aperture::prelude::*;
//!
//! # async fn example(loader: Arc<dyn Loader>) -> PipelineResult<()> {
//! // All common types are now available
//! let pipeline = Pipeline::builder().loader(loader).build()?;
//!
//! let url = Url::parse("https://images.example.com/cover.jpg").unwrap();
//! let task = pipeline.create_task(ImageRequest::new(url));
//! task.resume();
//! # Ok(())
//! # }
//! ```

// Core result types
pub use crate::errors::{LoadError, LoadResult, LoaderCause, PipelineError, PipelineResult};

// Essential app components that are used in most integrations
pub use crate::app::{
    // Completion delivery
    AffinityContext,
    AffinityThread,

    // Data types
    Artifact,
    ContentMode,
    ImageRequest,
    ImageResponse,

    // Loader boundary
    LoadHandle,
    LoadIntent,
    LoadOutput,
    Loader,

    // Core orchestration
    Pipeline,
    PipelineBuilder,
    PipelineConfig,
    PipelineStats,

    RequestKey,
    Response,
    ResponseInfo,
    TargetSize,

    // Task surface
    TaskHandle,
    TaskId,
    TaskProgress,
    TaskState,
};

// Configuration helpers
pub use crate::app::pipeline::{ConfigLoader, ConfigPresets, PipelineConfigBuilder};

// Commonly used constants
pub use crate::constants::DEFAULT_MAX_CONCURRENT;

// Standard library re-exports that are commonly needed
pub use std::sync::Arc;

// Common external crate re-exports for convenience
// Note: Only re-export types that users will commonly need,
// not the entire crates which would pollute the namespace
pub use tokio;
pub use url::Url;
