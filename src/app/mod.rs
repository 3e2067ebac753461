//! Core application logic for the Aperture image pipeline
//!
//! This module contains the main components: request and response models, the
//! loader facade boundary, completion dispatch, and the task orchestration
//! pipeline.
//!
//! # Examples
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
//! // Assemble the pipeline around your loader implementation
//! let pipeline = Pipeline::builder().loader(loader).build()?;
//!
//! // Create a task, register a completion, start it
//! let request = ImageRequest::new(Url::parse("https://images.example.com/photo.jpg")?);
//! let task = pipeline.create_task(request);
//! task.add_completion(|response| match response {
//!     Ok(image) => println!("got {}x{}", image.artifact.width, image.artifact.height),
//!     Err(error) => eprintln!("failed: {}", error),
//! });
//! task.resume();
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod loader;
pub mod models;
pub mod pipeline;

// Re-export main public API
pub use dispatch::{AffinityContext, AffinityThread, Completion, ContextJob};
pub use loader::{LoadHandle, LoadIntent, Loader};
pub use models::{
    Artifact, ContentMode, ImageRequest, ImageResponse, LoadOutput, RequestKey, Response,
    ResponseInfo, TargetSize,
};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineConfig, PipelineStats, TaskHandle, TaskId, TaskProgress,
    TaskState,
};
