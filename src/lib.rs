//! Aperture Library
//!
//! A Rust library for loading and decoding images asynchronously. Provides
//! task lifecycle management with race-free state transitions, an in-memory
//! cache fast path, bounded background prefetching, and exactly-once delivery
//! of completion callbacks on a designated context.

pub mod app;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{LoadError, LoadResult, LoaderCause, PipelineError, PipelineResult};

#[cfg(test)]
mod tests {
    use super::*;
    use constants::*;

    #[test]
    fn test_constants_accessible() {
        // Test that our constants are accessible
        assert_eq!(DEFAULT_MAX_CONCURRENT, 2);
        assert!(AFFINITY_THREAD_NAME.contains("aperture"));
    }

    #[test]
    fn test_error_types() {
        // Test that our error types work correctly
        let error = LoadError::from_loader(None);

        assert_eq!(error.category(), "unknown");
        assert!(!error.is_cancellation());
    }
}
