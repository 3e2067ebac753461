//! Error types for the Aperture image pipeline
//!
//! Failure information for a load never crosses the pipeline's public
//! operations as an `Err`: it travels inside the [`Response`] handed to
//! completion callbacks. The types here define that taxonomy plus the
//! construction-time errors the pipeline builder can report.
//!
//! [`Response`]: crate::app::models::Response

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Shared, cloneable wrapper around an external loader's reported cause.
///
/// Responses are delivered to every registered completion, so the cause must
/// be cloneable; wrapping it in an `Arc` keeps the original error intact and
/// lets `LoadError` stay `Clone`.
#[derive(Debug, Clone)]
pub struct LoaderCause(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl LoaderCause {
    /// Wrap a loader-reported error
    pub fn new(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(cause))
    }

    /// Wrap an already-shared loader error
    pub fn from_arc(cause: Arc<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        Self(cause)
    }

    /// Access the wrapped error
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Display for LoaderCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for LoaderCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Terminal failure attached to a task's response
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// The task was cancelled before a response was produced
    #[error("request cancelled")]
    Cancelled,

    /// The loader reported failure without supplying a cause
    #[error("loader failed without a reported cause")]
    Unknown,

    /// The loader reported a concrete cause, passed through verbatim
    #[error("loader error: {0}")]
    Loader(#[source] LoaderCause),
}

impl LoadError {
    /// Build a loader failure from an optional cause
    ///
    /// Loaders that cannot name a cause produce [`LoadError::Unknown`];
    /// anything else is carried through as [`LoadError::Loader`].
    pub fn from_loader(cause: Option<LoaderCause>) -> Self {
        match cause {
            Some(cause) => LoadError::Loader(cause),
            None => LoadError::Unknown,
        }
    }

    /// Check if this failure came from cancellation rather than the loader
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            LoadError::Cancelled => "cancelled",
            LoadError::Unknown => "unknown",
            LoadError::Loader(_) => "loader",
        }
    }
}

/// Pipeline construction and configuration errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration failed validation
    #[error("invalid pipeline configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Builder was finalized without a required component
    #[error("pipeline builder missing required component: {component}")]
    MissingComponent { component: String },

    /// Configuration file not found
    #[error("configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration file could not be parsed
    #[error("invalid configuration format")]
    ConfigFormat(#[from] toml::de::Error),

    /// I/O error while reading configuration
    #[error("configuration I/O error")]
    ConfigIo(#[from] std::io::Error),
}

/// Load result type alias
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Pipeline result type alias
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connection reset")]
    struct FakeIoError;

    #[test]
    fn test_from_loader_defaults_to_unknown() {
        let error = LoadError::from_loader(None);
        assert!(matches!(error, LoadError::Unknown));
        assert_eq!(error.category(), "unknown");
    }

    #[test]
    fn test_from_loader_preserves_cause() {
        let error = LoadError::from_loader(Some(LoaderCause::new(FakeIoError)));
        assert_eq!(error.category(), "loader");

        match &error {
            LoadError::Loader(cause) => {
                assert_eq!(cause.to_string(), "connection reset");
            }
            other => panic!("expected loader error, got {:?}", other),
        }
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(LoadError::Cancelled.is_cancellation());
        assert!(!LoadError::Unknown.is_cancellation());
        assert_eq!(LoadError::Cancelled.category(), "cancelled");
    }

    #[test]
    fn test_errors_are_cloneable() {
        let error = LoadError::Loader(LoaderCause::new(FakeIoError));
        let cloned = error.clone();
        assert_eq!(error.to_string(), cloned.to_string());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(LoadError::Cancelled.to_string(), "request cancelled");
        assert_eq!(
            LoadError::Unknown.to_string(),
            "loader failed without a reported cause"
        );
    }
}
