//! Data models for the Aperture pipeline
//!
//! This module defines the core request and response structures: the request
//! descriptor callers submit, the [`RequestKey`] identity derived from it for
//! cache and deduplication lookups, and the response types delivered to
//! completion callbacks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::LoadResult;

/// How a decoded artifact is fitted into its target size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentMode {
    /// Scale preserving aspect ratio so the artifact fits inside the target
    AspectFit,
    /// Scale preserving aspect ratio so the artifact fills the target
    AspectFill,
    /// Stretch to the exact target size, ignoring aspect ratio
    Stretch,
}

impl ContentMode {
    /// Parse from a configuration name (e.g., "aspect-fit")
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aspect-fit" => Some(Self::AspectFit),
            "aspect-fill" => Some(Self::AspectFill),
            "stretch" => Some(Self::Stretch),
            _ => None,
        }
    }

    /// Get the configuration name (e.g., "aspect-fit")
    pub fn name(&self) -> &'static str {
        match self {
            Self::AspectFit => "aspect-fit",
            Self::AspectFill => "aspect-fill",
            Self::Stretch => "stretch",
        }
    }
}

impl Default for ContentMode {
    fn default() -> Self {
        Self::AspectFit
    }
}

impl fmt::Display for ContentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Target pixel dimensions for a derived artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSize {
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
}

impl TargetSize {
    /// Create a new target size
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count at this size
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for TargetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A request for a derived artifact
///
/// Requests with the same resource, target size, and content mode produce an
/// interchangeable artifact and therefore share a [`RequestKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRequest {
    /// Identity of the source resource
    pub resource: Url,
    /// Requested output dimensions; `None` means the resource's natural size
    pub target_size: Option<TargetSize>,
    /// How the artifact is fitted when a target size is given
    pub content_mode: ContentMode,
}

impl ImageRequest {
    /// Create a request for a resource at its natural size
    pub fn new(resource: Url) -> Self {
        Self {
            resource,
            target_size: None,
            content_mode: ContentMode::default(),
        }
    }

    /// Set the target output dimensions
    pub fn with_target_size(mut self, size: TargetSize) -> Self {
        self.target_size = Some(size);
        self
    }

    /// Set the content-fit mode
    pub fn with_content_mode(mut self, mode: ContentMode) -> Self {
        self.content_mode = mode;
        self
    }

    /// Derive the canonical identity used for cache and dedup lookups
    pub fn key(&self) -> RequestKey {
        RequestKey {
            resource: self.resource.clone(),
            target_size: self.target_size,
            content_mode: self.content_mode,
        }
    }
}

/// Canonical identity of a request
///
/// Equality and hashing cover exactly the fields that determine the produced
/// artifact, so two requests yielding an interchangeable artifact compare
/// equal. Used for the cache fast path and preheat deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    resource: Url,
    target_size: Option<TargetSize>,
    content_mode: ContentMode,
}

impl RequestKey {
    /// Identity of the source resource
    pub fn resource(&self) -> &Url {
        &self.resource
    }

    /// Requested output dimensions, if any
    pub fn target_size(&self) -> Option<TargetSize> {
        self.target_size
    }

    /// Content-fit mode
    pub fn content_mode(&self) -> ContentMode {
        self.content_mode
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target_size {
            Some(size) => write!(f, "{}@{}/{}", self.resource, size, self.content_mode),
            None => write!(f, "{}@natural/{}", self.resource, self.content_mode),
        }
    }
}

/// A decoded artifact produced by the external loader
///
/// The pipeline treats the payload as opaque; decoding formats belong to the
/// loader. Dimensions are carried for accounting and display.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Decoded payload bytes
    pub data: Vec<u8>,
    /// Pixel width of the decoded artifact
    pub width: u32,
    /// Pixel height of the decoded artifact
    pub height: u32,
}

impl Artifact {
    /// Create a new artifact
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Payload size in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Delivery details attached to a successful response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    /// Whether the response was satisfied synchronously from cache
    pub is_fast_path: bool,
    /// Loader-supplied extras (timings, source details), carried verbatim
    pub metadata: Option<serde_json::Value>,
}

/// A successful load result: the artifact plus delivery details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResponse {
    /// The decoded artifact, shared across all completion deliveries
    pub artifact: Arc<Artifact>,
    /// Delivery details
    pub info: ResponseInfo,
}

impl ImageResponse {
    /// Build a loader-path response from the loader's output
    pub fn from_output(output: LoadOutput) -> Self {
        Self {
            artifact: Arc::new(output.artifact),
            info: ResponseInfo {
                is_fast_path: false,
                metadata: output.metadata,
            },
        }
    }

    /// Re-tag this response as satisfied synchronously from cache
    pub fn into_fast_path(mut self) -> Self {
        self.info.is_fast_path = true;
        self
    }

    /// Whether the response came from the synchronous cache path
    pub fn is_fast_path(&self) -> bool {
        self.info.is_fast_path
    }
}

/// What a loader hands back for a successfully loaded task
#[derive(Debug, Clone)]
pub struct LoadOutput {
    /// The decoded artifact
    pub artifact: Artifact,
    /// Optional loader extras to ride along on the response
    pub metadata: Option<serde_json::Value>,
}

impl LoadOutput {
    /// Wrap an artifact with no extras
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            metadata: None,
        }
    }

    /// Attach loader metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Final result delivered to every completion registered on a task
pub type Response = LoadResult<ImageResponse>;
