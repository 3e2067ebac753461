//! Dynamic configuration management for the pipeline
//!
//! This module provides flexible configuration options for the pipeline,
//! eliminating hard-coded constants and allowing runtime configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{pipeline::TRACKED_TASKS_WARN_THRESHOLD, preheat::DEFAULT_MAX_CONCURRENT};
use crate::errors::{PipelineError, PipelineResult};

/// Tunable pipeline behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum preheat tasks running at once; also the executing-task count
    /// above which preheating suspends
    pub preheat_concurrency: usize,
    /// Tracked-task count above which a warning is logged
    pub tracked_tasks_warn_threshold: usize,
}

impl PipelineConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            preheat_concurrency: DEFAULT_MAX_CONCURRENT,
            tracked_tasks_warn_threshold: TRACKED_TASKS_WARN_THRESHOLD,
        }
    }

    /// Create a configuration suitable for tests
    pub fn for_testing() -> Self {
        Self {
            preheat_concurrency: 2,
            tracked_tasks_warn_threshold: 100,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.preheat_concurrency == 0 {
            return Err("preheat_concurrency must be greater than 0".to_string());
        }
        if self.tracked_tasks_warn_threshold == 0 {
            return Err("tracked_tasks_warn_threshold must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating pipeline configurations
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    preheat_concurrency: Option<usize>,
    tracked_tasks_warn_threshold: Option<usize>,
}

impl PipelineConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            preheat_concurrency: None,
            tracked_tasks_warn_threshold: None,
        }
    }

    /// Set the preheat concurrency bound
    pub fn preheat_concurrency(mut self, bound: usize) -> Self {
        self.preheat_concurrency = Some(bound);
        self
    }

    /// Set the tracked-task warning threshold
    pub fn tracked_tasks_warn_threshold(mut self, threshold: usize) -> Self {
        self.tracked_tasks_warn_threshold = Some(threshold);
        self
    }

    /// Build the configuration
    pub fn build(self) -> PipelineConfig {
        PipelineConfig {
            preheat_concurrency: self.preheat_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENT),
            tracked_tasks_warn_threshold: self
                .tracked_tasks_warn_threshold
                .unwrap_or(TRACKED_TASKS_WARN_THRESHOLD),
        }
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration presets for different use cases
pub struct ConfigPresets;

impl ConfigPresets {
    /// Configuration optimized for production use
    pub fn production() -> PipelineConfig {
        PipelineConfigBuilder::new()
            .preheat_concurrency(2)
            .tracked_tasks_warn_threshold(10_000)
            .build()
    }

    /// Configuration optimized for development
    pub fn development() -> PipelineConfig {
        PipelineConfigBuilder::new()
            .preheat_concurrency(2)
            .tracked_tasks_warn_threshold(1_000)
            .build()
    }

    /// Configuration optimized for testing
    pub fn testing() -> PipelineConfig {
        PipelineConfigBuilder::new()
            .preheat_concurrency(2)
            .tracked_tasks_warn_threshold(100)
            .build()
    }

    /// Configuration optimized for aggressive prefetching
    pub fn high_throughput() -> PipelineConfig {
        PipelineConfigBuilder::new()
            .preheat_concurrency(8)
            .tracked_tasks_warn_threshold(100_000)
            .build()
    }

    /// Configuration optimized for low-resource environments
    pub fn low_resource() -> PipelineConfig {
        PipelineConfigBuilder::new()
            .preheat_concurrency(1)
            .tracked_tasks_warn_threshold(1_000)
            .build()
    }
}

/// Environment-based configuration loading
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from environment variables
    pub fn from_env() -> PipelineConfig {
        let mut builder = PipelineConfigBuilder::new();

        // Load from environment variables with fallback to defaults
        if let Ok(concurrency) = std::env::var("APERTURE_PREHEAT_CONCURRENCY") {
            if let Ok(bound) = concurrency.parse::<usize>() {
                builder = builder.preheat_concurrency(bound);
            }
        }

        if let Ok(threshold) = std::env::var("APERTURE_TRACKED_TASKS_WARN") {
            if let Ok(threshold) = threshold.parse::<usize>() {
                builder = builder.tracked_tasks_warn_threshold(threshold);
            }
        }

        builder.build()
    }

    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> PipelineResult<PipelineConfig> {
        if !path.exists() {
            return Err(PipelineError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfigFile = toml::from_str(&content)?;
        Ok(config.into())
    }

    /// Load configuration with precedence: file -> env -> defaults
    pub fn load_with_precedence(config_file: Option<&std::path::Path>) -> PipelineConfig {
        let mut config = ConfigPresets::production();

        // Override with file if provided
        if let Some(path) = config_file {
            if let Ok(file_config) = Self::from_file(path) {
                config = file_config;
            }
        }

        // Environment variables win over everything else
        if std::env::var("APERTURE_PREHEAT_CONCURRENCY").is_ok()
            || std::env::var("APERTURE_TRACKED_TASKS_WARN").is_ok()
        {
            config = Self::from_env();
        }

        config
    }
}

/// Configuration file format
#[derive(Debug, Deserialize, Serialize)]
struct PipelineConfigFile {
    preheat_concurrency: Option<usize>,
    tracked_tasks_warn_threshold: Option<usize>,
}

impl From<PipelineConfigFile> for PipelineConfig {
    fn from(file_config: PipelineConfigFile) -> Self {
        let mut builder = PipelineConfigBuilder::new();

        if let Some(bound) = file_config.preheat_concurrency {
            builder = builder.preheat_concurrency(bound);
        }

        if let Some(threshold) = file_config.tracked_tasks_warn_threshold {
            builder = builder.tracked_tasks_warn_threshold(threshold);
        }

        builder.build()
    }
}
