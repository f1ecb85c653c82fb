//! Configuration for the bulk ingestion pipeline.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the ingestion pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chunking, concurrency and batch bounds
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Per-record validation rules
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Best-effort classification of inserted items
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of items per validation chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum chunks validated at once (None = available parallelism)
    #[serde(default)]
    pub max_concurrent_chunks: Option<usize>,

    /// Deadline for a whole batch, in seconds
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Smallest batch accepted
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    /// Largest batch accepted
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Number of Tokio worker threads for the CLI runtime
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Retry configuration for the existence lookup
    #[serde(default)]
    pub retry: RetryConfig,
}

impl PipelineConfig {
    /// Effective chunk concurrency.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_chunks.unwrap_or_else(available_parallelism)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_concurrent_chunks: None,
            batch_timeout_secs: 300,
            min_batch_size: 30,
            max_batch_size: 10_000,
            worker_threads: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient store failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

/// Field rules applied by the validation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_max_sku_length")]
    pub max_sku_length: usize,

    #[serde(default = "default_min_name_length")]
    pub min_name_length: usize,

    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,

    #[serde(default = "default_max_description_length")]
    pub max_description_length: usize,

    #[serde(default = "default_max_label_length")]
    pub max_brand_length: usize,

    #[serde(default = "default_max_label_length")]
    pub max_category_length: usize,

    /// Inclusive price ceiling
    #[serde(default = "default_max_price")]
    pub max_price: f64,

    #[serde(default = "default_max_image_urls")]
    pub max_image_urls: usize,

    #[serde(default = "default_max_image_url_length")]
    pub max_image_url_length: usize,

    #[serde(default = "default_max_attributes")]
    pub max_attributes: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_sku_length: 50,
            min_name_length: 1,
            max_name_length: 255,
            max_description_length: 2000,
            max_brand_length: 100,
            max_category_length: 100,
            max_price: 999_999.99,
            max_image_urls: 10,
            max_image_url_length: 500,
            max_attributes: 50,
        }
    }
}

/// Classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Classify inserted items after insertion
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum concurrent classifier calls
    #[serde(default = "default_classifier_concurrency")]
    pub concurrency: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 8,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), IngestError> {
        let invalid = |msg: &str| Err(IngestError::InvalidConfig(msg.to_string()));
        let pipeline = &self.pipeline;

        if pipeline.chunk_size == 0 {
            return invalid("chunk_size must be > 0");
        }
        if pipeline.max_concurrent_chunks == Some(0) {
            return invalid("max_concurrent_chunks must be > 0");
        }
        if pipeline.batch_timeout_secs == 0 {
            return invalid("batch_timeout_secs must be > 0");
        }
        if pipeline.batch_timeout_secs > MAX_BATCH_TIMEOUT_SECS {
            return invalid("batch_timeout_secs must not exceed one day");
        }
        if pipeline.min_batch_size > pipeline.max_batch_size {
            return invalid("min_batch_size must not exceed max_batch_size");
        }
        if pipeline.retry.max_retries == 0 {
            return invalid("retry.max_retries must be > 0");
        }

        let validation = &self.validation;
        if !validation.max_price.is_finite() || validation.max_price < 0.0 {
            return invalid("max_price must be a non-negative number");
        }
        if validation.min_name_length > validation.max_name_length {
            return invalid("min_name_length must not exceed max_name_length");
        }

        if self.classifier.concurrency == 0 {
            return invalid("classifier.concurrency must be > 0");
        }
        Ok(())
    }
}

/// Longest accepted batch deadline.
pub const MAX_BATCH_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Number of CPUs available to this process, falling back to 1.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

// Default value functions for serde
fn default_chunk_size() -> usize { 100 }
fn default_batch_timeout_secs() -> u64 { 300 }
fn default_min_batch_size() -> usize { 30 }
fn default_max_batch_size() -> usize { 10_000 }
fn default_max_retries() -> usize { 3 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 10000 }
fn default_max_sku_length() -> usize { 50 }
fn default_min_name_length() -> usize { 1 }
fn default_max_name_length() -> usize { 255 }
fn default_max_description_length() -> usize { 2000 }
fn default_max_label_length() -> usize { 100 }
fn default_max_price() -> f64 { 999_999.99 }
fn default_max_image_urls() -> usize { 10 }
fn default_max_image_url_length() -> usize { 500 }
fn default_max_attributes() -> usize { 50 }
fn default_true() -> bool { true }
fn default_classifier_concurrency() -> usize { 8 }
