//! Configuration management for the audit pipeline

use crate::benford::{DeviationMethod, GroupingKey, DEFAULT_MIN_SAMPLES};
use crate::error::ConfigurationError;
use crate::fusion::FusionPolicy;
use crate::models::forest::ForestParams;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    #[serde(default)]
    pub benford: BenfordConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub retraining: RetrainingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming normalized transactions
    pub transaction_subject: String,
    /// Subject committed ledger entries are exported to
    pub ledger_subject: String,
}

/// Digit analysis configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenfordConfig {
    /// Groups with fewer usable amounts report insufficient data
    pub min_samples: u64,
    pub method: DeviationMethod,
    /// Transaction attribute that defines a group
    pub grouping: GroupingKey,
}

impl Default for BenfordConfig {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
            method: DeviationMethod::Mad,
            grouping: GroupingKey::Agency,
        }
    }
}

/// Outlier model configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Expected share of anomalous transactions, sets the score threshold
    pub contamination: f64,
    pub n_trees: usize,
    pub max_samples: usize,
    pub min_training_samples: usize,
    pub seed: u64,
}

impl ModelConfig {
    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            max_samples: self.max_samples,
            min_training_samples: self.min_training_samples,
            seed: self.seed,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        let params = ForestParams::default();
        Self {
            contamination: 0.06,
            n_trees: params.n_trees,
            max_samples: params.max_samples,
            min_training_samples: params.min_training_samples,
            seed: params.seed,
        }
    }
}

/// Risk tier fusion configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Group deviation above this is treated as high
    pub deviation_high_threshold: f64,
}

impl FusionConfig {
    pub fn policy(&self) -> FusionPolicy {
        FusionPolicy::new(self.deviation_high_threshold)
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            deviation_high_threshold: FusionPolicy::default().deviation_high_threshold,
        }
    }
}

/// Background retraining configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrainingConfig {
    /// Number of most recent transactions kept as the training window
    pub window_size: usize,
    /// Seconds between scheduled retrains
    pub cadence_secs: u64,
}

impl Default for RetrainingConfig {
    fn default() -> Self {
        Self {
            window_size: 5000,
            cadence_secs: 300,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scoring worker threads per batch
    pub workers: usize,
    /// Transactions per ledger commit
    pub batch_size: usize,
    /// Flush a partial batch after this many milliseconds
    pub batch_timeout_ms: u64,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 100,
            batch_timeout_ms: 1000,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Reject thresholds and windows the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.benford.min_samples == 0 {
            return Err(ConfigurationError::NotPositive {
                field: "benford.min_samples",
            });
        }
        let contamination = self.model.contamination;
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(ConfigurationError::OutOfRange {
                field: "model.contamination",
                value: contamination,
                range: "(0, 0.5]",
            });
        }
        let threshold = self.fusion.deviation_high_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigurationError::OutOfRange {
                field: "fusion.deviation_high_threshold",
                value: threshold,
                range: "[0, inf)",
            });
        }

        let positive = [
            ("model.n_trees", self.model.n_trees as u64),
            ("model.max_samples", self.model.max_samples as u64),
            ("model.min_training_samples", self.model.min_training_samples as u64),
            ("retraining.window_size", self.retraining.window_size as u64),
            ("retraining.cadence_secs", self.retraining.cadence_secs),
            ("pipeline.workers", self.pipeline.workers as u64),
            ("pipeline.batch_size", self.pipeline.batch_size as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::NotPositive { field });
            }
        }

        if self.retraining.window_size < self.model.min_training_samples {
            return Err(ConfigurationError::Invalid(format!(
                "retraining.window_size ({}) is smaller than model.min_training_samples ({})",
                self.retraining.window_size, self.model.min_training_samples
            )));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigurationError::Invalid(format!(
                "logging.format must be json or pretty, got {}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                transaction_subject: "expenditures.normalized".to_string(),
                ledger_subject: "audit.ledger".to_string(),
            },
            benford: BenfordConfig::default(),
            model: ModelConfig::default(),
            fusion: FusionConfig::default(),
            retraining: RetrainingConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
