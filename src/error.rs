//! Error taxonomy for the audit pipeline.
//!
//! Only [`ConfigurationError`] is fatal. Everything else is local to a record,
//! a retrain attempt or a batch, and the pipeline keeps running.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A malformed or incomplete transaction record. The record is skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error("field `{field}` is blank")]
    BlankField { field: &'static str },
    #[error("amount {amount} is not a finite number")]
    NonFiniteAmount { amount: f64 },
}

/// Model training preconditions were not met. The previous model stays active.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error("training set has {actual} samples, at least {required} required")]
    InsufficientSamples { actual: usize, required: usize },
    #[error("feature `{feature}` has zero variance across the training set")]
    DegenerateFeature { feature: &'static str },
    #[error("contamination rate {rate} outside (0, 0.5]")]
    InvalidContamination { rate: f64 },
    #[error("candidate version {candidate} superseded by active version {active}")]
    Superseded { candidate: u64, active: u64 },
    #[error("training task failed: {0}")]
    Aborted(String),
}

/// An append would break the ledger's non-decreasing timestamp order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entry timestamp {attempted} precedes ledger tail {tail}")]
pub struct OrderingError {
    pub attempted: DateTime<Utc>,
    pub tail: DateTime<Utc>,
}

/// Invalid threshold or window configuration. The pipeline does not start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
    #[error("{field} = {value} is outside {range}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        range: &'static str,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Failure of a whole batch. Nothing from the batch reaches the ledger.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error("scoring worker panicked while processing batch")]
    WorkerPanicked,
    #[error("unknown ledger entry {0}")]
    UnknownEntry(uuid::Uuid),
}

impl PipelineError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Ordering(_) => "ordering",
            Self::WorkerPanicked => "worker_panicked",
            Self::UnknownEntry(_) => "unknown_entry",
        }
    }
}
