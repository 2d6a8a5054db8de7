//! Model versioning, retraining and hot-swap.
//!
//! The active model is an `Arc<ScoringModel>` behind a lock that is only held
//! for the pointer read or the pointer swap. Scorers clone the `Arc` and keep
//! using their version after a swap; the superseded model is freed when the
//! last of those handles drops.

use crate::config::{ModelConfig, RetrainingConfig};
use crate::error::TrainingError;
use crate::metrics::PipelineMetrics;
use crate::models::forest::{self, ForestParams, ScoringModel};
use crate::types::transaction::Transaction;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Metadata kept for every model version that was ever active
#[derive(Debug, Clone, Serialize)]
pub struct ModelVersionInfo {
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sample_count: usize,
    pub threshold: f64,
    pub retired_at: Option<DateTime<Utc>>,
}

impl From<&ScoringModel> for ModelVersionInfo {
    fn from(model: &ScoringModel) -> Self {
        Self {
            version: model.version,
            trained_at: model.trained_at,
            window_start: model.window_start,
            window_end: model.window_end,
            sample_count: model.sample_count,
            threshold: model.threshold,
            retired_at: None,
        }
    }
}

/// Owns the active scoring model and its version history.
pub struct ModelLifecycleManager {
    active: RwLock<Option<Arc<ScoringModel>>>,
    history: RwLock<Vec<ModelVersionInfo>>,
    /// Superseded versions, observable until their last scorer finishes
    retired: Mutex<Vec<Weak<ScoringModel>>>,
    next_version: AtomicU64,
    contamination: f64,
    params: ForestParams,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl ModelLifecycleManager {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            active: RwLock::new(None),
            history: RwLock::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            next_version: AtomicU64::new(1),
            contamination: config.contamination,
            params: config.forest_params(),
            metrics: None,
        }
    }

    /// Report retrain outcomes to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current model, or `None` before the first successful training
    pub fn active_model(&self) -> Option<Arc<ScoringModel>> {
        self.active.read().clone()
    }

    pub fn active_version(&self) -> Option<u64> {
        self.active.read().as_ref().map(|m| m.version)
    }

    pub fn history(&self) -> Vec<ModelVersionInfo> {
        self.history.read().clone()
    }

    /// Number of superseded versions still referenced by in-flight scorers
    pub fn retired_in_use(&self) -> usize {
        let mut retired = self.retired.lock();
        retired.retain(|weak| weak.strong_count() > 0);
        retired.len()
    }

    /// Train synchronously and swap on success.
    pub fn retrain_blocking(&self, window: &[Transaction]) -> Result<u64, TrainingError> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let result = forest::train(window, self.contamination, &self.params, version);
        self.finish_retrain(result)
    }

    /// Train on a blocking worker and swap on success.
    ///
    /// On failure the current model stays active and the error is returned
    /// for reporting.
    pub async fn retrain(&self, window: Vec<Transaction>) -> Result<u64, TrainingError> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let contamination = self.contamination;
        let params = self.params.clone();

        let result = tokio::task::spawn_blocking(move || {
            forest::train(&window, contamination, &params, version)
        })
        .await
        .unwrap_or_else(|e| Err(TrainingError::Aborted(e.to_string())));

        self.finish_retrain(result)
    }

    fn finish_retrain(
        &self,
        result: Result<ScoringModel, TrainingError>,
    ) -> Result<u64, TrainingError> {
        let installed = result.and_then(|model| {
            let version = model.version;
            self.install(model).map(|()| version)
        });
        match installed {
            Ok(version) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_retrain(true);
                }
                Ok(version)
            }
            Err(e) => {
                error!(
                    error = %e,
                    active_version = ?self.active_version(),
                    "Retraining failed, keeping current model"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_retrain(false);
                }
                Err(e)
            }
        }
    }

    /// Swap `model` in unless a newer version is already active.
    fn install(&self, model: ScoringModel) -> Result<(), TrainingError> {
        let info = ModelVersionInfo::from(&model);
        let features = model.active_feature_names();
        let model = Arc::new(model);

        let previous = {
            let mut active = self.active.write();
            if let Some(current) = active.as_ref() {
                if current.version > model.version {
                    warn!(
                        candidate = model.version,
                        active = current.version,
                        "Discarding stale model, newer version already active"
                    );
                    return Err(TrainingError::Superseded {
                        candidate: model.version,
                        active: current.version,
                    });
                }
            }
            active.replace(model)
        };

        let now = Utc::now();
        {
            let mut history = self.history.write();
            if let Some(prev) = &previous {
                if let Some(entry) = history.iter_mut().find(|h| h.version == prev.version) {
                    entry.retired_at = Some(now);
                }
            }
            history.push(info.clone());
        }

        if let Some(prev) = previous {
            self.retired.lock().push(Arc::downgrade(&prev));
            info!(
                version = info.version,
                retired = prev.version,
                threshold = info.threshold,
                samples = info.sample_count,
                features = ?features,
                "Activated new scoring model"
            );
        } else {
            info!(
                version = info.version,
                threshold = info.threshold,
                samples = info.sample_count,
                features = ?features,
                "Activated initial scoring model"
            );
        }
        Ok(())
    }
}

/// Bounded buffer of the most recent valid transactions.
pub struct RollingWindow {
    buffer: VecDeque<Transaction>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(65_536)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, tx: Transaction) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(tx);
    }

    pub fn extend(&mut self, txs: impl IntoIterator<Item = Transaction>) {
        for tx in txs {
            self.push(tx);
        }
    }

    pub fn snapshot(&self) -> Vec<Transaction> {
        self.buffer.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Retrain from `window` every `cadence` until the task is aborted.
pub fn spawn_retrain_loop(
    manager: Arc<ModelLifecycleManager>,
    window: Arc<Mutex<RollingWindow>>,
    config: &RetrainingConfig,
) -> JoinHandle<()> {
    let cadence = Duration::from_secs(config.cadence_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cadence);
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = window.lock().snapshot();
            if let Ok(version) = manager.retrain(snapshot).await {
                info!(version = version, "Scheduled retrain complete");
            }
        }
    })
}
