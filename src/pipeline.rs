//! Batch scoring pipeline.
//!
//! `AuditPipeline` is the single application state object: configuration,
//! model manager, ledger, metrics, committed per-group digit counts and the
//! rolling training window. A batch is the unit of commit. Group counts, the
//! training window and the ledger only change if every entry of the batch lands.

use crate::benford::{
    group_transactions, DigitAnalyzer, DigitCounts, DigitDistribution, GroupingKey,
};
use crate::config::AppConfig;
use crate::error::{ConfigurationError, PipelineError, TrainingError};
use crate::fusion::{DeviationSignal, FusionPolicy};
use crate::ledger::AuditLedger;
use crate::metrics::PipelineMetrics;
use crate::models::forest::{self, OutlierScore, ScoringModel};
use crate::models::lifecycle::{ModelLifecycleManager, RollingWindow};
use crate::types::audit::{AuditEntry, DeviationSummary, OutlierSummary, SignalSummary};
use crate::types::transaction::{RawTransaction, Transaction};
use chrono::Utc;
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one committed batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub received: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub entries: Vec<Arc<AuditEntry>>,
    /// Distributions of the groups touched by the batch, after the batch
    pub distributions: Vec<DigitDistribution>,
    pub model_version: Option<u64>,
}

pub struct AuditPipeline {
    analyzer: DigitAnalyzer,
    grouping: GroupingKey,
    policy: FusionPolicy,
    /// Scoring workers, sized by `pipeline.workers`
    pool: ThreadPool,
    min_training_samples: usize,
    models: Arc<ModelLifecycleManager>,
    ledger: Arc<AuditLedger>,
    metrics: Arc<PipelineMetrics>,
    /// Committed digit counts per group; also serializes batches
    group_counts: Mutex<HashMap<String, DigitCounts>>,
    window: Arc<Mutex<RollingWindow>>,
}

impl AuditPipeline {
    /// Build the pipeline. Invalid configuration is fatal.
    pub fn new(config: &AppConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.pipeline.workers)
            .thread_name(|i| format!("audit-scorer-{i}"))
            .build()
            .map_err(|e| ConfigurationError::Invalid(format!("scoring pool: {e}")))?;

        let metrics = Arc::new(PipelineMetrics::new());
        let models =
            Arc::new(ModelLifecycleManager::new(&config.model).with_metrics(metrics.clone()));

        Ok(Self {
            analyzer: DigitAnalyzer::new(config.benford.min_samples, config.benford.method),
            grouping: config.benford.grouping,
            policy: config.fusion.policy(),
            pool,
            min_training_samples: config.model.min_training_samples,
            models,
            ledger: Arc::new(AuditLedger::new()),
            metrics,
            group_counts: Mutex::new(HashMap::new()),
            window: Arc::new(Mutex::new(RollingWindow::new(config.retraining.window_size))),
        })
    }

    pub fn models(&self) -> &Arc<ModelLifecycleManager> {
        &self.models
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn window(&self) -> &Arc<Mutex<RollingWindow>> {
        &self.window
    }

    /// Committed distribution of one group
    pub fn group_distribution(&self, group_key: &str) -> Option<DigitDistribution> {
        self.group_counts
            .lock()
            .get(group_key)
            .map(|counts| self.analyzer.distribution_from_counts(counts, group_key))
    }

    /// Retrain on the current window; the prior model stays on failure.
    pub async fn retrain_now(&self) -> Result<u64, TrainingError> {
        let snapshot = self.window.lock().snapshot();
        self.models.retrain(snapshot).await
    }

    /// Validate, score, fuse and commit one batch of raw records.
    ///
    /// Invalid records and transactions already on the ledger are skipped and
    /// counted. Any batch-level failure leaves the ledger, the group
    /// statistics and the training window untouched.
    pub fn process_batch(&self, batch: Vec<RawTransaction>) -> Result<BatchReport, PipelineError> {
        let start = Instant::now();
        let mut report = BatchReport {
            received: batch.len(),
            ..BatchReport::default()
        };

        let mut seen = HashSet::new();
        let mut transactions = Vec::with_capacity(batch.len());
        for raw in batch {
            match Transaction::try_from(raw) {
                Ok(tx) => {
                    if self.ledger.contains_transaction(&tx.transaction_id)
                        || !seen.insert(tx.transaction_id.clone())
                    {
                        report.duplicates += 1;
                        continue;
                    }
                    transactions.push(tx);
                }
                Err(e) => {
                    warn!(error = %e, "Skipping invalid transaction record");
                    report.skipped += 1;
                }
            }
        }

        let mut group_counts = self.group_counts.lock();

        let mut staged_counts: HashMap<String, DigitCounts> = HashMap::new();
        let mut distributions: HashMap<String, DigitDistribution> = HashMap::new();
        for (key, members) in group_transactions(&transactions, self.grouping) {
            let mut counts = group_counts.get(&key).copied().unwrap_or_default();
            counts.merge(&DigitCounts::from_amounts(members.iter().map(|tx| tx.amount)));
            let distribution = self.analyzer.distribution_from_counts(&counts, &key);
            distributions.insert(key.clone(), distribution);
            staged_counts.insert(key, counts);
        }

        let model = self.models.active_model();
        report.model_version = model.as_ref().map(|m| m.version);

        let scores = match self.score_all(&transactions, model.as_deref()) {
            Ok(scores) => scores,
            Err(e) => {
                self.metrics.record_batch(false, start.elapsed());
                return Err(e);
            }
        };

        let mut staged = self.ledger.begin_batch();
        for (tx, outlier) in transactions.iter().zip(scores.iter()) {
            let key = self.grouping.key_for(tx);
            let Some(distribution) = distributions.get(key) else {
                continue;
            };
            let tier = self
                .policy
                .fuse(DeviationSignal::from(distribution), outlier.as_ref());

            let signals = SignalSummary {
                deviation: DeviationSummary::from(distribution),
                outlier: outlier.as_ref().map(OutlierSummary::from),
            };
            staged.push(
                AuditEntry::new(tx.transaction_id.clone(), tx.subject.clone(), tier, signals)
                    .generated_at(Utc::now()),
            );
        }

        let staged_len = staged.len();
        let committed = match staged.commit() {
            Ok(committed) => committed,
            Err(e) => {
                warn!(
                    error = %e,
                    staged = staged_len,
                    "Ledger rejected batch, rolling back"
                );
                self.metrics.record_batch(false, start.elapsed());
                return Err(e.into());
            }
        };

        group_counts.extend(staged_counts);
        drop(group_counts);

        self.metrics.record_skipped(report.skipped as u64);
        self.metrics.record_duplicates(report.duplicates as u64);
        for ((tx, entry), outlier) in transactions.iter().zip(&committed).zip(&scores) {
            let raw_score = outlier.as_ref().map(|o| o.raw_score);
            self.metrics.record_entry(entry.risk_tier, tx.amount, raw_score);
        }
        let window_len = {
            let mut window = self.window.lock();
            window.extend(transactions);
            window.len()
        };
        self.metrics.record_batch(true, start.elapsed());

        debug!(
            committed = committed.len(),
            skipped = report.skipped,
            duplicates = report.duplicates,
            model_version = ?report.model_version,
            "Batch committed"
        );

        if model.is_none() && window_len >= self.min_training_samples {
            self.bootstrap_model();
        }

        report.entries = committed;
        let mut distributions: Vec<DigitDistribution> = distributions.into_values().collect();
        distributions.sort_by(|a, b| a.group_key.cmp(&b.group_key));
        report.distributions = distributions;
        Ok(report)
    }

    /// Score every transaction against one model snapshot on the scoring pool.
    fn score_all(
        &self,
        transactions: &[Transaction],
        model: Option<&ScoringModel>,
    ) -> Result<Vec<Option<OutlierScore>>, PipelineError> {
        let Some(model) = model else {
            return Ok(vec![None; transactions.len()]);
        };

        panic::catch_unwind(AssertUnwindSafe(|| {
            self.pool.install(|| {
                transactions
                    .par_iter()
                    .map(|tx| Some(forest::score(tx, model)))
                    .collect()
            })
        }))
        .map_err(|_| PipelineError::WorkerPanicked)
    }

    /// Train the first model once the window holds enough history.
    fn bootstrap_model(&self) {
        let snapshot = self.window.lock().snapshot();
        match self.models.retrain_blocking(&snapshot) {
            Ok(version) => {
                info!(version = version, samples = snapshot.len(), "Initial model trained")
            }
            Err(e) => debug!(error = %e, "Initial model not trained yet"),
        }
    }
}
