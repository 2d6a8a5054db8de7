//! Pipeline counters and periodic summaries.

use crate::types::audit::RiskTier;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline activity
pub struct PipelineMetrics {
    /// Transactions that reached the ledger
    pub transactions_scored: AtomicU64,
    /// Records rejected at validation
    pub records_skipped: AtomicU64,
    /// Transactions already present on the ledger
    pub duplicates_skipped: AtomicU64,
    pub batches_committed: AtomicU64,
    pub batches_rolled_back: AtomicU64,
    pub retrains_succeeded: AtomicU64,
    pub retrains_failed: AtomicU64,
    entries_by_tier: RwLock<HashMap<RiskTier, u64>>,
    /// Sum of committed amounts
    capital_analyzed: RwLock<f64>,
    /// Batch processing times (in microseconds)
    batch_times: RwLock<Vec<u64>>,
    /// Outlier score distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            transactions_scored: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            batches_rolled_back: AtomicU64::new(0),
            retrains_succeeded: AtomicU64::new(0),
            retrains_failed: AtomicU64::new(0),
            entries_by_tier: RwLock::new(HashMap::new()),
            capital_analyzed: RwLock::new(0.0),
            batch_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record one committed ledger entry
    pub fn record_entry(&self, tier: RiskTier, amount: f64, outlier_score: Option<f64>) {
        self.transactions_scored.fetch_add(1, Ordering::Relaxed);
        *self.entries_by_tier.write().entry(tier).or_insert(0) += 1;
        if amount > 0.0 {
            *self.capital_analyzed.write() += amount;
        }
        if let Some(score) = outlier_score {
            let bucket = (score * 10.0).clamp(0.0, 9.0) as usize;
            self.score_buckets.write()[bucket] += 1;
        }
    }

    pub fn record_skipped(&self, count: u64) {
        self.records_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_duplicates(&self, count: u64) {
        self.duplicates_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_batch(&self, committed: bool, processing_time: Duration) {
        if committed {
            self.batches_committed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batches_rolled_back.fetch_add(1, Ordering::Relaxed);
        }
        let mut times = self.batch_times.write();
        times.push(processing_time.as_micros() as u64);
        // Keep only last 10000 for memory efficiency
        if times.len() > 10000 {
            times.drain(0..5000);
        }
    }

    pub fn record_retrain(&self, succeeded: bool) {
        if succeeded {
            self.retrains_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.retrains_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        let times = self.batch_times.read();
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[((count as f64 * 0.95) as usize).min(count - 1)],
            p99_us: sorted[((count as f64 * 0.99) as usize).min(count - 1)],
            max_us: sorted[count - 1],
        }
    }

    pub fn get_capital_analyzed(&self) -> f64 {
        *self.capital_analyzed.read()
    }

    pub fn get_entries_by_tier(&self) -> HashMap<RiskTier, u64> {
        self.entries_by_tier.read().clone()
    }

    /// Entries at High or Critical
    pub fn flagged_count(&self) -> u64 {
        self.entries_by_tier
            .read()
            .iter()
            .filter(|(tier, _)| **tier >= RiskTier::High)
            .map(|(_, count)| count)
            .sum()
    }

    /// Current throughput (transactions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        *self.score_buckets.read()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let scored = self.transactions_scored.load(Ordering::Relaxed);
        let flagged = self.flagged_count();
        let flag_rate = if scored > 0 {
            (flagged as f64 / scored as f64) * 100.0
        } else {
            0.0
        };
        let processing = self.get_processing_stats();
        let by_tier = self.get_entries_by_tier();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            EXPENDITURE AUDIT PIPELINE - SUMMARY              ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Transactions Scored: {:>9}  │  Throughput: {:>6.1} tx/s ║",
            scored,
            self.get_throughput()
        );
        info!(
            "║ Capital Analyzed: ${:>20.2}                        ║",
            self.get_capital_analyzed()
        );
        info!(
            "║ Flagged (high+):     {:>9}  │  Flag Rate: {:>6.1}%      ║",
            flagged, flag_rate
        );
        info!(
            "║ Skipped: {:>6}  Duplicates: {:>6}  Rolled back: {:>6}     ║",
            self.records_skipped.load(Ordering::Relaxed),
            self.duplicates_skipped.load(Ordering::Relaxed),
            self.batches_rolled_back.load(Ordering::Relaxed)
        );
        info!(
            "║ Retrains: {:>4} ok / {:>4} failed                              ║",
            self.retrains_succeeded.load(Ordering::Relaxed),
            self.retrains_failed.load(Ordering::Relaxed)
        );
        info!(
            "║ Batch Time (μs): mean={:>6} p50={:>6} p95={:>6} p99={:>6} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        for tier in RiskTier::ALL {
            let count = by_tier.get(&tier).copied().unwrap_or(0);
            info!(
                "║   {:10}: {:>8}                                        ║",
                tier.as_str(),
                count
            );
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Outlier Score Distribution:                                  ║");
        let dist = self.get_score_distribution();
        let total: u64 = dist.iter().sum();
        for (i, &count) in dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
