//! Feature extraction for outlier scoring.
//!
//! Features that depend on population statistics (how often a recipient
//! appears, how recently it was paid) are frozen into a [`FeatureProfile`] at
//! training time. Extraction then needs only the transaction and the profile,
//! which keeps scoring transaction-local.

use crate::types::transaction::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const FEATURE_COUNT: usize = 4;

/// Model input for one transaction, in [`FeatureExtractor::feature_names`] order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Population statistics captured from a training window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProfile {
    /// Share of training transactions paid to each recipient
    recipient_frequency: HashMap<String, f64>,
    /// Share of training transactions in each category
    category_frequency: HashMap<String, f64>,
    /// Days between a recipient's last payment and the window end
    recipient_recency_days: HashMap<String, f64>,
    /// Recency used for recipients never seen during training
    unseen_recency_days: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl FeatureProfile {
    /// Extract the feature vector of a single transaction.
    pub fn extract(&self, tx: &Transaction) -> FeatureVector {
        let recipient_frequency = self
            .recipient_frequency
            .get(&tx.recipient_id)
            .copied()
            .unwrap_or(0.0);
        let category_frequency = self
            .category_frequency
            .get(&tx.category)
            .copied()
            .unwrap_or(0.0);
        let recency = self
            .recipient_recency_days
            .get(&tx.recipient_id)
            .copied()
            .unwrap_or(self.unseen_recency_days);

        FeatureVector([tx.amount, recipient_frequency, category_frequency, recency])
    }
}

/// Fits feature profiles over training windows.
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Capture population statistics from a non-empty training set.
    pub fn fit(&self, training: &[Transaction]) -> FeatureProfile {
        let now = Utc::now();
        let window_start = training.iter().map(|tx| tx.timestamp).min().unwrap_or(now);
        let window_end = training.iter().map(|tx| tx.timestamp).max().unwrap_or(now);
        let n = training.len().max(1) as f64;

        let mut recipient_counts: HashMap<String, u64> = HashMap::new();
        let mut category_counts: HashMap<String, u64> = HashMap::new();
        let mut last_seen: HashMap<String, DateTime<Utc>> = HashMap::new();

        for tx in training {
            *recipient_counts.entry(tx.recipient_id.clone()).or_insert(0) += 1;
            *category_counts.entry(tx.category.clone()).or_insert(0) += 1;
            last_seen
                .entry(tx.recipient_id.clone())
                .and_modify(|seen| *seen = (*seen).max(tx.timestamp))
                .or_insert(tx.timestamp);
        }

        let days = |from: DateTime<Utc>| (window_end - from).num_seconds() as f64 / 86_400.0;

        FeatureProfile {
            recipient_frequency: recipient_counts
                .into_iter()
                .map(|(k, c)| (k, c as f64 / n))
                .collect(),
            category_frequency: category_counts
                .into_iter()
                .map(|(k, c)| (k, c as f64 / n))
                .collect(),
            recipient_recency_days: last_seen.into_iter().map(|(k, t)| (k, days(t))).collect(),
            unseen_recency_days: days(window_start),
            window_start,
            window_end,
        }
    }

    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn feature_names(&self) -> [&'static str; FEATURE_COUNT] {
        [
            "amount",
            "recipient_frequency",
            "category_frequency",
            "recipient_recency_days",
        ]
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window() -> Vec<Transaction> {
        let t0 = Utc::now() - Duration::days(10);
        vec![
            Transaction::new("a", 100.0, "R1", "DOD").at(t0),
            Transaction::new("b", 200.0, "R1", "DOD").at(t0 + Duration::days(4)),
            Transaction::new("c", 300.0, "R2", "HHS").at(t0 + Duration::days(10)),
            Transaction::new("d", 400.0, "R3", "DOD").at(t0 + Duration::days(2)),
        ]
    }

    #[test]
    fn test_feature_extraction() {
        let extractor = FeatureExtractor::new();
        let training = window();
        let profile = extractor.fit(&training);

        let features = profile.extract(&training[0]);
        assert_eq!(features.as_slice().len(), extractor.feature_count());
        assert_eq!(features.get(0), 100.0);
        assert_eq!(features.get(1), 0.5);
        assert_eq!(features.get(2), 0.75);
        assert!((features.get(3) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_unseen_recipient_and_category() {
        let profile = FeatureExtractor::new().fit(&window());
        let tx = Transaction::new("z", 5.0, "NEW", "NASA");
        let features = profile.extract(&tx);

        assert_eq!(features.get(1), 0.0);
        assert_eq!(features.get(2), 0.0);
        assert!((features.get(3) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_feature_names() {
        let extractor = FeatureExtractor::new();
        assert_eq!(extractor.feature_names().len(), extractor.feature_count());
    }
}
