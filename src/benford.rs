//! Leading-digit forensic analysis (Benford's Law).
//!
//! Amounts from naturally occurring financial data have leading digits that
//! follow `P(d) = log10(1 + 1/d)`. Groups whose observed frequencies drift far
//! from that curve are candidates for fabricated or structured amounts.

use crate::types::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default minimum number of usable amounts before a deviation is reported
pub const DEFAULT_MIN_SAMPLES: u64 = 30;

/// Theoretical Benford probability of leading digit `d` (1..=9)
pub fn benford_probability(d: u8) -> f64 {
    (1.0 + 1.0 / d as f64).log10()
}

/// Theoretical probabilities for digits 1 through 9
pub fn benford_expected() -> [f64; 9] {
    let mut expected = [0.0; 9];
    for (i, p) in expected.iter_mut().enumerate() {
        *p = benford_probability(i as u8 + 1);
    }
    expected
}

/// First non-zero significant digit of a positive finite amount.
///
/// Scientific formatting is exact, unlike `log10`, which misplaces powers of
/// ten such as 1000.0.
pub fn leading_digit(amount: f64) -> Option<u8> {
    if !amount.is_finite() || amount <= 0.0 {
        return None;
    }
    let formatted = format!("{:e}", amount);
    let digit = formatted.bytes().next()?.wrapping_sub(b'0');
    (1..=9).contains(&digit).then_some(digit)
}

/// Distance measure between observed and theoretical frequencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationMethod {
    /// Mean absolute deviation over the nine digits
    #[default]
    Mad,
    /// Chi-squared distance over frequencies: sum of (obs - exp)^2 / exp
    ChiSquared,
}

impl DeviationMethod {
    pub fn statistic(&self, observed: &[f64; 9]) -> f64 {
        let expected = benford_expected();
        match self {
            DeviationMethod::Mad => {
                observed
                    .iter()
                    .zip(expected.iter())
                    .map(|(o, e)| (o - e).abs())
                    .sum::<f64>()
                    / 9.0
            }
            DeviationMethod::ChiSquared => observed
                .iter()
                .zip(expected.iter())
                .map(|(o, e)| (o - e).powi(2) / e)
                .sum(),
        }
    }
}

/// Which transaction attribute partitions the digit analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingKey {
    #[default]
    Agency,
    Subject,
    Recipient,
}

impl GroupingKey {
    pub fn key_for<'a>(&self, tx: &'a Transaction) -> &'a str {
        match self {
            GroupingKey::Agency => &tx.category,
            GroupingKey::Subject => &tx.subject,
            GroupingKey::Recipient => &tx.recipient_id,
        }
    }
}

/// Partition transactions by grouping key, ordered by key.
pub fn group_transactions<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    key: GroupingKey,
) -> BTreeMap<String, Vec<&'a Transaction>> {
    let mut groups: BTreeMap<String, Vec<&'a Transaction>> = BTreeMap::new();
    for tx in transactions {
        groups.entry(key.key_for(tx).to_string()).or_default().push(tx);
    }
    groups
}

/// Mergeable per-digit counts for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitCounts {
    counts: [u64; 9],
    excluded: u64,
}

impl DigitCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_amounts(amounts: impl IntoIterator<Item = f64>) -> Self {
        let mut counts = Self::new();
        for amount in amounts {
            counts.observe(amount);
        }
        counts
    }

    /// Record one amount; unusable amounts only bump the excluded count
    pub fn observe(&mut self, amount: f64) {
        match leading_digit(amount) {
            Some(d) => self.counts[(d - 1) as usize] += 1,
            None => self.excluded += 1,
        }
    }

    pub fn merge(&mut self, other: &DigitCounts) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
        self.excluded += other.excluded;
    }

    /// Number of amounts with a usable leading digit
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn excluded(&self) -> u64 {
        self.excluded
    }

    pub fn count(&self, digit: u8) -> u64 {
        match digit {
            1..=9 => self.counts[(digit - 1) as usize],
            _ => 0,
        }
    }

    fn frequencies(&self) -> [f64; 9] {
        let total = self.total();
        let mut freq = [0.0; 9];
        if total == 0 {
            return freq;
        }
        for (f, &c) in freq.iter_mut().zip(self.counts.iter()) {
            *f = c as f64 / total as f64;
        }
        freq
    }
}

/// Observed leading-digit distribution of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitDistribution {
    pub group_key: String,
    /// Digit (1-9) to observed fraction
    pub observed: BTreeMap<u8, f64>,
    pub sample_count: u64,
    pub excluded_count: u64,
    /// `None` whenever `insufficient_data` is set
    pub deviation: Option<f64>,
    pub insufficient_data: bool,
}

impl DigitDistribution {
    pub fn frequency(&self, digit: u8) -> f64 {
        self.observed.get(&digit).copied().unwrap_or(0.0)
    }
}

/// Computes digit distributions with a fixed sample floor and statistic.
#[derive(Debug, Clone, Copy)]
pub struct DigitAnalyzer {
    min_samples: u64,
    method: DeviationMethod,
}

impl DigitAnalyzer {
    pub fn new(min_samples: u64, method: DeviationMethod) -> Self {
        Self {
            min_samples,
            method,
        }
    }

    /// Digit distribution of a set of transactions sharing `group_key`.
    pub fn compute_distribution<'a>(
        &self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
        group_key: &str,
    ) -> DigitDistribution {
        let counts = DigitCounts::from_amounts(transactions.into_iter().map(|tx| tx.amount));
        self.distribution_from_counts(&counts, group_key)
    }

    pub fn distribution_from_counts(
        &self,
        counts: &DigitCounts,
        group_key: &str,
    ) -> DigitDistribution {
        let sample_count = counts.total();
        let freq = counts.frequencies();
        let observed = freq
            .iter()
            .enumerate()
            .map(|(i, &f)| (i as u8 + 1, f))
            .collect();

        let insufficient_data = sample_count < self.min_samples || sample_count == 0;
        let deviation = (!insufficient_data).then(|| self.method.statistic(&freq));

        DigitDistribution {
            group_key: group_key.to_string(),
            observed,
            sample_count,
            excluded_count: counts.excluded(),
            deviation,
            insufficient_data,
        }
    }
}

impl Default for DigitAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SAMPLES, DeviationMethod::Mad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txs(amounts: &[f64]) -> Vec<Transaction> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, &a)| Transaction::new(format!("tx_{i}"), a, "R1", "DOD"))
            .collect()
    }

    /// Amounts whose leading digits follow Benford's probabilities to within
    /// rounding of one part in `n`.
    fn benford_amounts(n: usize) -> Vec<f64> {
        let mut amounts = Vec::with_capacity(n);
        for d in 1..=9u8 {
            let count = (benford_probability(d) * n as f64).round() as usize;
            amounts.extend(std::iter::repeat(d as f64 * 100.0).take(count));
        }
        amounts
    }

    #[test]
    fn test_leading_digit() {
        assert_eq!(leading_digit(1000.0), Some(1));
        assert_eq!(leading_digit(0.00472), Some(4));
        assert_eq!(leading_digit(987_654.32), Some(9));
        assert_eq!(leading_digit(0.0), None);
        assert_eq!(leading_digit(-50.0), None);
        assert_eq!(leading_digit(f64::INFINITY), None);
    }

    #[test]
    fn test_expected_probabilities_sum_to_one() {
        let sum: f64 = benford_expected().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!((benford_probability(1) - 0.30103).abs() < 1e-5);
    }

    #[test]
    fn test_frequencies_sum_to_one() {
        let analyzer = DigitAnalyzer::default();
        let amounts: Vec<f64> = (1..=500).map(|i| (i * 37) as f64 + 0.5).collect();
        let dist = analyzer.compute_distribution(&txs(&amounts), "DOD");

        assert_eq!(dist.sample_count, 500);
        let sum: f64 = dist.observed.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_benford_has_near_zero_deviation() {
        let analyzer = DigitAnalyzer::default();
        let dist = analyzer.compute_distribution(&txs(&benford_amounts(1_000_000)), "DOD");

        assert!(!dist.insufficient_data);
        for d in 1..=9 {
            assert!((dist.frequency(d) - benford_probability(d)).abs() < 1e-5, "digit {d}");
        }
        assert!(dist.deviation.unwrap() < 1e-5);

        let chi = DigitAnalyzer::new(30, DeviationMethod::ChiSquared)
            .compute_distribution(&txs(&benford_amounts(1_000_000)), "DOD");
        assert!(chi.deviation.unwrap() < 1e-8);
    }

    #[test]
    fn test_insufficient_data_never_reports_statistic() {
        let analyzer = DigitAnalyzer::default();
        let dist = analyzer.compute_distribution(&txs(&[120.0, 340.0, 18.0]), "HHS");

        assert!(dist.insufficient_data);
        assert_eq!(dist.deviation, None);
        assert_eq!(dist.sample_count, 3);
    }

    #[test]
    fn test_empty_group_is_insufficient() {
        let empty: Vec<Transaction> = Vec::new();
        let analyzer = DigitAnalyzer::new(0, DeviationMethod::Mad);
        let dist = analyzer.compute_distribution(&empty, "EMPTY");
        assert!(dist.insufficient_data);
        assert_eq!(dist.deviation, None);
    }

    #[test]
    fn test_skewed_group_has_positive_deviation() {
        let base = [100.0, 200.0, 150.0, 130.0, 190.0, 110.0, 170.0, 140.0];
        let amounts: Vec<f64> = (0..30)
            .map(|i| base[i % base.len()] + (i / base.len()) as f64)
            .collect();
        let dist = DigitAnalyzer::default().compute_distribution(&txs(&amounts), "DOD");

        assert!(!dist.insufficient_data);
        assert_eq!(dist.sample_count, 30);
        assert!(dist.frequency(1) > 0.8);
        assert!(dist.deviation.unwrap() > 0.1);
    }

    #[test]
    fn test_non_positive_amounts_excluded() {
        let mut amounts = benford_amounts(100);
        amounts.extend([0.0, -12.0, -900.0]);
        let dist = DigitAnalyzer::default().compute_distribution(&txs(&amounts), "DOD");

        assert_eq!(dist.excluded_count, 3);
        assert_eq!(dist.sample_count, amounts.len() as u64 - 3);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let analyzer = DigitAnalyzer::default();
        let set = txs(&benford_amounts(300));
        assert_eq!(
            analyzer.compute_distribution(&set, "DOD"),
            analyzer.compute_distribution(&set, "DOD")
        );
    }

    #[test]
    fn test_merged_counts_match_single_pass() {
        let a = DigitCounts::from_amounts([12.0, 31.0, 450.0]);
        let b = DigitCounts::from_amounts([19.0, -1.0]);
        let mut merged = a;
        merged.merge(&b);

        assert_eq!(merged, DigitCounts::from_amounts([12.0, 31.0, 450.0, 19.0, -1.0]));
        assert_eq!(merged.count(1), 2);
        assert_eq!(merged.excluded(), 1);
    }

    #[test]
    fn test_group_transactions() {
        let set = vec![
            Transaction::new("a", 10.0, "R1", "DOD"),
            Transaction::new("b", 20.0, "R2", "HHS"),
            Transaction::new("c", 30.0, "R1", "DOD"),
        ];
        let by_agency = group_transactions(&set, GroupingKey::Agency);
        assert_eq!(by_agency["DOD"].len(), 2);

        let by_recipient = group_transactions(&set, GroupingKey::Recipient);
        assert_eq!(by_recipient["R2"].len(), 1);
    }
}
