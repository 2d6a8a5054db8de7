//! Risk fusion: group digit deviation + transaction outlier score -> tier.

use crate::benford::DigitDistribution;
use crate::models::forest::OutlierScore;
use crate::types::audit::RiskTier;
use serde::{Deserialize, Serialize};

/// Group-level deviation signal as seen by fusion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeviationSignal {
    /// Group had fewer samples than the analysis minimum
    InsufficientData,
    Statistic(f64),
}

impl From<&DigitDistribution> for DeviationSignal {
    fn from(dist: &DigitDistribution) -> Self {
        match dist.deviation {
            Some(stat) if !dist.insufficient_data => DeviationSignal::Statistic(stat),
            _ => DeviationSignal::InsufficientData,
        }
    }
}

/// Fusion thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionPolicy {
    /// Group deviation strictly above this counts as high
    pub deviation_high_threshold: f64,
}

impl FusionPolicy {
    pub fn new(deviation_high_threshold: f64) -> Self {
        Self {
            deviation_high_threshold,
        }
    }

    fn deviation_is_high(&self, deviation: DeviationSignal) -> bool {
        match deviation {
            DeviationSignal::Statistic(stat) => stat > self.deviation_high_threshold,
            DeviationSignal::InsufficientData => false,
        }
    }

    /// Combine both signals into a tier. Rules apply in order:
    /// outlier with high deviation is Critical, any other outlier is High,
    /// high deviation alone is Medium, anything else is Low.
    ///
    /// A missing outlier score (no model trained yet) counts as not flagged.
    pub fn fuse(&self, deviation: DeviationSignal, outlier: Option<&OutlierScore>) -> RiskTier {
        let flagged = outlier.is_some_and(|o| o.is_outlier);
        let high_deviation = self.deviation_is_high(deviation);

        match (flagged, high_deviation) {
            (true, true) => RiskTier::Critical,
            (true, false) => RiskTier::High,
            (false, true) => RiskTier::Medium,
            (false, false) => RiskTier::Low,
        }
    }
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self::new(0.015)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outlier(flagged: bool) -> OutlierScore {
        OutlierScore {
            transaction_id: "tx_1".to_string(),
            model_version: 1,
            raw_score: if flagged { 0.8 } else { 0.4 },
            is_outlier: flagged,
        }
    }

    #[test]
    fn test_fusion_table() {
        let policy = FusionPolicy::new(0.02);
        let high = DeviationSignal::Statistic(0.05);
        let low = DeviationSignal::Statistic(0.01);
        let none = DeviationSignal::InsufficientData;

        assert_eq!(policy.fuse(high, Some(&outlier(true))), RiskTier::Critical);
        assert_eq!(policy.fuse(low, Some(&outlier(true))), RiskTier::High);
        assert_eq!(policy.fuse(none, Some(&outlier(true))), RiskTier::High);
        assert_eq!(policy.fuse(high, Some(&outlier(false))), RiskTier::Medium);
        assert_eq!(policy.fuse(low, Some(&outlier(false))), RiskTier::Low);
        assert_eq!(policy.fuse(none, Some(&outlier(false))), RiskTier::Low);
    }

    #[test]
    fn test_threshold_is_strict() {
        let policy = FusionPolicy::new(0.02);
        assert_eq!(
            policy.fuse(DeviationSignal::Statistic(0.02), Some(&outlier(false))),
            RiskTier::Low
        );
    }

    #[test]
    fn test_missing_model_counts_as_not_flagged() {
        let policy = FusionPolicy::new(0.02);
        assert_eq!(policy.fuse(DeviationSignal::Statistic(0.3), None), RiskTier::Medium);
        assert_eq!(policy.fuse(DeviationSignal::InsufficientData, None), RiskTier::Low);
    }

    #[test]
    fn test_fuse_is_pure() {
        let policy = FusionPolicy::default();
        let signals = [
            DeviationSignal::Statistic(0.0),
            DeviationSignal::Statistic(0.5),
            DeviationSignal::InsufficientData,
        ];
        for deviation in signals {
            for flagged in [true, false] {
                let score = outlier(flagged);
                let first = policy.fuse(deviation, Some(&score));
                for _ in 0..10 {
                    assert_eq!(policy.fuse(deviation, Some(&score)), first);
                }
            }
        }
    }

    #[test]
    fn test_signal_from_distribution() {
        let dist = DigitDistribution {
            group_key: "DOD".to_string(),
            observed: Default::default(),
            sample_count: 4,
            excluded_count: 0,
            deviation: None,
            insufficient_data: true,
        };
        assert_eq!(DeviationSignal::from(&dist), DeviationSignal::InsufficientData);
    }
}
