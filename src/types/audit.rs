//! Audit ledger entry data structures

use crate::benford::DigitDistribution;
use crate::models::forest::OutlierScore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Risk tier classification, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        RiskTier::Low,
        RiskTier::Medium,
        RiskTier::High,
        RiskTier::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group-level digit deviation signal that contributed to an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationSummary {
    pub group_key: String,
    pub statistic: Option<f64>,
    pub sample_count: u64,
    pub insufficient_data: bool,
}

impl From<&DigitDistribution> for DeviationSummary {
    fn from(dist: &DigitDistribution) -> Self {
        Self {
            group_key: dist.group_key.clone(),
            statistic: dist.deviation,
            sample_count: dist.sample_count,
            insufficient_data: dist.insufficient_data,
        }
    }
}

/// Transaction-level outlier signal that contributed to an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierSummary {
    pub model_version: u64,
    pub raw_score: f64,
    pub is_outlier: bool,
}

impl From<&OutlierScore> for OutlierSummary {
    fn from(score: &OutlierScore) -> Self {
        Self {
            model_version: score.model_version,
            raw_score: score.raw_score,
            is_outlier: score.is_outlier,
        }
    }
}

/// Both contributing signals. `outlier` is absent when no model was active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub deviation: DeviationSummary,
    pub outlier: Option<OutlierSummary>,
}

/// Immutable record of one scored transaction on the audit ledger.
///
/// Field declaration order is the serialized order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Scored transaction
    pub transaction_id: String,

    /// Subject label carried over from the transaction
    pub subject: String,

    /// Fused risk tier
    pub risk_tier: RiskTier,

    /// Signals the tier was derived from
    pub signals: SignalSummary,

    /// Generation timestamp; non-decreasing along the ledger
    pub generated_at: DateTime<Utc>,

    /// Unique entry identifier
    pub entry_id: Uuid,

    /// Position in the ledger, assigned on append
    pub sequence: u64,

    /// Entry this one corrects, if any
    pub corrects: Option<Uuid>,

    /// Free-form note (correction reason)
    pub note: String,
}

impl AuditEntry {
    /// Create a new entry stamped with the current time
    pub fn new(
        transaction_id: String,
        subject: String,
        risk_tier: RiskTier,
        signals: SignalSummary,
    ) -> Self {
        Self {
            transaction_id,
            subject,
            risk_tier,
            signals,
            generated_at: Utc::now(),
            entry_id: Uuid::new_v4(),
            sequence: 0,
            corrects: None,
            note: String::new(),
        }
    }

    /// Override the generation timestamp
    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// Mark this entry as a correction of `original`
    pub fn correcting(mut self, original: Uuid, note: impl Into<String>) -> Self {
        self.corrects = Some(original);
        self.note = note.into();
        self
    }

    pub fn is_correction(&self) -> bool {
        self.corrects.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> SignalSummary {
        SignalSummary {
            deviation: DeviationSummary {
                group_key: "DOD".to_string(),
                statistic: Some(0.04),
                sample_count: 120,
                insufficient_data: false,
            },
            outlier: Some(OutlierSummary {
                model_version: 3,
                raw_score: 0.71,
                is_outlier: true,
            }),
        }
    }

    #[test]
    fn test_risk_tier_ordering() {
        assert!(RiskTier::Low < RiskTier::Medium);
        assert!(RiskTier::High < RiskTier::Critical);
        assert_eq!(RiskTier::Critical.to_string(), "critical");
    }

    #[test]
    fn test_audit_entry_serialization() {
        let entry = AuditEntry::new(
            "tx_123".to_string(),
            "DOD".to_string(),
            RiskTier::High,
            signals(),
        );

        let json = serde_json::to_string(&entry).unwrap();
        let deserialized: AuditEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(entry, deserialized);
        assert!(json.find("transaction_id").unwrap() < json.find("risk_tier").unwrap());
        assert!(json.contains("\"risk_tier\":\"high\""));
    }

    #[test]
    fn test_correction_builder() {
        let original = Uuid::new_v4();
        let entry = AuditEntry::new("tx".into(), "DOD".into(), RiskTier::Low, signals())
            .correcting(original, "false positive after manual review");
        assert!(entry.is_correction());
        assert_eq!(entry.corrects, Some(original));
    }
}
