//! Expenditure transaction records

use crate::error::DataError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized government expenditure transaction.
///
/// Amounts are kept as `f64`: every downstream consumer (digit extraction,
/// feature vectors) works in floating point anyway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique award/transaction identifier
    pub transaction_id: String,

    /// Obligated amount. Non-positive amounts are still scored for outliers
    /// but never enter the digit analysis.
    pub amount: f64,

    /// When the transaction was recorded
    pub timestamp: DateTime<Utc>,

    /// Recipient identifier
    pub recipient_id: String,

    /// Awarding agency or spending category code
    pub category: String,

    /// Subject label used by reporting (program, office, investigation)
    pub subject: String,
}

impl Transaction {
    /// Create a new transaction stamped with the current time
    pub fn new(
        transaction_id: impl Into<String>,
        amount: f64,
        recipient_id: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let category = category.into();
        Self {
            transaction_id: transaction_id.into(),
            amount,
            timestamp: Utc::now(),
            recipient_id: recipient_id.into(),
            subject: category.clone(),
            category,
        }
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Override the subject label
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}

/// Transaction as received from the ingestion boundary, before validation.
///
/// Field aliases accept the column names used by the USAspending award feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default, alias = "Award ID")]
    pub transaction_id: Option<String>,

    #[serde(default, alias = "Amount", alias = "Award Amount")]
    pub amount: Option<f64>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, alias = "Recipient Name")]
    pub recipient_id: Option<String>,

    #[serde(default, alias = "Awarding Agency")]
    pub category: Option<String>,

    /// Falls back to `category` when absent
    #[serde(default)]
    pub subject: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DataError> {
    let value = value.ok_or(DataError::MissingField { field })?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DataError::BlankField { field });
    }
    Ok(trimmed.to_string())
}

impl TryFrom<RawTransaction> for Transaction {
    type Error = DataError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let transaction_id = required(raw.transaction_id, "transaction_id")?;
        let amount = raw.amount.ok_or(DataError::MissingField { field: "amount" })?;
        if !amount.is_finite() {
            return Err(DataError::NonFiniteAmount { amount });
        }
        let timestamp = raw
            .timestamp
            .ok_or(DataError::MissingField { field: "timestamp" })?;
        let recipient_id = required(raw.recipient_id, "recipient_id")?;
        let category = required(raw.category, "category")?;
        let subject = match raw.subject {
            Some(subject) if !subject.trim().is_empty() => subject.trim().to_string(),
            _ => category.clone(),
        };

        Ok(Self {
            transaction_id,
            amount,
            timestamp,
            recipient_id,
            category,
            subject,
        })
    }
}

impl From<Transaction> for RawTransaction {
    fn from(tx: Transaction) -> Self {
        Self {
            transaction_id: Some(tx.transaction_id),
            amount: Some(tx.amount),
            timestamp: Some(tx.timestamp),
            recipient_id: Some(tx.recipient_id),
            category: Some(tx.category),
            subject: Some(tx.subject),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawTransaction {
        RawTransaction {
            transaction_id: Some("W91-0001".to_string()),
            amount: Some(1250.0),
            timestamp: Some(Utc::now()),
            recipient_id: Some("ACME CORP".to_string()),
            category: Some("DOD".to_string()),
            subject: None,
        }
    }

    #[test]
    fn test_valid_raw_transaction() {
        let tx = Transaction::try_from(raw()).unwrap();
        assert_eq!(tx.transaction_id, "W91-0001");
        assert_eq!(tx.subject, "DOD");
    }

    #[test]
    fn test_missing_amount_is_data_error() {
        let mut r = raw();
        r.amount = None;
        assert_eq!(
            Transaction::try_from(r),
            Err(DataError::MissingField { field: "amount" })
        );
    }

    #[test]
    fn test_nan_amount_rejected() {
        let mut r = raw();
        r.amount = Some(f64::NAN);
        assert!(matches!(
            Transaction::try_from(r),
            Err(DataError::NonFiniteAmount { .. })
        ));
    }

    #[test]
    fn test_blank_recipient_rejected() {
        let mut r = raw();
        r.recipient_id = Some("   ".to_string());
        assert_eq!(
            Transaction::try_from(r),
            Err(DataError::BlankField {
                field: "recipient_id"
            })
        );
    }

    #[test]
    fn test_negative_amount_is_accepted() {
        let mut r = raw();
        r.amount = Some(-40.0);
        assert!(Transaction::try_from(r).is_ok());
    }

    #[test]
    fn test_feed_column_aliases() {
        let json = r#"{
            "Award ID": "W91-ABC",
            "Amount": 98000.5,
            "timestamp": "2025-01-02T03:04:05Z",
            "Recipient Name": "LOCKHEED",
            "Awarding Agency": "Department of Defense"
        }"#;
        let raw: RawTransaction = serde_json::from_str(json).unwrap();
        let tx = Transaction::try_from(raw).unwrap();
        assert_eq!(tx.amount, 98000.5);
        assert_eq!(tx.category, "Department of Defense");
    }
}
