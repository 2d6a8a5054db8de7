//! NATS publisher for committed ledger entries

use crate::ledger::ExportRecord;
use crate::types::audit::{AuditEntry, RiskTier};
use anyhow::Result;
use async_nats::Client;
use std::sync::Arc;
use tracing::{debug, error};

/// Publishes committed entries in ledger export format
#[derive(Clone)]
pub struct EntryPublisher {
    client: Client,
    subject: String,
}

impl EntryPublisher {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish one entry; the tier is appended to the subject, e.g. `audit.ledger.critical`
    pub async fn publish(&self, entry: &AuditEntry) -> Result<()> {
        let payload = serde_json::to_vec(&ExportRecord::from(entry))?;

        self.client
            .publish(subject_for(&self.subject, entry.risk_tier), payload.into())
            .await?;

        debug!(
            entry_id = %entry.entry_id,
            transaction_id = %entry.transaction_id,
            risk_tier = %entry.risk_tier,
            "Published ledger entry"
        );

        Ok(())
    }

    /// Publish a committed batch. Failures are logged per entry; the ledger
    /// remains the record of truth.
    pub async fn publish_batch(&self, entries: &[Arc<AuditEntry>]) -> usize {
        let mut published = 0;
        for entry in entries {
            match self.publish(entry).await {
                Ok(()) => published += 1,
                Err(e) => error!(
                    entry_id = %entry.entry_id,
                    error = %e,
                    "Failed to publish ledger entry"
                ),
            }
        }
        published
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

fn subject_for(base: &str, tier: RiskTier) -> String {
    format!("{}.{}", base, tier.as_str())
}
