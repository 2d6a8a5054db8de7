//! NATS consumer for normalized expenditure records

use crate::types::transaction::RawTransaction;
use anyhow::Result;
use async_nats::{Client, Message, Subscriber};
use tracing::{info, warn};

/// Consumer for receiving raw transaction records from NATS
pub struct TransactionConsumer {
    client: Client,
    subject: String,
}

impl TransactionConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the transaction subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to transaction subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Decode one message payload. Undecodable payloads are logged and dropped.
pub fn decode_message(message: &Message) -> Option<RawTransaction> {
    decode_payload(&message.payload)
}

pub fn decode_payload(payload: &[u8]) -> Option<RawTransaction> {
    match serde_json::from_slice::<RawTransaction>(payload) {
        Ok(raw) => Some(raw),
        Err(e) => {
            warn!(error = %e, bytes = payload.len(), "Failed to deserialize transaction record");
            None
        }
    }
}
