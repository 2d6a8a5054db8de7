//! Expenditure Audit Pipeline Library
//!
//! Forensic scoring of government expenditure streams: Benford digit analysis
//! per group, isolation-forest outlier scoring per transaction, fused into a
//! risk tier and recorded on an append-only audit ledger.

pub mod benford;
pub mod config;
pub mod consumer;
pub mod error;
pub mod feature_extractor;
pub mod fusion;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod types;

pub use benford::DigitAnalyzer;
pub use config::AppConfig;
pub use consumer::TransactionConsumer;
pub use ledger::{AuditLedger, LedgerFilter};
pub use models::lifecycle::ModelLifecycleManager;
pub use pipeline::{AuditPipeline, BatchReport};
pub use producer::EntryPublisher;
pub use types::{
    audit::{AuditEntry, RiskTier},
    transaction::{RawTransaction, Transaction},
};
