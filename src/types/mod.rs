//! Type definitions for the audit pipeline

pub mod audit;
pub mod transaction;

pub use audit::{AuditEntry, DeviationSummary, OutlierSummary, RiskTier, SignalSummary};
pub use transaction::{RawTransaction, Transaction};
