//! Append-only audit ledger.
//!
//! One logical writer at a time (the `writer` mutex); readers only take the
//! state lock long enough to clone an `Arc<AuditEntry>`, so a reader sees an
//! entry whole or not at all. Entries are never updated or removed;
//! corrections are new entries pointing at the original.

use crate::error::{OrderingError, PipelineError};
use crate::types::audit::{AuditEntry, RiskTier, SignalSummary};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    entries: Vec<Arc<AuditEntry>>,
    by_entry_id: HashMap<Uuid, usize>,
    transactions: HashSet<String>,
}

impl LedgerState {
    fn tail_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.generated_at)
    }
}

/// Shared, append-only log of scored transactions.
#[derive(Default)]
pub struct AuditLedger {
    state: RwLock<LedgerState>,
    writer: Mutex<()>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single entry at the tail.
    pub fn append(&self, entry: AuditEntry) -> Result<Arc<AuditEntry>, OrderingError> {
        let mut committed = self.commit_entries(vec![entry])?;
        Ok(committed.remove(0))
    }

    /// Append a correction of `original` carrying the original's signals.
    pub fn append_correction(
        &self,
        original: Uuid,
        risk_tier: RiskTier,
        note: impl Into<String>,
    ) -> Result<Arc<AuditEntry>, PipelineError> {
        let source = self.get(original).ok_or(PipelineError::UnknownEntry(original))?;

        // Stamped under the writer lock so no append can land in between
        let _writer = self.writer.lock();
        let correction = AuditEntry::new(
            source.transaction_id.clone(),
            source.subject.clone(),
            risk_tier,
            source.signals.clone(),
        )
        .correcting(original, note);
        let entry = self.commit_locked(vec![correction])?.remove(0);
        info!(
            entry_id = %entry.entry_id,
            corrects = %original,
            risk_tier = %entry.risk_tier,
            "Correction appended"
        );
        Ok(entry)
    }

    /// Stage entries for an all-or-nothing commit.
    ///
    /// The batch holds the writer lock until it is committed or dropped, so
    /// entries stamped while it is open cannot be overtaken by another append.
    pub fn begin_batch(&self) -> LedgerBatch<'_> {
        LedgerBatch {
            ledger: self,
            _writer: self.writer.lock(),
            pending: Vec::new(),
        }
    }

    fn commit_entries(
        &self,
        entries: Vec<AuditEntry>,
    ) -> Result<Vec<Arc<AuditEntry>>, OrderingError> {
        let _writer = self.writer.lock();
        self.commit_locked(entries)
    }

    /// Validate ordering and append. Caller holds the writer lock.
    fn commit_locked(
        &self,
        entries: Vec<AuditEntry>,
    ) -> Result<Vec<Arc<AuditEntry>>, OrderingError> {
        let mut tail = self.state.read().tail_timestamp();
        for entry in &entries {
            if let Some(tail) = tail {
                if entry.generated_at < tail {
                    return Err(OrderingError {
                        attempted: entry.generated_at,
                        tail,
                    });
                }
            }
            tail = Some(entry.generated_at);
        }

        let mut state = self.state.write();
        let mut committed = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let position = state.entries.len();
            entry.sequence = position as u64;
            state.by_entry_id.insert(entry.entry_id, position);
            state.transactions.insert(entry.transaction_id.clone());
            let entry = Arc::new(entry);
            state.entries.push(entry.clone());
            committed.push(entry);
        }
        debug!(count = committed.len(), total = state.entries.len(), "Ledger entries committed");
        Ok(committed)
    }

    /// Lazy, finite, restartable scan over entries matching `filter`.
    ///
    /// The scan covers the entries present when it was created; later appends
    /// are not visited.
    pub fn query(&self, filter: LedgerFilter) -> LedgerQuery<'_> {
        LedgerQuery {
            ledger: self,
            filter,
            cursor: 0,
            end: self.len(),
        }
    }

    pub fn get(&self, entry_id: Uuid) -> Option<Arc<AuditEntry>> {
        let state = self.state.read();
        state
            .by_entry_id
            .get(&entry_id)
            .and_then(|&i| state.entries.get(i).cloned())
    }

    fn entry_at(&self, position: usize) -> Option<Arc<AuditEntry>> {
        self.state.read().entries.get(position).cloned()
    }

    /// Whether any entry was recorded for this transaction
    pub fn contains_transaction(&self, transaction_id: &str) -> bool {
        self.state.read().transactions.contains(transaction_id)
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tail_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.read().tail_timestamp()
    }

    pub fn tier_counts(&self) -> HashMap<RiskTier, u64> {
        let mut counts = HashMap::new();
        for entry in self.state.read().entries.iter() {
            *counts.entry(entry.risk_tier).or_insert(0) += 1;
        }
        counts
    }

    /// Write matching entries as JSON lines, in ledger order.
    ///
    /// Field order is fixed: transaction_id, subject, risk_tier, signals,
    /// generated_at.
    pub fn export_jsonl<W: Write>(
        &self,
        mut writer: W,
        filter: LedgerFilter,
    ) -> std::io::Result<usize> {
        let mut written = 0;
        for entry in self.query(filter) {
            serde_json::to_writer(&mut writer, &ExportRecord::from(entry.as_ref()))?;
            writer.write_all(b"\n")?;
            written += 1;
        }
        writer.flush()?;
        Ok(written)
    }
}

/// Exported view of an entry
#[derive(Debug, Serialize)]
pub struct ExportRecord<'a> {
    pub transaction_id: &'a str,
    pub subject: &'a str,
    pub risk_tier: RiskTier,
    pub signals: &'a SignalSummary,
    pub generated_at: DateTime<Utc>,
}

impl<'a> From<&'a AuditEntry> for ExportRecord<'a> {
    fn from(entry: &'a AuditEntry) -> Self {
        Self {
            transaction_id: &entry.transaction_id,
            subject: &entry.subject,
            risk_tier: entry.risk_tier,
            signals: &entry.signals,
            generated_at: entry.generated_at,
        }
    }
}

/// Entries staged for one atomic commit. Dropping it discards them and
/// releases the writer lock.
pub struct LedgerBatch<'a> {
    ledger: &'a AuditLedger,
    _writer: MutexGuard<'a, ()>,
    pending: Vec<AuditEntry>,
}

impl LedgerBatch<'_> {
    pub fn push(&mut self, entry: AuditEntry) {
        self.pending.push(entry);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Append every staged entry, or none of them.
    pub fn commit(self) -> Result<Vec<Arc<AuditEntry>>, OrderingError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        self.ledger.commit_locked(self.pending)
    }
}

/// Query filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerFilter {
    pub subject: Option<String>,
    pub min_tier: Option<RiskTier>,
    pub max_tier: Option<RiskTier>,
    /// Inclusive lower bound on `generated_at`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `generated_at`
    pub until: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn tiers(mut self, min: RiskTier, max: RiskTier) -> Self {
        self.min_tier = Some(min);
        self.max_tier = Some(max);
        self
    }

    pub fn at_least(mut self, min: RiskTier) -> Self {
        self.min_tier = Some(min);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.subject.as_ref().map_or(true, |s| *s == entry.subject)
            && self.min_tier.map_or(true, |t| entry.risk_tier >= t)
            && self.max_tier.map_or(true, |t| entry.risk_tier <= t)
            && self.from.map_or(true, |t| entry.generated_at >= t)
            && self.until.map_or(true, |t| entry.generated_at < t)
    }
}

/// Iterator returned by [`AuditLedger::query`].
#[derive(Clone)]
pub struct LedgerQuery<'a> {
    ledger: &'a AuditLedger,
    filter: LedgerFilter,
    cursor: usize,
    end: usize,
}

impl LedgerQuery<'_> {
    /// Rewind to the first entry
    pub fn restart(&mut self) {
        self.cursor = 0;
    }
}

impl Iterator for LedgerQuery<'_> {
    type Item = Arc<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.end {
            let entry = self.ledger.entry_at(self.cursor)?;
            self.cursor += 1;
            if self.filter.matches(&entry) {
                return Some(entry);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::audit::DeviationSummary;
    use chrono::Duration;
    use std::thread;

    fn signals() -> SignalSummary {
        SignalSummary {
            deviation: DeviationSummary {
                group_key: "DOD".to_string(),
                statistic: Some(0.01),
                sample_count: 40,
                insufficient_data: false,
            },
            outlier: None,
        }
    }

    fn entry(id: &str, subject: &str, tier: RiskTier, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry::new(id.to_string(), subject.to_string(), tier, signals()).generated_at(at)
    }

    #[test]
    fn test_in_order_appends_succeed() {
        let ledger = AuditLedger::new();
        let t0 = Utc::now();
        for i in 0..10 {
            ledger
                .append(entry(&format!("tx_{i}"), "DOD", RiskTier::Low, t0 + Duration::seconds(i)))
                .unwrap();
        }
        // Equal timestamps are allowed
        ledger
            .append(entry("tx_same", "DOD", RiskTier::Low, t0 + Duration::seconds(9)))
            .unwrap();
        assert_eq!(ledger.len(), 11);

        let sequences: Vec<u64> = ledger.query(LedgerFilter::all()).map(|e| e.sequence).collect();
        assert_eq!(sequences, (0..11).collect::<Vec<u64>>());
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let ledger = AuditLedger::new();
        let t0 = Utc::now();
        ledger.append(entry("a", "DOD", RiskTier::Low, t0)).unwrap();

        let err = ledger
            .append(entry("b", "DOD", RiskTier::Low, t0 - Duration::milliseconds(1)))
            .unwrap_err();
        assert_eq!(err.tail, t0);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let ledger = AuditLedger::new();
        let t0 = Utc::now();
        ledger.append(entry("first", "DOD", RiskTier::Low, t0)).unwrap();

        let mut batch = ledger.begin_batch();
        batch.push(entry("b1", "DOD", RiskTier::High, t0 + Duration::seconds(1)));
        batch.push(entry("b2", "DOD", RiskTier::High, t0 - Duration::seconds(1)));
        assert!(batch.commit().is_err());
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.contains_transaction("b1"));

        let mut batch = ledger.begin_batch();
        batch.push(entry("c1", "DOD", RiskTier::High, t0 + Duration::seconds(2)));
        drop(batch);
        assert_eq!(ledger.len(), 1);

        let mut batch = ledger.begin_batch();
        batch.push(entry("d1", "DOD", RiskTier::High, t0 + Duration::seconds(3)));
        batch.push(entry("d2", "DOD", RiskTier::Medium, t0 + Duration::seconds(3)));
        assert_eq!(batch.commit().unwrap().len(), 2);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_open_batch_is_not_overtaken_by_concurrent_append() {
        let ledger = AuditLedger::new();
        let original = ledger
            .append(entry("a", "DOD", RiskTier::Critical, Utc::now()))
            .unwrap();

        thread::scope(|scope| {
            let mut batch = ledger.begin_batch();
            let correction = scope
                .spawn(|| ledger.append_correction(original.entry_id, RiskTier::Low, "reviewed"));
            thread::sleep(std::time::Duration::from_millis(20));

            batch.push(entry("b", "DOD", RiskTier::High, Utc::now()));
            assert_eq!(batch.len(), 1);
            batch.commit().unwrap();
            correction.join().unwrap().unwrap();
        });

        let order: Vec<_> = ledger
            .query(LedgerFilter::all())
            .map(|e| (e.transaction_id.clone(), e.is_correction()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a".to_string(), false),
                ("b".to_string(), false),
                ("a".to_string(), true)
            ]
        );
    }

    #[test]
    fn test_query_filters() {
        let ledger = AuditLedger::new();
        let t0 = Utc::now();
        ledger.append(entry("a", "DOD", RiskTier::Low, t0)).unwrap();
        ledger.append(entry("b", "HHS", RiskTier::Critical, t0 + Duration::seconds(1))).unwrap();
        ledger.append(entry("c", "DOD", RiskTier::High, t0 + Duration::seconds(2))).unwrap();
        ledger.append(entry("d", "DOD", RiskTier::Medium, t0 + Duration::seconds(3))).unwrap();

        let dod: Vec<_> = ledger.query(LedgerFilter::all().subject("DOD")).collect();
        assert_eq!(dod.len(), 3);

        let severe: Vec<_> = ledger
            .query(LedgerFilter::all().at_least(RiskTier::High))
            .map(|e| e.transaction_id.clone())
            .collect();
        assert_eq!(severe, vec!["b", "c"]);

        let window: Vec<_> = ledger
            .query(
                LedgerFilter::all().between(t0 + Duration::seconds(1), t0 + Duration::seconds(3)),
            )
            .map(|e| e.transaction_id.clone())
            .collect();
        assert_eq!(window, vec!["b", "c"]);

        let mid: Vec<_> = ledger
            .query(LedgerFilter::all().tiers(RiskTier::Medium, RiskTier::High))
            .collect();
        assert_eq!(mid.len(), 2);
    }

    #[test]
    fn test_query_is_restartable_and_finite() {
        let ledger = AuditLedger::new();
        let t0 = Utc::now();
        ledger.append(entry("a", "DOD", RiskTier::Low, t0)).unwrap();
        ledger.append(entry("b", "DOD", RiskTier::Low, t0)).unwrap();

        let mut query = ledger.query(LedgerFilter::all());
        assert_eq!(query.by_ref().count(), 2);

        ledger.append(entry("c", "DOD", RiskTier::Low, t0)).unwrap();
        query.restart();
        assert_eq!(query.count(), 2);
        assert_eq!(ledger.query(LedgerFilter::all()).count(), 3);
    }

    #[test]
    fn test_correction_references_original() {
        let ledger = AuditLedger::new();
        let original = ledger
            .append(entry("a", "DOD", RiskTier::Critical, Utc::now() - Duration::seconds(1)))
            .unwrap();

        let correction = ledger
            .append_correction(original.entry_id, RiskTier::Low, "vendor confirmed")
            .unwrap();
        assert_eq!(correction.corrects, Some(original.entry_id));
        assert_eq!(correction.transaction_id, "a");
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get(original.entry_id).unwrap().risk_tier, RiskTier::Critical);

        let tiers = ledger.tier_counts();
        assert_eq!(tiers.get(&RiskTier::Critical), Some(&1));
        assert_eq!(tiers.get(&RiskTier::Low), Some(&1));
        assert_eq!(tiers.get(&RiskTier::High), None);

        assert!(matches!(
            ledger.append_correction(Uuid::new_v4(), RiskTier::Low, "x"),
            Err(PipelineError::UnknownEntry(_))
        ));
    }

    #[test]
    fn test_export_field_order() {
        let ledger = AuditLedger::new();
        let t0 = Utc::now();
        ledger.append(entry("a", "DOD", RiskTier::High, t0)).unwrap();
        ledger.append(entry("b", "HHS", RiskTier::Low, t0)).unwrap();

        let mut out = Vec::new();
        let written = ledger.export_jsonl(&mut out, LedgerFilter::all()).unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(out).unwrap();
        let first = text.lines().next().unwrap();
        let fields = ["transaction_id", "subject", "risk_tier", "signals", "generated_at"];
        let positions: Vec<usize> = fields
            .iter()
            .map(|k| first.find(&format!("\"{k}\"")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(!first.contains("entry_id"));
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_entries() {
        let ledger = Arc::new(AuditLedger::new());
        let t0 = Utc::now();

        let writer = {
            let ledger = ledger.clone();
            thread::spawn(move || {
                for i in 0..2000i64 {
                    let id = format!("tx_{i}");
                    let tier = RiskTier::ALL[(i % 4) as usize];
                    let at = t0 + Duration::milliseconds(i);
                    ledger
                        .append(entry(&id, &format!("subject_{i}"), tier, at))
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let mut last_seq = None;
                        for e in ledger.query(LedgerFilter::all()) {
                            let i = e.sequence as i64;
                            assert_eq!(e.transaction_id, format!("tx_{i}"));
                            assert_eq!(e.subject, format!("subject_{i}"));
                            assert_eq!(e.risk_tier, RiskTier::ALL[(i % 4) as usize]);
                            if let Some(prev) = last_seq {
                                assert_eq!(e.sequence, prev + 1);
                            }
                            last_seq = Some(e.sequence);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(ledger.len(), 2000);
    }
}
