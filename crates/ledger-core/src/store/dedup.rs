//! At-most-once persistence of structured and raw records.
//!
//! A structured record has to clear three layers before it is written:
//! the operation's in-memory key set, a tolerance-aware existence query,
//! and finally `INSERT OR IGNORE` against the UNIQUE `dedupe_hash` column.
//! Only the last one holds under concurrent writers; the first two keep the
//! common case off the write path.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{DedupeKey, RawRecord, StructuredRecord};
use crate::store::database::Database;

/// Which layer rejected a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupLayer {
    Batch,
    Existing,
    Constraint,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted(i64),
    SkippedDuplicate(DedupLayer),
    Failed(String),
}

impl PersistOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, PersistOutcome::Inserted(_))
    }
}

/// Keys already attempted by one operation.
#[derive(Debug, Default)]
pub struct BatchKeys {
    seen: HashSet<DedupeKey>,
}

impl BatchKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &DedupeKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

pub struct DedupStore<'a> {
    db: &'a Database,
    operation_id: &'a str,
}

impl<'a> DedupStore<'a> {
    pub fn new(db: &'a Database, operation_id: &'a str) -> Self {
        Self { db, operation_id }
    }

    /// Run a structured record through the three layers.
    ///
    /// A key rejected by the existence query stays in `batch`, so a repeat of
    /// the same row later in the run stops at the first layer. A key whose
    /// write failed is released again.
    pub fn try_persist(&self, record: &StructuredRecord, batch: &mut BatchKeys) -> PersistOutcome {
        let key = record.dedupe_key();
        if !batch.seen.insert(key.clone()) {
            debug!(particular = %record.particular, "duplicate within batch");
            return PersistOutcome::SkippedDuplicate(DedupLayer::Batch);
        }

        match self.db.structured_exists(&key) {
            Ok(true) => {
                debug!(particular = %record.particular, "duplicate already persisted");
                return PersistOutcome::SkippedDuplicate(DedupLayer::Existing);
            }
            Ok(false) => {}
            Err(e) => {
                batch.seen.remove(&key);
                warn!(particular = %record.particular, error = %e, "existence check failed");
                return PersistOutcome::Failed(e.to_string());
            }
        }

        match self
            .db
            .insert_structured(record, &key.digest(), self.operation_id)
        {
            Ok(Some(id)) => PersistOutcome::Inserted(id),
            Ok(None) => {
                debug!(particular = %record.particular, "insert rejected by unique key");
                PersistOutcome::SkippedDuplicate(DedupLayer::Constraint)
            }
            Err(e) => {
                batch.seen.remove(&key);
                warn!(particular = %record.particular, error = %e, "structured insert failed");
                PersistOutcome::Failed(e.to_string())
            }
        }
    }

    /// Raw rows carry their own identity: an existence query on the scope and
    /// particular, then `INSERT OR IGNORE` on `raw_key`.
    pub fn try_persist_raw(&self, record: &RawRecord) -> PersistOutcome {
        match self.db.raw_exists(record) {
            Ok(true) => return PersistOutcome::SkippedDuplicate(DedupLayer::Existing),
            Ok(false) => {}
            Err(e) => return PersistOutcome::Failed(e.to_string()),
        }
        match self.db.insert_raw(record, self.operation_id) {
            Ok(Some(id)) => PersistOutcome::Inserted(id),
            Ok(None) => PersistOutcome::SkippedDuplicate(DedupLayer::Constraint),
            Err(e) => PersistOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalAmount, ClassificationSet, DebitCredit};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("ledger.db"), Duration::from_secs(5)).unwrap();
        db.init_schema().unwrap();
        (dir, db)
    }

    fn record(particular: &str, amount: &str) -> StructuredRecord {
        StructuredRecord {
            particular: particular.to_string(),
            entity_name: "Acme".to_string(),
            entity_code: "ACM".to_string(),
            local_currency: None,
            amount: CanonicalAmount::new(Decimal::from_str(amount).unwrap(), DebitCredit::Debit),
            month_label: "April".to_string(),
            selected_month: "April".to_string(),
            classification: ClassificationSet::default(),
            year: 2024,
            financial_year: "2024-25".to_string(),
            quarter: None,
            half: None,
        }
    }

    #[test]
    fn test_second_identical_record_stops_at_batch_layer() {
        let (_dir, db) = open();
        let store = DedupStore::new(&db, "op-1");
        let mut batch = BatchKeys::new();

        assert!(store.try_persist(&record("Cash", "50"), &mut batch).is_inserted());
        assert_eq!(
            store.try_persist(&record("cash", "50.00"), &mut batch),
            PersistOutcome::SkippedDuplicate(DedupLayer::Batch)
        );
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_existing_layer_keeps_key_in_batch() {
        let (_dir, db) = open();
        let first = DedupStore::new(&db, "op-1");
        first.try_persist(&record("Cash", "50"), &mut BatchKeys::new());

        let second = DedupStore::new(&db, "op-2");
        let mut batch = BatchKeys::new();
        assert_eq!(
            second.try_persist(&record("Cash", "50"), &mut batch),
            PersistOutcome::SkippedDuplicate(DedupLayer::Existing)
        );
        assert!(batch.contains(&record("Cash", "50").dedupe_key()));
        assert_eq!(
            second.try_persist(&record("Cash", "50"), &mut batch),
            PersistOutcome::SkippedDuplicate(DedupLayer::Batch)
        );
    }

    #[test]
    fn test_existing_layer_tolerance_band() {
        let (_dir, db) = open();
        let first = DedupStore::new(&db, "op-1");
        let mut batch = BatchKeys::new();
        for amount in ["1000.10", "100.10"] {
            assert!(first.try_persist(&record("Cash", amount), &mut batch).is_inserted());
        }

        let second = DedupStore::new(&db, "op-2");
        let mut batch = BatchKeys::new();
        // Rounds onto a stored cent.
        assert_eq!(
            second.try_persist(&record("Cash", "1000.104"), &mut batch),
            PersistOutcome::SkippedDuplicate(DedupLayer::Existing)
        );
        // One cent either side of a stored amount is a new record.
        for amount in ["1000.11", "1000.09", "100.11"] {
            assert!(
                second.try_persist(&record("Cash", amount), &mut batch).is_inserted(),
                "{amount} was rejected"
            );
        }
    }

    #[test]
    fn test_constraint_layer_catches_what_the_query_misses() {
        let (_dir, db) = open();
        let rec = record("Cash", "50");
        // Same digest, different stored amount: invisible to the tolerance query.
        let mut shifted = rec.clone();
        shifted.amount = CanonicalAmount::new(Decimal::from(900), DebitCredit::Debit);
        db.insert_structured(&shifted, &rec.dedupe_key().digest(), "other")
            .unwrap();

        let store = DedupStore::new(&db, "op-1");
        assert_eq!(
            store.try_persist(&rec, &mut BatchKeys::new()),
            PersistOutcome::SkippedDuplicate(DedupLayer::Constraint)
        );
    }

    #[test]
    fn test_raw_records_are_written_once() {
        let (_dir, db) = open();
        let store = DedupStore::new(&db, "op-1");
        let raw = RawRecord {
            entity_code: "ACM".to_string(),
            month: "April".to_string(),
            year: 2024,
            financial_year: "2024-25".to_string(),
            particular: "Cash".to_string(),
            opening: None,
            transaction: Some(Decimal::from(5)),
            closing: None,
            opening_period: false,
        };
        assert!(store.try_persist_raw(&raw).is_inserted());
        assert_eq!(
            store.try_persist_raw(&raw),
            PersistOutcome::SkippedDuplicate(DedupLayer::Existing)
        );
    }
}
