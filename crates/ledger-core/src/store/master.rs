//! Entity, period, and account-classification lookups.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};

use crate::errors::LedgerResult;
use crate::models::{
    identity_text, particular_key, ClassificationSet, EntityRecord, PeriodRecord, PeriodRef,
};
use crate::store::database::Database;

/// Read-only master data consumed by an ingestion run.
pub trait MasterData: Send + Sync {
    fn lookup_entity(&self, entity_id: i64) -> LedgerResult<Option<EntityRecord>>;

    fn lookup_period(&self, period: &PeriodRef) -> LedgerResult<Option<PeriodRecord>>;

    /// `particular` is passed as written in the sheet; implementations match
    /// on [`particular_key`].
    fn lookup_classification(&self, particular: &str) -> LedgerResult<Option<ClassificationSet>>;
}

/// Period for a `(month, year)` pair with no master row behind it.
fn named_period(month_name: &str, year: i32) -> PeriodRecord {
    PeriodRecord {
        month_name: month_name.trim().to_string(),
        year,
        quarter: None,
        half: None,
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryMasterData {
    entities: HashMap<i64, EntityRecord>,
    periods: HashMap<i64, PeriodRecord>,
    classifications: HashMap<String, ClassificationSet>,
}

impl InMemoryMasterData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityRecord) -> Self {
        self.entities.insert(entity.id, entity);
        self
    }

    pub fn with_period(mut self, period_id: i64, period: PeriodRecord) -> Self {
        self.periods.insert(period_id, period);
        self
    }

    pub fn with_classification(mut self, particular: &str, codes: ClassificationSet) -> Self {
        self.classifications.insert(particular_key(particular), codes);
        self
    }
}

impl MasterData for InMemoryMasterData {
    fn lookup_entity(&self, entity_id: i64) -> LedgerResult<Option<EntityRecord>> {
        Ok(self.entities.get(&entity_id).cloned())
    }

    fn lookup_period(&self, period: &PeriodRef) -> LedgerResult<Option<PeriodRecord>> {
        Ok(match period {
            PeriodRef::Id(id) => self.periods.get(id).cloned(),
            PeriodRef::Named { month_name, year } => {
                let wanted = identity_text(month_name);
                self.periods
                    .values()
                    .find(|p| p.year == *year && identity_text(&p.month_name) == wanted)
                    .cloned()
                    .or_else(|| Some(named_period(month_name, *year)))
            }
        })
    }

    fn lookup_classification(&self, particular: &str) -> LedgerResult<Option<ClassificationSet>> {
        Ok(self.classifications.get(&particular_key(particular)).cloned())
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Lookups against `entity_master`, `month_master`, and `code_master`.
#[derive(Clone, Debug)]
pub struct SqliteMasterData {
    db: Database,
}

impl SqliteMasterData {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl MasterData for SqliteMasterData {
    fn lookup_entity(&self, entity_id: i64) -> LedgerResult<Option<EntityRecord>> {
        let conn = self.db.connect()?;
        Ok(conn
            .query_row(
                "SELECT ent_id, ent_name, ent_code, local_currency \
                 FROM entity_master WHERE ent_id = ?1;",
                params![entity_id],
                |row| {
                    Ok(EntityRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        code: row.get(2)?,
                        local_currency: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    fn lookup_period(&self, period: &PeriodRef) -> LedgerResult<Option<PeriodRecord>> {
        let conn = self.db.connect()?;
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<PeriodRecord> {
            Ok(PeriodRecord {
                month_name: row.get(0)?,
                year: row.get(1)?,
                quarter: row.get(2)?,
                half: row.get(3)?,
            })
        };
        match period {
            PeriodRef::Id(id) => Ok(conn
                .query_row(
                    "SELECT month_name, year, quarter, half FROM month_master WHERE mnt_id = ?1;",
                    params![id],
                    map,
                )
                .optional()?),
            PeriodRef::Named { month_name, year } => {
                let found = conn
                    .query_row(
                        "SELECT month_name, year, quarter, half FROM month_master \
                         WHERE LOWER(TRIM(month_name)) = ?1 AND year = ?2 \
                         ORDER BY mnt_id ASC LIMIT 1;",
                        params![identity_text(month_name), year],
                        map,
                    )
                    .optional()?;
                Ok(found.or_else(|| Some(named_period(month_name, *year))))
            }
        }
    }

    fn lookup_classification(&self, particular: &str) -> LedgerResult<Option<ClassificationSet>> {
        let conn = self.db.connect()?;
        Ok(conn
            .query_row(
                "SELECT primary_code, category1, category2, category3, category4, category5 \
                 FROM code_master WHERE particular_key = ?1;",
                params![particular_key(particular)],
                |row| {
                    Ok(ClassificationSet {
                        primary_code: row.get(0)?,
                        category1: row.get(1)?,
                        category2: row.get(2)?,
                        category3: row.get(3)?,
                        category4: row.get(4)?,
                        category5: row.get(5)?,
                    })
                },
            )
            .optional()?)
    }
}
