//! Shared typed models used across parsing, ingestion, and storage layers.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::OPENING_MONTH_LABEL;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Format a financial year from its starting year: `2024` -> `"2024-25"`.
pub fn format_financial_year(year: i32) -> String {
    let next = (year.rem_euclid(100) + 1) % 100;
    format!("{year}-{next:02}")
}

/// Parse `"2024-25"` (or a bare `"2024"`) back into the integer year.
pub fn parse_financial_year(label: &str) -> Option<i32> {
    let trimmed = label.trim();
    if let Some((head, tail)) = trimmed.split_once('-') {
        if !tail.trim().is_empty() {
            if let Ok(year) = head.trim().parse::<i32>() {
                return Some(year);
            }
        }
    }
    trimmed.parse::<i32>().ok()
}

/// Identity form of a text field: trimmed and ASCII-lowercased, which is
/// exactly what SQLite's `LOWER(TRIM(x))` produces.
pub fn identity_text(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Lookup key for an account name: trimmed, inner whitespace runs collapsed
/// to one space, lowercased.
pub fn particular_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Amounts are compared at cent precision.
pub fn cents(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    rounded
}

// ---------------------------------------------------------------------------
// 1. Debit / Credit
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebitCredit {
    #[serde(rename = "Dr")]
    Debit,
    #[serde(rename = "Cr")]
    Credit,
}

impl DebitCredit {
    pub fn as_str(self) -> &'static str {
        match self {
            DebitCredit::Debit => "Dr",
            DebitCredit::Credit => "Cr",
        }
    }

    /// Recognise a bare Debit/Credit token (`Dr`, `cr.`, `Debit`, ...).
    pub fn from_token(token: &str) -> Option<Self> {
        let cleaned = token.trim().trim_end_matches('.').to_ascii_lowercase();
        match cleaned.as_str() {
            "dr" | "debit" | "d" => Some(DebitCredit::Debit),
            "cr" | "credit" | "c" => Some(DebitCredit::Credit),
            _ => None,
        }
    }
}

impl fmt::Display for DebitCredit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 2. ParsedAmount
// ---------------------------------------------------------------------------

/// Which rule of the parser settled the Debit/Credit side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    ExplicitText,
    Sign,
    TypeColumn,
    ClosingFallback,
    Defaulted,
}

/// Result of parsing one cell. Magnitude and classification are either both
/// present or both absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParsedAmount {
    resolved: Option<(Decimal, DebitCredit, Provenance)>,
}

impl ParsedAmount {
    pub fn absent() -> Self {
        Self { resolved: None }
    }

    /// `magnitude` is stored as its absolute value.
    pub fn resolved(magnitude: Decimal, side: DebitCredit, provenance: Provenance) -> Self {
        Self {
            resolved: Some((magnitude.abs(), side, provenance)),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.resolved.is_none()
    }

    pub fn magnitude(&self) -> Option<Decimal> {
        self.resolved.map(|(m, _, _)| m)
    }

    pub fn classification(&self) -> Option<DebitCredit> {
        self.resolved.map(|(_, dc, _)| dc)
    }

    pub fn provenance(&self) -> Option<Provenance> {
        self.resolved.map(|(_, _, p)| p)
    }

    pub fn canonical(&self) -> Option<CanonicalAmount> {
        self.resolved
            .map(|(magnitude, side, _)| CanonicalAmount::new(magnitude, side))
    }
}

// ---------------------------------------------------------------------------
// 3. CanonicalAmount
// ---------------------------------------------------------------------------

/// Signed amount: Debit positive, Credit negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalAmount(Decimal);

impl CanonicalAmount {
    pub fn new(magnitude: Decimal, side: DebitCredit) -> Self {
        match side {
            DebitCredit::Debit => Self(magnitude.abs()),
            DebitCredit::Credit if magnitude.is_zero() => Self(Decimal::ZERO),
            DebitCredit::Credit => Self(-magnitude.abs()),
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for CanonicalAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// 4. ClassificationSet
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationSet {
    pub primary_code: Option<String>,
    pub category1: Option<String>,
    pub category2: Option<String>,
    pub category3: Option<String>,
    pub category4: Option<String>,
    pub category5: Option<String>,
}

// ---------------------------------------------------------------------------
// 5. Master data records and the ingestion context
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub local_currency: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub month_name: String,
    pub year: i32,
    pub quarter: Option<String>,
    pub half: Option<String>,
}

/// How a caller names the period of an upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodRef {
    Id(i64),
    Named { month_name: String, year: i32 },
}

/// The (entity, month, year) triple bounding a reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub entity_code: String,
    pub month: String,
    pub year: i32,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity_code, self.month, self.year)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestionContext {
    pub entity: EntityRecord,
    pub period: PeriodRecord,
    pub is_opening_period: bool,
}

impl IngestionContext {
    pub fn scope(&self) -> Scope {
        Scope {
            entity_code: self.entity.code.clone(),
            month: self.period.month_name.clone(),
            year: self.period.year,
        }
    }

    pub fn financial_year(&self) -> String {
        format_financial_year(self.period.year)
    }
}

// ---------------------------------------------------------------------------
// 6. Input rows
// ---------------------------------------------------------------------------

/// One spreadsheet row, cells kept as raw text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub particular: Option<String>,
    pub opening: Option<String>,
    pub transaction: Option<String>,
    pub closing: Option<String>,
    /// Contents of the `Type` / `Dr/Cr` / `DrCr` column, when present.
    pub side_type: Option<String>,
}

impl LedgerRow {
    pub fn new(particular: &str, opening: &str, transaction: &str, closing: &str) -> Self {
        fn cell(v: &str) -> Option<String> {
            if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            }
        }
        Self {
            particular: cell(particular),
            opening: cell(opening),
            transaction: cell(transaction),
            closing: cell(closing),
            side_type: None,
        }
    }

    pub fn with_side_type(mut self, side_type: &str) -> Self {
        self.side_type = Some(side_type.to_string());
        self
    }

    /// Trimmed particular, `None` when blank.
    pub fn particular_name(&self) -> Option<&str> {
        self.particular
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

// ---------------------------------------------------------------------------
// 7. Persisted records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RawRecord {
    pub entity_code: String,
    pub month: String,
    pub year: i32,
    pub financial_year: String,
    pub particular: String,
    pub opening: Option<Decimal>,
    pub transaction: Option<Decimal>,
    pub closing: Option<Decimal>,
    pub opening_period: bool,
}

impl RawRecord {
    /// Hex digest of (entity, month, year, particular) used as the raw table's
    /// unique identity.
    pub fn identity_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            identity_text(&self.entity_code),
            identity_text(&self.month),
            self.year.to_string(),
            identity_text(&self.particular),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StructuredRecord {
    pub particular: String,
    pub entity_name: String,
    pub entity_code: String,
    pub local_currency: Option<String>,
    pub amount: CanonicalAmount,
    pub month_label: String,
    pub selected_month: String,
    pub classification: ClassificationSet,
    pub year: i32,
    pub financial_year: String,
    pub quarter: Option<String>,
    pub half: Option<String>,
}

impl StructuredRecord {
    pub fn is_opening(&self) -> bool {
        self.month_label == OPENING_MONTH_LABEL
    }

    pub fn dedupe_key(&self) -> DedupeKey {
        DedupeKey::from_record(self)
    }
}

// ---------------------------------------------------------------------------
// 8. DedupeKey
// ---------------------------------------------------------------------------

/// Normalised identity of a structured record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub particular: String,
    pub entity_code: String,
    pub selected_month: String,
    pub year: i32,
    pub month_label: String,
    pub amount: Decimal,
}

impl DedupeKey {
    pub fn from_record(record: &StructuredRecord) -> Self {
        Self {
            particular: identity_text(&record.particular),
            entity_code: identity_text(&record.entity_code),
            selected_month: identity_text(&record.selected_month),
            year: record.year,
            month_label: identity_text(&record.month_label),
            amount: cents(record.amount.value()),
        }
    }

    /// SHA-256 hex digest of the key, backing the UNIQUE constraint.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.particular.as_str(),
            self.entity_code.as_str(),
            self.selected_month.as_str(),
            &self.year.to_string(),
            self.month_label.as_str(),
            &self.amount.to_string(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        format!("{:x}", hasher.finalize())
    }
}
