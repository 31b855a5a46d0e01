//! Amount parsing: signed magnitude plus Debit/Credit side from a raw cell.
//!
//! The side is settled by an ordered chain of rules, first hit wins:
//!
//! 1. an explicit `Dr`/`Cr` (or `Debit`/`Credit`) token inside the cell,
//! 2. the row's side column (`Type`, `Dr/Cr`, `DrCr`),
//! 3. a leading minus on the number (Credit),
//! 4. the side of the row's Closing cell,
//! 5. Debit.
//!
//! An unsigned number carries no side of its own, so `"1365.00"` and `"0"`
//! end up Debit through the last rule unless the Closing column says
//! otherwise.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::models::{DebitCredit, LedgerRow, ParsedAmount, Provenance};

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d*)?").unwrap());

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z])(debit|credit|dr|cr)\.?(?:[^a-z]|$)").unwrap()
});

const NULL_SPELLINGS: &[&str] = &["nan", "none", "null"];

/// Numeric reading of a cell before a side is assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellReading {
    /// Signed numeric portion, grouping commas removed.
    pub value: Decimal,
    /// Debit/Credit token written in the cell itself.
    pub token: Option<DebitCredit>,
}

/// Read the number and inline token of a cell. `None` for empty, null-ish, or
/// number-free input.
pub fn read_cell(cell: Option<&str>) -> Option<CellReading> {
    let text = cell?.trim();
    if text.is_empty() || NULL_SPELLINGS.contains(&text.to_ascii_lowercase().as_str()) {
        return None;
    }
    let value = extract_number(text)?;
    let token = TOKEN_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| DebitCredit::from_token(m.as_str()));
    Some(CellReading { value, token })
}

fn extract_number(text: &str) -> Option<Decimal> {
    let found = NUMBER_RE.find(text)?;
    let cleaned: String = found.as_str().chars().filter(|c| *c != ',').collect();
    let cleaned = cleaned.trim_end_matches('.');
    Decimal::from_str(cleaned).ok()
}

/// Signed number in a cell, ignoring any Debit/Credit text. Used for the
/// verbatim values kept on raw records.
pub fn parse_plain_number(cell: Option<&str>) -> Option<Decimal> {
    read_cell(cell).map(|r| r.value)
}

/// Interpret the side column of a row. Anything but a bare token is ignored.
pub fn side_hint(raw: Option<&str>) -> Option<DebitCredit> {
    raw.and_then(DebitCredit::from_token)
}

// ---------------------------------------------------------------------------
// Side rules
// ---------------------------------------------------------------------------

/// What a rule may look at when deciding the side of one cell.
#[derive(Clone, Copy, Debug)]
pub struct Evidence<'a> {
    pub reading: &'a CellReading,
    pub hint: Option<DebitCredit>,
    pub closing: Option<&'a ParsedAmount>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SideRule {
    InlineToken,
    TypeColumn,
    NegativeSign,
    ClosingColumn,
    Default,
}

impl SideRule {
    /// Full chain for Opening and Transaction cells.
    pub const CHAIN: [SideRule; 5] = [
        SideRule::InlineToken,
        SideRule::TypeColumn,
        SideRule::NegativeSign,
        SideRule::ClosingColumn,
        SideRule::Default,
    ];

    pub fn apply(self, evidence: &Evidence<'_>) -> Option<DebitCredit> {
        match self {
            SideRule::InlineToken => evidence.reading.token,
            SideRule::TypeColumn => evidence.hint,
            SideRule::NegativeSign => {
                (evidence.reading.value < Decimal::ZERO).then_some(DebitCredit::Credit)
            }
            SideRule::ClosingColumn => evidence
                .closing
                .filter(|c| c.provenance() != Some(Provenance::Defaulted))
                .and_then(|c| c.classification()),
            SideRule::Default => Some(DebitCredit::Debit),
        }
    }

    pub fn provenance(self) -> Provenance {
        match self {
            SideRule::InlineToken => Provenance::ExplicitText,
            SideRule::TypeColumn => Provenance::TypeColumn,
            SideRule::NegativeSign => Provenance::Sign,
            SideRule::ClosingColumn => Provenance::ClosingFallback,
            SideRule::Default => Provenance::Defaulted,
        }
    }
}

/// Run `evidence` through the chain and build the parsed amount.
pub fn resolve_side(evidence: &Evidence<'_>) -> ParsedAmount {
    SideRule::CHAIN
        .iter()
        .find_map(|rule| rule.apply(evidence).map(|side| (side, rule.provenance())))
        .map(|(side, provenance)| {
            ParsedAmount::resolved(evidence.reading.value.abs(), side, provenance)
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse a single cell with an optional side hint.
pub fn parse(cell: Option<&str>, side_type: Option<&str>) -> ParsedAmount {
    parse_with_closing(cell, side_type, None)
}

/// Parse a cell that may borrow its side from the row's Closing cell.
pub fn parse_with_closing(
    cell: Option<&str>,
    side_type: Option<&str>,
    closing: Option<&ParsedAmount>,
) -> ParsedAmount {
    match read_cell(cell) {
        Some(reading) => resolve_side(&Evidence {
            reading: &reading,
            hint: side_hint(side_type),
            closing,
        }),
        None => ParsedAmount::absent(),
    }
}

/// Parsed Opening, Transaction, and Closing cells of one row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RowAmounts {
    pub opening: ParsedAmount,
    pub transaction: ParsedAmount,
    pub closing: ParsedAmount,
}

/// The side column applies to Opening and Transaction only; Closing is
/// parsed on its own and serves as the fallback source.
pub fn parse_row(row: &LedgerRow) -> RowAmounts {
    let closing = parse(row.closing.as_deref(), None);
    let hint = row.side_type.as_deref();
    RowAmounts {
        opening: parse_with_closing(row.opening.as_deref(), hint, Some(&closing)),
        transaction: parse_with_closing(row.transaction.as_deref(), hint, Some(&closing)),
        closing,
    }
}
