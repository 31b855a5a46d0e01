//! Runtime configuration and shared guard constants.
//!
//! Every knob can be set through a `LEDGER_*` environment variable; unset or
//! unparseable values fall back to the defaults below.

use std::path::PathBuf;
use std::time::Duration;

/// Two persisted amounts closer than this are the same amount.
pub const DEDUP_AMOUNT_TOLERANCE: f64 = 0.01;

/// [`DEDUP_AMOUNT_TOLERANCE`] on the exact `amount_cents` column. Stored
/// amounts are whole cents, so only equal cents match.
pub const DEDUP_TOLERANCE_CENTS: i64 = 1;

/// Month label used for structured records built from the Opening column.
pub const OPENING_MONTH_LABEL: &str = "Opening";

/// Row errors beyond this many are counted but not kept verbatim.
pub const MAX_ERROR_SAMPLES: usize = 500;

pub const DEFAULT_DB_PATH: &str = "~/.ledger/ledger.db";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_PROGRESS_RETENTION_SECS: u64 = 3600;

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    pub busy_timeout: Duration,
    pub forex_post_step: bool,
    pub dedup_sweep: bool,
    pub progress_retention: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: expand_tilde(DEFAULT_DB_PATH),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            forex_post_step: true,
            dedup_sweep: true,
            progress_retention: Duration::from_secs(DEFAULT_PROGRESS_RETENTION_SECS),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: std::env::var("LEDGER_DB_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| expand_tilde(v.trim()))
                .unwrap_or(defaults.db_path),
            busy_timeout: env_u64("LEDGER_BUSY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
            forex_post_step: env_flag("LEDGER_FOREX_POSTSTEP", defaults.forex_post_step),
            dedup_sweep: env_flag("LEDGER_DEDUP_SWEEP", defaults.dedup_sweep),
            progress_retention: env_u64("LEDGER_PROGRESS_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.progress_retention),
        }
    }

    /// Same settings, different database file.
    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => parse_flag(&val).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}
