//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `executions.rs` - append-only execution log operations
//! - `derived.rs` - run-versioned lot/disposal/link tables and queries

mod derived;
mod executions;

use crate::domain::{AccountId, Decimal};
use chrono::NaiveDate;
use sqlx::sqlite::SqlitePool;
use tracing::warn;

/// Lifecycle status of a reconciliation run version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Being written; not visible to consumers.
    Pending,
    /// The published version consumers read.
    Current,
    /// Replaced by a later run; retained for audit.
    Superseded,
    /// Aborted before publication.
    Failed,
}

impl RunStatus {
    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "current" => Some(RunStatus::Current),
            "superseded" => Some(RunStatus::Superseded),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Current => write!(f, "current"),
            RunStatus::Superseded => write!(f, "superseded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One reconciliation run version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub account: AccountId,
    /// Monotonic per-account version; the audit order of runs.
    pub version: i64,
    pub status: RunStatus,
    pub as_of_date: NaiveDate,
    pub supersedes_run_id: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

/// Aggregate of one account's disposals for a tax year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxYearSummary {
    pub account: AccountId,
    pub tax_year: i32,
    pub short_term_gains: Decimal,
    /// Magnitude of short-term losses (positive number).
    pub short_term_losses: Decimal,
    pub long_term_gains: Decimal,
    /// Magnitude of long-term losses (positive number).
    pub long_term_losses: Decimal,
    pub net_short_term: Decimal,
    pub net_long_term: Decimal,
    pub total_net: Decimal,
    pub wash_sale_disallowed: Decimal,
    pub disposal_count: usize,
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Parse a stored canonical decimal, falling back to zero on corruption.
pub(crate) fn parse_decimal(column: &str, s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap_or_else(|_| {
        warn!(column, value = s, "corrupt decimal in database, using 0");
        Decimal::zero()
    })
}

/// Parse a stored ISO date, falling back to the epoch on corruption.
pub(crate) fn parse_date(column: &str, s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_else(|_| {
        warn!(column, value = s, "corrupt date in database, using epoch");
        NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date is valid")
    })
}
