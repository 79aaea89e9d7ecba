use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by lot matching, wash-sale scanning, and reconciliation.
///
/// Matching errors (`InsufficientLots`, `AmbiguousSpecificId`) are returned
/// synchronously to the caller of the sell that caused them. Everything else
/// is partition-scoped: a failing symbol halts its own recomputation and is
/// reported, without blocking other symbols.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Sell quantity exceeds the open position. Rejected, never clamped.
    #[error("insufficient lots: requested {requested} but only {available} open")]
    InsufficientLots { requested: i64, available: i64 },

    /// A specific-identification plan does not add up against the open lots.
    #[error("ambiguous specific-identification request: {0}")]
    AmbiguousSpecificId(String),

    /// The same execution key was applied twice. Non-fatal at ingestion
    /// (logged and skipped); fatal if it reaches the ledger.
    #[error("duplicate execution: {0}")]
    DuplicateExecution(String),

    /// A finalized result was requested before the forward wash-sale window
    /// elapsed in event-log time.
    #[error("wash-sale window open until {window_closes}, event log only reaches {as_of}")]
    StaleReplacementWindow {
        window_closes: NaiveDate,
        as_of: NaiveDate,
    },

    /// An internal invariant was violated. Fatal for the affected symbol
    /// partition, pending manual review.
    #[error("corrupted ledger state for {symbol}: {detail}")]
    CorruptedLedgerState { symbol: String, detail: String },
}
