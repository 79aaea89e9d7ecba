//! Derivation pipeline: from the append-only execution log to the lot,
//! disposal, and wash-sale-link tables.
//!
//! This module provides:
//! - Watermark state deciding which symbols a run must re-derive
//! - Full per-symbol derivation (lot matching, wash scan, finalization)
//!
//! A touched symbol is always re-derived from scratch: late-arriving
//! executions invalidate incremental patching of lot order, and wash-sale
//! adjustments reach forward through the whole window.

use crate::domain::{AccountId, Symbol};
use serde::{Deserialize, Serialize};

pub mod symbol;

pub use symbol::{CompileOptions, SymbolCompiler, SymbolDerivation};

/// Watermark for one (account, symbol) partition.
///
/// Records the tail of the execution stream the current run derived from. A
/// partition whose stored watermark no longer matches the log — a new tail
/// key, or a changed count revealing a late arrival behind an unchanged
/// tail — needs re-derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileState {
    pub account: AccountId,
    pub symbol: Symbol,
    /// Ordering-wise last execution key covered by the current derivation.
    pub last_execution_key: String,
    /// Total executions covered; catches insertions behind the tail.
    pub executions_seen: i64,
}

impl CompileState {
    pub fn new(
        account: AccountId,
        symbol: Symbol,
        last_execution_key: String,
        executions_seen: i64,
    ) -> Self {
        Self {
            account,
            symbol,
            last_execution_key,
            executions_seen,
        }
    }

    /// True if a log with this tail and count is already covered.
    pub fn covers(&self, last_execution_key: &str, executions_seen: i64) -> bool {
        self.last_execution_key == last_execution_key && self.executions_seen == executions_seen
    }
}
