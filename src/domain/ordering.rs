//! Stable execution ordering for deterministic processing.

use crate::domain::TradeExecution;
use chrono::NaiveDate;

/// Stable ordering key for executions.
///
/// Ensures deterministic ordering of executions on the same trade date.
/// Ordering: trade date -> same-day sequence -> execution key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExecutionOrderingKey {
    /// Trade date (primary sort).
    pub date: NaiveDate,
    /// Same-day sequence number (secondary sort).
    pub seq: i64,
    /// Execution key (fallback sort).
    pub execution_key: String,
}

impl ExecutionOrderingKey {
    /// Create an ordering key from a TradeExecution.
    pub fn from_execution(execution: &TradeExecution) -> Self {
        ExecutionOrderingKey {
            date: execution.stamp.date,
            seq: execution.stamp.seq,
            execution_key: execution.execution_key().to_string(),
        }
    }
}

/// Sort executions deterministically.
pub fn sort_executions_deterministic(executions: &mut [TradeExecution]) {
    executions.sort_by(|a, b| {
        let key_a = ExecutionOrderingKey::from_execution(a);
        let key_b = ExecutionOrderingKey::from_execution(b);
        key_a.cmp(&key_b)
    });
}
