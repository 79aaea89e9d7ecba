//! Mock execution source for testing without files or networks.

use super::{ExecutionSource, SourceError};
use crate::domain::{AccountId, TradeExecution};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Mock execution source that returns predefined test data.
#[derive(Debug, Clone, Default)]
pub struct MockExecutionSource {
    executions: Vec<TradeExecution>,
}

impl MockExecutionSource {
    /// Create a new mock source with no data.
    pub fn new() -> Self {
        Self {
            executions: Vec::new(),
        }
    }

    /// Add one execution.
    pub fn with_execution(mut self, execution: TradeExecution) -> Self {
        self.executions.push(execution);
        self
    }

    /// Add multiple executions.
    pub fn with_executions(mut self, executions: Vec<TradeExecution>) -> Self {
        self.executions.extend(executions);
        self
    }
}

#[async_trait]
impl ExecutionSource for MockExecutionSource {
    async fn fetch_executions(
        &self,
        account: &AccountId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<TradeExecution>, SourceError> {
        Ok(self
            .executions
            .iter()
            .filter(|e| {
                e.account == *account
                    && from.map_or(true, |d| e.stamp.date >= d)
                    && to.map_or(true, |d| e.stamp.date <= d)
            })
            .cloned()
            .collect())
    }
}
