//! Execution source abstraction: the boundary to the ingestion collaborator.
//!
//! Broker connectivity and market data live outside this system; whatever
//! sits upstream hands over normalized trade executions through the
//! `ExecutionSource` trait.

use crate::domain::{AccountId, TradeExecution};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

pub mod csv_source;
pub mod mock;

pub use csv_source::CsvExecutionSource;
pub use mock::MockExecutionSource;

/// Source of normalized trade executions.
#[async_trait]
pub trait ExecutionSource: Send + Sync + fmt::Debug {
    /// Fetch executions for an account within an inclusive date range.
    ///
    /// Returned executions need not be sorted or deduplicated; the ingestor
    /// and derivation layers handle both.
    async fn fetch_executions(
        &self,
        account: &AccountId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<TradeExecution>, SourceError>;
}

/// Error type for execution source operations.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("malformed execution record: {0}")]
    Malformed(String),
}
