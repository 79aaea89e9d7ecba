//! Idempotent ingestion of trade executions into the append-only log.

use crate::datasource::{ExecutionSource, SourceError};
use crate::db::Repository;
use crate::domain::AccountId;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Clone)]
pub struct Ingestor {
    source: Arc<dyn ExecutionSource>,
    repo: Arc<Repository>,
}

impl Ingestor {
    pub fn new(source: Arc<dyn ExecutionSource>, repo: Arc<Repository>) -> Self {
        Self { source, repo }
    }

    /// Fetch executions for the account and append them to the log.
    ///
    /// Ingestion is idempotent by execution key: resubmitted executions are
    /// silently skipped and counted, never duplicated.
    pub async fn ensure_ingested(
        &self,
        account: &AccountId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<IngestionResult, IngestionError> {
        let executions = self.source.fetch_executions(account, from, to).await?;

        let fetched = executions.len();
        let ingested = self.repo.insert_executions_batch(&executions).await?;
        let duplicates = fetched - ingested;

        if duplicates > 0 {
            info!(
                account = account.as_str(),
                duplicates, "duplicate executions skipped during ingestion"
            );
        }

        Ok(IngestionResult {
            fetched,
            ingested,
            duplicates,
        })
    }
}

#[derive(Debug)]
pub struct IngestionResult {
    pub fetched: usize,
    pub ingested: usize,
    pub duplicates: usize,
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
