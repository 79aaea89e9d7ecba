//! Reconciliation runs: the only component with I/O boundaries.
//!
//! Phase 1 re-derives touched symbol partitions in parallel (they share no
//! state); phase 2 is the account-wide barrier that publishes a complete,
//! versioned derived-table copy atomically. A failing partition is reported
//! and its prior rows carried forward; it never blocks the others.

use crate::compile::{CompileOptions, CompileState, SymbolCompiler, SymbolDerivation};
use crate::config::Config;
use crate::db::{Repository, TaxYearSummary};
use crate::domain::{
    ordering::{sort_executions_deterministic, ExecutionOrderingKey},
    AccountId, Symbol, TradeExecution, WashStatus,
};
use crate::error::LedgerError;
use crate::orchestration::ingest::{IngestionError, Ingestor};
use chrono::{Duration, NaiveDate};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct Reconciler {
    ingestor: Ingestor,
    repo: Arc<Repository>,
    config: Config,
}

impl Reconciler {
    pub fn new(ingestor: Ingestor, repo: Arc<Repository>, config: Config) -> Self {
        Self {
            ingestor,
            repo,
            config,
        }
    }

    /// Ingest new executions for the account, then recompute.
    pub async fn reconcile(
        &self,
        account: &AccountId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<RunReport, RunError> {
        let ingestion = self.ingestor.ensure_ingested(account, from, to).await?;
        let mut report = self.recompute(account).await?;
        report.executions_ingested = ingestion.ingested;
        report.duplicates_skipped = ingestion.duplicates;
        Ok(report)
    }

    /// Recompute the account's derived tables from the stored log.
    ///
    /// Watermarks decide which symbols changed; those are re-derived from
    /// scratch (late arrivals invalidate incremental patching), unchanged
    /// symbols are carried forward, and the result is published as a new run
    /// version. With nothing to do, the current run stands.
    pub async fn recompute(&self, account: &AccountId) -> Result<RunReport, RunError> {
        let as_of = match self.repo.query_log_as_of(account).await? {
            Some(date) => date,
            None => return Ok(RunReport::empty(account.clone())),
        };

        let symbols = self.repo.query_distinct_symbols(account).await?;
        let options = CompileOptions {
            method: self.config.default_method,
            wash_window_days: self.config.wash_window_days,
            long_term_threshold_days: self.config.long_term_threshold_days,
            as_of,
        };

        // Partition symbols into touched (re-derive) and covered (carry).
        let mut touched: Vec<(Symbol, Vec<TradeExecution>, CompileState)> = Vec::new();
        let mut carried: Vec<Symbol> = Vec::new();
        let mut executions_total = 0usize;

        for symbol in symbols {
            let mut executions = self.repo.query_executions(account, Some(&symbol)).await?;
            sort_executions_deterministic(&mut executions);
            executions_total += executions.len();

            let tail = match executions.last() {
                Some(last) => ExecutionOrderingKey::from_execution(last).execution_key,
                None => continue,
            };
            let next_state = CompileState::new(
                account.clone(),
                symbol.clone(),
                tail,
                executions.len() as i64,
            );

            let covered = self
                .repo
                .get_symbol_state(account, &symbol)
                .await?
                .map(|s| s.covers(&next_state.last_execution_key, next_state.executions_seen))
                .unwrap_or(false);
            if covered {
                carried.push(symbol);
            } else {
                touched.push((symbol, executions, next_state));
            }
        }

        if touched.is_empty() {
            info!(account = account.as_str(), "log unchanged, current run stands");
            return self.report_from_current(account, Some(as_of), executions_total).await;
        }

        // Phase 1: independent partitions in parallel.
        let handles: Vec<_> = touched
            .into_iter()
            .map(|(symbol, executions, state)| {
                let account = account.clone();
                let options = options;
                tokio::task::spawn_blocking(move || {
                    let outcome =
                        SymbolCompiler::derive(account, symbol.clone(), executions, &options);
                    (symbol, state, outcome)
                })
            })
            .collect();

        let mut derivations: Vec<SymbolDerivation> = Vec::new();
        let mut states: Vec<CompileState> = Vec::new();
        let mut failed: Vec<(Symbol, String)> = Vec::new();
        for joined in join_all(handles).await {
            let (symbol, state, outcome) =
                joined.map_err(|e| RunError::Join(e.to_string()))?;
            match outcome {
                Ok(derivation) => {
                    derivations.push(derivation);
                    states.push(state);
                }
                Err(e) => {
                    error!(
                        account = state.account.as_str(),
                        symbol = symbol.as_str(),
                        error = %e,
                        "symbol partition failed, carrying prior rows"
                    );
                    failed.push((symbol.clone(), e.to_string()));
                    carried.push(symbol);
                }
            }
        }

        // Phase 2: account-wide barrier. One transaction swaps the version.
        let run_id = Uuid::new_v4().to_string();
        if let Err(e) = self
            .repo
            .publish_run(account, &run_id, as_of, &derivations, &carried, &states)
            .await
        {
            let _ = self.repo.record_failed_run(account, &run_id, as_of).await;
            return Err(e.into());
        }

        let mut report = self
            .report_from_current(account, Some(as_of), executions_total)
            .await?;
        report.symbols_recomputed = derivations.iter().map(|d| d.symbol.clone()).collect();
        report.symbols_carried = carried;
        report.symbols_failed = failed;
        Ok(report)
    }

    /// Re-derive a closed tax year and return its summary.
    ///
    /// Refused while the year's final wash windows are still open: a loss in
    /// late December can be reshaped by a January purchase.
    ///
    /// # Errors
    /// `StaleReplacementWindow` until the log's horizon clears
    /// `Dec 31 + window_days`.
    pub async fn run_closed_year(
        &self,
        account: &AccountId,
        year: i32,
    ) -> Result<(RunReport, TaxYearSummary), RunError> {
        let year_end = NaiveDate::from_ymd_opt(year, 12, 31)
            .expect("december 31 exists in every year");
        let window_closes = year_end + Duration::days(self.config.wash_window_days);

        let as_of = self
            .repo
            .query_log_as_of(account)
            .await?
            .unwrap_or(NaiveDate::MIN);
        if as_of < window_closes {
            return Err(RunError::Ledger(LedgerError::StaleReplacementWindow {
                window_closes,
                as_of,
            }));
        }

        let report = self.recompute(account).await?;
        let summary = self.repo.tax_year_summary(account, year).await?;
        Ok((report, summary))
    }

    /// Recompute every configured account, collecting per-account reports.
    pub async fn recompute_all(&self) -> Result<Vec<RunReport>, RunError> {
        let mut reports = Vec::new();
        for account in &self.config.accounts {
            let account = AccountId::new(account.clone());
            reports.push(self.recompute(&account).await?);
        }
        Ok(reports)
    }

    async fn report_from_current(
        &self,
        account: &AccountId,
        as_of: Option<NaiveDate>,
        executions_total: usize,
    ) -> Result<RunReport, RunError> {
        let run_id = self.repo.current_run_id(account).await?;
        let disposals = self.repo.query_disposals(account, None, None).await?;
        let links = self.repo.query_wash_links(account).await?;

        let needs_review = disposals
            .iter()
            .filter(|d| d.wash_status == WashStatus::Pending)
            .map(|d| d.disposal_id.clone())
            .collect();

        Ok(RunReport {
            run_id,
            account: account.clone(),
            as_of,
            executions_total,
            executions_ingested: 0,
            duplicates_skipped: 0,
            symbols_recomputed: Vec::new(),
            symbols_carried: Vec::new(),
            symbols_failed: Vec::new(),
            disposals_total: disposals.len(),
            wash_sale_links_total: links.len(),
            needs_review,
        })
    }
}

/// Structured result of a reconciliation pass: successes, skipped
/// duplicates, failed partitions, and disposals needing review. A single bad
/// record surfaces here instead of failing the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Published run version; None when the account has no executions yet.
    pub run_id: Option<String>,
    pub account: AccountId,
    pub as_of: Option<NaiveDate>,
    pub executions_total: usize,
    pub executions_ingested: usize,
    pub duplicates_skipped: usize,
    pub symbols_recomputed: Vec<Symbol>,
    pub symbols_carried: Vec<Symbol>,
    pub symbols_failed: Vec<(Symbol, String)>,
    pub disposals_total: usize,
    pub wash_sale_links_total: usize,
    /// Disposal ids whose forward wash window is still open.
    pub needs_review: Vec<String>,
}

impl RunReport {
    fn empty(account: AccountId) -> Self {
        RunReport {
            run_id: None,
            account,
            as_of: None,
            executions_total: 0,
            executions_ingested: 0,
            duplicates_skipped: 0,
            symbols_recomputed: Vec::new(),
            symbols_carried: Vec::new(),
            symbols_failed: Vec::new(),
            disposals_total: 0,
            wash_sale_links_total: 0,
            needs_review: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("derivation task failed: {0}")]
    Join(String),
}
