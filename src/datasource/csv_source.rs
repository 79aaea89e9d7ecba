//! CSV-backed execution source.
//!
//! Reads normalized executions exported by an upstream system. Expected
//! header: execution_id, account, symbol, trade_date, seq, side, quantity,
//! price, commission. execution_id may be empty (a content hash is derived);
//! side accepts buy/sell in any case.

use super::{ExecutionSource, SourceError};
use crate::domain::{AccountId, Decimal, Side, Symbol, TradeExecution, TradeStamp};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;

/// Execution source reading a CSV file from disk.
#[derive(Debug, Clone)]
pub struct CsvExecutionSource {
    path: PathBuf,
}

impl CsvExecutionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse a CSV byte stream into executions.
    ///
    /// # Errors
    /// `SourceError::Parse` on CSV structure problems,
    /// `SourceError::Malformed` on records violating the data model
    /// (non-positive quantity, negative amounts, bad side or date).
    pub fn parse_csv(csv_bytes: &[u8]) -> Result<Vec<TradeExecution>, SourceError> {
        #[derive(Debug, serde::Deserialize)]
        struct Row {
            execution_id: Option<String>,
            account: String,
            symbol: String,
            trade_date: String,
            seq: i64,
            side: String,
            quantity: i64,
            price: String,
            commission: String,
        }

        fn parse_side(s: &str) -> Option<Side> {
            Side::parse(&s.trim().to_ascii_lowercase())
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(csv_bytes);

        let mut executions = Vec::new();
        for record in reader.deserialize::<Row>() {
            let row = record.map_err(|e| SourceError::Parse(e.to_string()))?;

            let side = parse_side(&row.side)
                .ok_or_else(|| SourceError::Malformed(format!("invalid side: {}", row.side)))?;
            let trade_date = NaiveDate::parse_from_str(row.trade_date.trim(), "%Y-%m-%d")
                .map_err(|e| {
                    SourceError::Malformed(format!("invalid trade_date {}: {}", row.trade_date, e))
                })?;
            let price = Decimal::from_str_canonical(row.price.trim())
                .map_err(|e| SourceError::Malformed(format!("invalid price: {}", e)))?;
            let commission = Decimal::from_str_canonical(row.commission.trim())
                .map_err(|e| SourceError::Malformed(format!("invalid commission: {}", e)))?;

            if row.quantity <= 0 {
                return Err(SourceError::Malformed(format!(
                    "non-positive quantity {}",
                    row.quantity
                )));
            }
            if price.is_negative() || commission.is_negative() {
                return Err(SourceError::Malformed(
                    "negative price or commission".to_string(),
                ));
            }

            let source_id = row
                .execution_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty());
            executions.push(TradeExecution::new(
                AccountId::new(row.account.trim().to_string()),
                Symbol::new(row.symbol.trim().to_string()),
                TradeStamp::new(trade_date, row.seq),
                side,
                row.quantity,
                price,
                commission,
                source_id,
            ));
        }

        Ok(executions)
    }
}

#[async_trait]
impl ExecutionSource for CsvExecutionSource {
    async fn fetch_executions(
        &self,
        account: &AccountId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<TradeExecution>, SourceError> {
        let path = self.path.clone();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SourceError::Io(format!("{}: {}", path.display(), e)))?;

        let executions = Self::parse_csv(&bytes)?;
        Ok(executions
            .into_iter()
            .filter(|e| {
                e.account == *account
                    && from.map_or(true, |d| e.stamp.date >= d)
                    && to.map_or(true, |d| e.stamp.date <= d)
            })
            .collect())
    }
}
