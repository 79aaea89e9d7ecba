//! Append-only execution log operations.

use crate::domain::{AccountId, Side, Symbol, TradeExecution, TradeStamp};
use chrono::NaiveDate;
use sqlx::Row;
use tracing::warn;

use super::{parse_date, parse_decimal, Repository};

impl Repository {
    /// Insert an execution into the log idempotently.
    ///
    /// Returns false when the execution key was already present.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_execution(&self, execution: &TradeExecution) -> Result<bool, sqlx::Error> {
        let specific_lots = encode_specific_lots(execution);
        let result = sqlx::query(
            r#"
            INSERT INTO executions (
                account, symbol, trade_date, seq, side, quantity, price,
                commission, specific_lots, execution_key, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(execution_key) DO NOTHING
            "#,
        )
        .bind(execution.account.as_str())
        .bind(execution.symbol.as_str())
        .bind(execution.stamp.date.to_string())
        .bind(execution.stamp.seq)
        .bind(execution.side.to_string())
        .bind(execution.quantity)
        .bind(execution.price.to_canonical_string())
        .bind(execution.commission.to_canonical_string())
        .bind(specific_lots)
        .bind(execution.execution_key.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert multiple executions in a single transaction.
    ///
    /// Returns the number of newly inserted executions (excludes duplicates).
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_executions_batch(
        &self,
        executions: &[TradeExecution],
    ) -> Result<usize, sqlx::Error> {
        if executions.is_empty() {
            return Ok(0);
        }

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut total_inserted = 0usize;

        let mut tx = self.pool().begin().await?;

        for execution in executions {
            let specific_lots = encode_specific_lots(execution);
            let result = sqlx::query(
                r#"
                INSERT INTO executions (
                    account, symbol, trade_date, seq, side, quantity, price,
                    commission, specific_lots, execution_key, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(execution_key) DO NOTHING
                "#,
            )
            .bind(execution.account.as_str())
            .bind(execution.symbol.as_str())
            .bind(execution.stamp.date.to_string())
            .bind(execution.stamp.seq)
            .bind(execution.side.to_string())
            .bind(execution.quantity)
            .bind(execution.price.to_canonical_string())
            .bind(execution.commission.to_canonical_string())
            .bind(specific_lots)
            .bind(execution.execution_key.as_str())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Query the execution log for an account, optionally one symbol,
    /// in deterministic (date, seq, key) order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_executions(
        &self,
        account: &AccountId,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<TradeExecution>, sqlx::Error> {
        let (sql, binds_symbol) = if symbol.is_some() {
            (
                r#"
                SELECT account, symbol, trade_date, seq, side, quantity, price,
                       commission, specific_lots, execution_key
                FROM executions
                WHERE account = ? AND symbol = ?
                ORDER BY trade_date ASC, seq ASC, execution_key ASC
                "#,
                true,
            )
        } else {
            (
                r#"
                SELECT account, symbol, trade_date, seq, side, quantity, price,
                       commission, specific_lots, execution_key
                FROM executions
                WHERE account = ?
                ORDER BY trade_date ASC, seq ASC, execution_key ASC
                "#,
                false,
            )
        };

        let mut query = sqlx::query(sql).bind(account.as_str());
        if binds_symbol {
            query = query.bind(symbol.expect("binds_symbol implies symbol is Some").as_str());
        }

        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.iter().map(row_to_execution).collect())
    }

    /// Query distinct symbols traded by an account.
    ///
    /// Used to determine which per-symbol derivations a run must consider.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_distinct_symbols(
        &self,
        account: &AccountId,
    ) -> Result<Vec<Symbol>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT symbol
            FROM executions
            WHERE account = ?
            ORDER BY symbol ASC
            "#,
        )
        .bind(account.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Symbol::new(row.get::<String, _>("symbol")))
            .collect())
    }

    /// The event-log horizon for an account: its latest trade date.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_log_as_of(
        &self,
        account: &AccountId,
    ) -> Result<Option<NaiveDate>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT MAX(trade_date) AS as_of
            FROM executions
            WHERE account = ?
            "#,
        )
        .bind(account.as_str())
        .fetch_one(self.pool())
        .await?;

        let as_of: Option<String> = row.get("as_of");
        Ok(as_of.map(|s| parse_date("trade_date", &s)))
    }
}

fn encode_specific_lots(execution: &TradeExecution) -> Option<String> {
    execution.specific_lots.as_ref().and_then(|lots| {
        serde_json::to_string(lots)
            .map_err(|e| {
                warn!(
                    execution_key = execution.execution_key(),
                    error = %e,
                    "failed to encode specific-lot plan"
                );
                e
            })
            .ok()
    })
}

fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> TradeExecution {
    let trade_date: String = row.get("trade_date");
    let side_str: String = row.get("side");
    let side = Side::parse(&side_str).unwrap_or_else(|| {
        warn!(value = side_str, "corrupt side in database, using buy");
        Side::Buy
    });
    let price: String = row.get("price");
    let commission: String = row.get("commission");
    let specific_lots: Option<String> = row.get("specific_lots");

    TradeExecution {
        execution_key: row.get("execution_key"),
        account: AccountId::new(row.get("account")),
        symbol: Symbol::new(row.get("symbol")),
        stamp: TradeStamp::new(parse_date("trade_date", &trade_date), row.get("seq")),
        side,
        quantity: row.get("quantity"),
        price: parse_decimal("price", &price),
        commission: parse_decimal("commission", &commission),
        specific_lots: specific_lots.and_then(|s| serde_json::from_str(&s).ok()),
    }
}
