//! Run-versioned derived tables: lots, disposals, wash-sale links.
//!
//! Every reconciliation run writes a complete copy of the derived tables
//! under its own run_id inside one transaction and becomes the account's
//! current version at commit. A failed or cancelled run rolls back whole,
//! leaving the prior version untouched.

use crate::compile::{CompileState, SymbolDerivation};
use crate::domain::{
    AccountId, RealizedDisposal, Symbol, TaxLot, Term, WashSaleLink, WashStatus,
};
use sqlx::Row;
use tracing::{info, warn};

use super::{parse_date, parse_decimal, Repository, RunRecord, RunStatus, TaxYearSummary};

impl Repository {
    /// Atomically publish a new run version for an account.
    ///
    /// Inserts the freshly derived partitions, carries forward the prior
    /// run's rows for `carried_symbols`, updates watermarks, and swaps the
    /// current-run pointer, all in one transaction.
    ///
    /// # Errors
    /// Returns an error if any statement fails; the transaction rolls back
    /// and the prior current run stays published.
    pub async fn publish_run(
        &self,
        account: &AccountId,
        run_id: &str,
        as_of: chrono::NaiveDate,
        derivations: &[SymbolDerivation],
        carried_symbols: &[Symbol],
        states: &[CompileState],
    ) -> Result<(), sqlx::Error> {
        let started_at = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool().begin().await?;

        let prior: Option<String> = sqlx::query(
            "SELECT run_id FROM recon_runs WHERE account = ? AND status = 'current'",
        )
        .bind(account.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.get("run_id"));

        let version: i64 = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) + 1 AS next FROM recon_runs WHERE account = ?",
        )
        .bind(account.as_str())
        .fetch_one(&mut *tx)
        .await?
        .get("next");

        sqlx::query(
            r#"
            INSERT INTO recon_runs (
                run_id, account, version, status, as_of_date, supersedes_run_id,
                started_at, completed_at
            ) VALUES (?, ?, ?, 'pending', ?, ?, ?, NULL)
            "#,
        )
        .bind(run_id)
        .bind(account.as_str())
        .bind(version)
        .bind(as_of.to_string())
        .bind(prior.as_deref())
        .bind(started_at)
        .execute(&mut *tx)
        .await?;

        for derivation in derivations {
            for lot in &derivation.lots {
                sqlx::query(
                    r#"
                    INSERT INTO lots (
                        run_id, lot_id, account, symbol, acquisition_date,
                        acquisition_seq, original_quantity, remaining_quantity,
                        cost_basis_per_unit, wash_sale_adjustment_total
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(run_id)
                .bind(lot.lot_id.as_str())
                .bind(lot.account.as_str())
                .bind(lot.symbol.as_str())
                .bind(lot.acquisition_date.to_string())
                .bind(lot.acquisition_seq)
                .bind(lot.original_quantity)
                .bind(lot.remaining_quantity)
                .bind(lot.cost_basis_per_unit.to_canonical_string())
                .bind(lot.wash_sale_adjustment_total.to_canonical_string())
                .execute(&mut *tx)
                .await?;
            }

            for disposal in &derivation.disposals {
                sqlx::query(
                    r#"
                    INSERT INTO disposals (
                        run_id, disposal_id, lot_id, account, symbol,
                        close_date, close_seq, quantity, proceeds, cost_basis,
                        raw_gain_loss, disallowed_loss, adjusted_gain_loss,
                        term, wash_sale_flag, wash_status
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(run_id)
                .bind(disposal.disposal_id.as_str())
                .bind(disposal.lot_id.as_str())
                .bind(disposal.account.as_str())
                .bind(disposal.symbol.as_str())
                .bind(disposal.close_date.to_string())
                .bind(disposal.close_seq)
                .bind(disposal.quantity)
                .bind(disposal.proceeds.to_canonical_string())
                .bind(disposal.cost_basis.to_canonical_string())
                .bind(disposal.raw_gain_loss.to_canonical_string())
                .bind(disposal.disallowed_loss.to_canonical_string())
                .bind(disposal.adjusted_gain_loss.to_canonical_string())
                .bind(disposal.term.to_string())
                .bind(disposal.wash_sale_flag as i64)
                .bind(disposal.wash_status.to_string())
                .execute(&mut *tx)
                .await?;
            }

            for link in &derivation.links {
                sqlx::query(
                    r#"
                    INSERT INTO wash_sale_links (
                        run_id, account, symbol, loss_disposal_id,
                        replacement_lot_id, quantity_absorbed,
                        disallowed_amount, detected_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(run_id)
                .bind(derivation.account.as_str())
                .bind(derivation.symbol.as_str())
                .bind(link.loss_disposal_id.as_str())
                .bind(link.replacement_lot_id.as_str())
                .bind(link.quantity_absorbed)
                .bind(link.disallowed_amount.to_canonical_string())
                .bind(link.detected_at.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        if let Some(prior_run) = prior.as_deref() {
            for symbol in carried_symbols {
                sqlx::query(
                    r#"
                    INSERT INTO lots
                    SELECT ?, lot_id, account, symbol, acquisition_date,
                           acquisition_seq, original_quantity, remaining_quantity,
                           cost_basis_per_unit, wash_sale_adjustment_total
                    FROM lots
                    WHERE run_id = ? AND account = ? AND symbol = ?
                    "#,
                )
                .bind(run_id)
                .bind(prior_run)
                .bind(account.as_str())
                .bind(symbol.as_str())
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO disposals
                    SELECT ?, disposal_id, lot_id, account, symbol, close_date,
                           close_seq, quantity, proceeds, cost_basis,
                           raw_gain_loss, disallowed_loss, adjusted_gain_loss,
                           term, wash_sale_flag, wash_status
                    FROM disposals
                    WHERE run_id = ? AND account = ? AND symbol = ?
                    "#,
                )
                .bind(run_id)
                .bind(prior_run)
                .bind(account.as_str())
                .bind(symbol.as_str())
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO wash_sale_links
                    SELECT ?, account, symbol, loss_disposal_id,
                           replacement_lot_id, quantity_absorbed,
                           disallowed_amount, detected_at
                    FROM wash_sale_links
                    WHERE run_id = ? AND account = ? AND symbol = ?
                    "#,
                )
                .bind(run_id)
                .bind(prior_run)
                .bind(account.as_str())
                .bind(symbol.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        let updated_at = chrono::Utc::now().timestamp_millis();
        for state in states {
            sqlx::query(
                r#"
                INSERT INTO symbol_state (
                    account, symbol, last_execution_key, executions_seen, updated_at
                ) VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(account, symbol) DO UPDATE SET
                    last_execution_key = excluded.last_execution_key,
                    executions_seen = excluded.executions_seen,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(state.account.as_str())
            .bind(state.symbol.as_str())
            .bind(state.last_execution_key.as_str())
            .bind(state.executions_seen)
            .bind(updated_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE recon_runs SET status = 'superseded' WHERE account = ? AND status = 'current'",
        )
        .bind(account.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE recon_runs SET status = 'current', completed_at = ? WHERE run_id = ?",
        )
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(run_id, account = account.as_str(), "published reconciliation run");
        Ok(())
    }

    /// Record a run attempt that failed before publication.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn record_failed_run(
        &self,
        account: &AccountId,
        run_id: &str,
        as_of: chrono::NaiveDate,
    ) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().timestamp_millis();
        let version: i64 = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) + 1 AS next FROM recon_runs WHERE account = ?",
        )
        .bind(account.as_str())
        .fetch_one(self.pool())
        .await?
        .get("next");
        sqlx::query(
            r#"
            INSERT INTO recon_runs (
                run_id, account, version, status, as_of_date, supersedes_run_id,
                started_at, completed_at
            ) VALUES (?, ?, ?, 'failed', ?, NULL, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(account.as_str())
        .bind(version)
        .bind(as_of.to_string())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The account's published run id, if any run has completed.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn current_run_id(&self, account: &AccountId) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT run_id FROM recon_runs WHERE account = ? AND status = 'current'",
        )
        .bind(account.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| r.get("run_id")))
    }

    /// Fetch one run record.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT run_id, account, version, status, as_of_date,
                   supersedes_run_id, started_at, completed_at
            FROM recon_runs
            WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| row_to_run(&r)))
    }

    /// All run versions for an account, oldest first. The audit trail.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_runs(&self, account: &AccountId) -> Result<Vec<RunRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, account, version, status, as_of_date,
                   supersedes_run_id, started_at, completed_at
            FROM recon_runs
            WHERE account = ?
            ORDER BY version ASC
            "#,
        )
        .bind(account.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(row_to_run).collect())
    }

    /// Query the current run's disposals, optionally filtered by symbol and
    /// tax year, in deterministic (close_date, close_seq, disposal_id) order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_disposals(
        &self,
        account: &AccountId,
        symbol: Option<&Symbol>,
        tax_year: Option<i32>,
    ) -> Result<Vec<RealizedDisposal>, sqlx::Error> {
        let run_id = match self.current_run_id(account).await? {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        self.query_disposals_for_run(&run_id, account, symbol, tax_year)
            .await
    }

    /// Query one run version's disposals (for audit of superseded runs).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_disposals_for_run(
        &self,
        run_id: &str,
        account: &AccountId,
        symbol: Option<&Symbol>,
        tax_year: Option<i32>,
    ) -> Result<Vec<RealizedDisposal>, sqlx::Error> {
        let mut sql = String::from(
            r#"
            SELECT disposal_id, lot_id, account, symbol, close_date, close_seq,
                   quantity, proceeds, cost_basis, raw_gain_loss,
                   disallowed_loss, adjusted_gain_loss, term, wash_sale_flag,
                   wash_status
            FROM disposals
            WHERE run_id = ? AND account = ?
            "#,
        );
        if symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        if tax_year.is_some() {
            sql.push_str(" AND close_date >= ? AND close_date <= ?");
        }
        sql.push_str(" ORDER BY close_date ASC, close_seq ASC, disposal_id ASC");

        let mut query = sqlx::query(&sql).bind(run_id).bind(account.as_str());
        if let Some(symbol) = symbol {
            query = query.bind(symbol.as_str());
        }
        if let Some(year) = tax_year {
            query = query
                .bind(format!("{year}-01-01"))
                .bind(format!("{year}-12-31"));
        }

        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.iter().map(row_to_disposal).collect())
    }

    /// Every stored version of one disposal across runs, oldest run first.
    ///
    /// Back-references for audit: an amended disposal keeps its id, so its
    /// prior amounts remain addressable under superseded runs.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_disposal_versions(
        &self,
        account: &AccountId,
        disposal_id: &str,
    ) -> Result<Vec<(String, RealizedDisposal)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT d.run_id, d.disposal_id, d.lot_id, d.account, d.symbol,
                   d.close_date, d.close_seq, d.quantity, d.proceeds,
                   d.cost_basis, d.raw_gain_loss, d.disallowed_loss,
                   d.adjusted_gain_loss, d.term, d.wash_sale_flag, d.wash_status
            FROM disposals d
            JOIN recon_runs r ON r.run_id = d.run_id
            WHERE d.account = ? AND d.disposal_id = ?
            ORDER BY r.version ASC
            "#,
        )
        .bind(account.as_str())
        .bind(disposal_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("run_id"), row_to_disposal(row)))
            .collect())
    }

    /// Query the current run's open lots, optionally for one symbol.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_open_lots(
        &self,
        account: &AccountId,
        symbol: Option<&Symbol>,
    ) -> Result<Vec<TaxLot>, sqlx::Error> {
        let run_id = match self.current_run_id(account).await? {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let mut sql = String::from(
            r#"
            SELECT lot_id, account, symbol, acquisition_date, acquisition_seq,
                   original_quantity, remaining_quantity, cost_basis_per_unit,
                   wash_sale_adjustment_total
            FROM lots
            WHERE run_id = ? AND account = ? AND remaining_quantity > 0
            "#,
        );
        if symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        sql.push_str(" ORDER BY symbol ASC, acquisition_date ASC, acquisition_seq ASC, lot_id ASC");

        let mut query = sqlx::query(&sql).bind(&run_id).bind(account.as_str());
        if let Some(symbol) = symbol {
            query = query.bind(symbol.as_str());
        }

        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.iter().map(row_to_lot).collect())
    }

    /// Query the current run's wash-sale links in detection order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_wash_links(
        &self,
        account: &AccountId,
    ) -> Result<Vec<WashSaleLink>, sqlx::Error> {
        let run_id = match self.current_run_id(account).await? {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let rows = sqlx::query(
            r#"
            SELECT loss_disposal_id, replacement_lot_id, quantity_absorbed,
                   disallowed_amount, detected_at
            FROM wash_sale_links
            WHERE run_id = ? AND account = ?
            ORDER BY detected_at ASC, loss_disposal_id ASC, replacement_lot_id ASC
            "#,
        )
        .bind(&run_id)
        .bind(account.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(row_to_link).collect())
    }

    /// Fetch the stored watermark for a partition.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_symbol_state(
        &self,
        account: &AccountId,
        symbol: &Symbol,
    ) -> Result<Option<CompileState>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT last_execution_key, executions_seen
            FROM symbol_state
            WHERE account = ? AND symbol = ?
            "#,
        )
        .bind(account.as_str())
        .bind(symbol.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| {
            CompileState::new(
                account.clone(),
                symbol.clone(),
                r.get("last_execution_key"),
                r.get("executions_seen"),
            )
        }))
    }

    /// Aggregate the current run's disposals for one tax year.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn tax_year_summary(
        &self,
        account: &AccountId,
        tax_year: i32,
    ) -> Result<TaxYearSummary, sqlx::Error> {
        let disposals = self.query_disposals(account, None, Some(tax_year)).await?;

        let mut summary = TaxYearSummary {
            account: account.clone(),
            tax_year,
            short_term_gains: crate::domain::Decimal::zero(),
            short_term_losses: crate::domain::Decimal::zero(),
            long_term_gains: crate::domain::Decimal::zero(),
            long_term_losses: crate::domain::Decimal::zero(),
            net_short_term: crate::domain::Decimal::zero(),
            net_long_term: crate::domain::Decimal::zero(),
            total_net: crate::domain::Decimal::zero(),
            wash_sale_disallowed: crate::domain::Decimal::zero(),
            disposal_count: disposals.len(),
        };

        for disposal in &disposals {
            let amount = disposal.adjusted_gain_loss;
            match (disposal.term, amount.is_negative()) {
                (Term::Short, false) => summary.short_term_gains += amount,
                (Term::Short, true) => summary.short_term_losses += amount.abs(),
                (Term::Long, false) => summary.long_term_gains += amount,
                (Term::Long, true) => summary.long_term_losses += amount.abs(),
            }
            summary.wash_sale_disallowed += disposal.disallowed_loss;
        }

        summary.net_short_term = summary.short_term_gains - summary.short_term_losses;
        summary.net_long_term = summary.long_term_gains - summary.long_term_losses;
        summary.total_net = summary.net_short_term + summary.net_long_term;
        Ok(summary)
    }
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> RunRecord {
    let status_str: String = row.get("status");
    let status = RunStatus::parse(&status_str).unwrap_or_else(|| {
        warn!(value = status_str, "corrupt run status in database, using failed");
        RunStatus::Failed
    });
    let as_of: String = row.get("as_of_date");
    RunRecord {
        run_id: row.get("run_id"),
        account: AccountId::new(row.get("account")),
        version: row.get("version"),
        status,
        as_of_date: parse_date("as_of_date", &as_of),
        supersedes_run_id: row.get("supersedes_run_id"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    }
}

fn row_to_lot(row: &sqlx::sqlite::SqliteRow) -> TaxLot {
    let acquisition_date: String = row.get("acquisition_date");
    let cost_basis_per_unit: String = row.get("cost_basis_per_unit");
    let wash_total: String = row.get("wash_sale_adjustment_total");
    TaxLot {
        lot_id: row.get("lot_id"),
        account: AccountId::new(row.get("account")),
        symbol: Symbol::new(row.get("symbol")),
        acquisition_date: parse_date("acquisition_date", &acquisition_date),
        acquisition_seq: row.get("acquisition_seq"),
        original_quantity: row.get("original_quantity"),
        remaining_quantity: row.get("remaining_quantity"),
        cost_basis_per_unit: parse_decimal("cost_basis_per_unit", &cost_basis_per_unit),
        wash_sale_adjustment_total: parse_decimal("wash_sale_adjustment_total", &wash_total),
    }
}

fn row_to_disposal(row: &sqlx::sqlite::SqliteRow) -> RealizedDisposal {
    let close_date: String = row.get("close_date");
    let proceeds: String = row.get("proceeds");
    let cost_basis: String = row.get("cost_basis");
    let raw_gain_loss: String = row.get("raw_gain_loss");
    let disallowed_loss: String = row.get("disallowed_loss");
    let adjusted_gain_loss: String = row.get("adjusted_gain_loss");
    let term_str: String = row.get("term");
    let term = Term::parse(&term_str).unwrap_or_else(|| {
        warn!(value = term_str, "corrupt term in database, using short");
        Term::Short
    });
    let status_str: String = row.get("wash_status");
    let wash_status = WashStatus::parse(&status_str).unwrap_or_else(|| {
        warn!(value = status_str, "corrupt wash status in database, using pending");
        WashStatus::Pending
    });

    RealizedDisposal {
        disposal_id: row.get("disposal_id"),
        lot_id: row.get("lot_id"),
        account: AccountId::new(row.get("account")),
        symbol: Symbol::new(row.get("symbol")),
        close_date: parse_date("close_date", &close_date),
        close_seq: row.get("close_seq"),
        quantity: row.get("quantity"),
        proceeds: parse_decimal("proceeds", &proceeds),
        cost_basis: parse_decimal("cost_basis", &cost_basis),
        raw_gain_loss: parse_decimal("raw_gain_loss", &raw_gain_loss),
        disallowed_loss: parse_decimal("disallowed_loss", &disallowed_loss),
        adjusted_gain_loss: parse_decimal("adjusted_gain_loss", &adjusted_gain_loss),
        term,
        wash_sale_flag: row.get::<i64, _>("wash_sale_flag") != 0,
        wash_status,
    }
}

fn row_to_link(row: &sqlx::sqlite::SqliteRow) -> WashSaleLink {
    let disallowed_amount: String = row.get("disallowed_amount");
    let detected_at: String = row.get("detected_at");
    WashSaleLink {
        loss_disposal_id: row.get("loss_disposal_id"),
        replacement_lot_id: row.get("replacement_lot_id"),
        quantity_absorbed: row.get("quantity_absorbed"),
        disallowed_amount: parse_decimal("disallowed_amount", &disallowed_amount),
        detected_at: parse_date("detected_at", &detected_at),
    }
}
