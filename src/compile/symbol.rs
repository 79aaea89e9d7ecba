//! Full derivation of one (account, symbol) partition.

use crate::domain::{
    ordering::sort_executions_deterministic, AccountId, AccountingMethod, RealizedDisposal, Side,
    Symbol, TaxLot, TradeExecution, WashSaleLink, WashStatus,
};
use crate::engine::{GainLossCalculator, LotLedger, WashSaleEngine};
use crate::error::LedgerError;
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::warn;

/// Derivation parameters shared by every partition of a run.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub method: AccountingMethod,
    pub wash_window_days: i64,
    pub long_term_threshold_days: i64,
    /// Horizon of the event log; losses whose forward window crosses it are
    /// flagged pending.
    pub as_of: NaiveDate,
}

/// Everything one partition derivation produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDerivation {
    pub account: AccountId,
    pub symbol: Symbol,
    /// All lots in creation order, open and retired.
    pub lots: Vec<TaxLot>,
    /// Final disposal records in close order.
    pub disposals: Vec<RealizedDisposal>,
    pub links: Vec<WashSaleLink>,
}

impl SymbolDerivation {
    /// Disposal ids still awaiting their forward wash window.
    pub fn pending_disposal_ids(&self) -> Vec<&str> {
        self.disposals
            .iter()
            .filter(|d| d.wash_status == WashStatus::Pending)
            .map(|d| d.disposal_id.as_str())
            .collect()
    }
}

/// Derives one partition from scratch.
///
/// The sweep is strictly chronological: buys create lots, sells consume
/// them, and each loss is wash-scanned at its own close stamp with future
/// buys visible through the execution schedule. Deferred losses raise
/// replacement-lot basis pools before any later disposal draws on them, so
/// cascaded wash sales fall out of the single pass.
pub struct SymbolCompiler;

impl SymbolCompiler {
    /// Derive lots, disposals, and wash links for one (account, symbol).
    ///
    /// `executions` may arrive unsorted; duplicates (by execution key) are
    /// logged and skipped. Executions for other partitions are a caller bug
    /// and surface as `CorruptedLedgerState`.
    ///
    /// # Errors
    /// Any `LedgerError` from matching or invariant checking; the partition
    /// is then halted pending manual review and other partitions proceed.
    pub fn derive(
        account: AccountId,
        symbol: Symbol,
        mut executions: Vec<TradeExecution>,
        options: &CompileOptions,
    ) -> Result<SymbolDerivation, LedgerError> {
        sort_executions_deterministic(&mut executions);

        // Dedup before the wash engine indexes the buy schedule: a
        // duplicated buy must not double its replacement capacity.
        let mut seen = HashSet::new();
        executions.retain(|execution| {
            if seen.insert(execution.execution_key().to_string()) {
                true
            } else {
                warn!(
                    execution_key = execution.execution_key(),
                    "duplicate execution skipped during derivation"
                );
                false
            }
        });

        let mut ledger = LotLedger::new(account.clone(), symbol.clone());
        let mut wash = WashSaleEngine::new(options.wash_window_days, &executions);
        let mut raw_disposals = Vec::new();

        for execution in &executions {
            match execution.side {
                Side::Buy => {
                    ledger.apply_buy(execution)?;
                }
                Side::Sell => {
                    let slices = ledger.apply_sell(execution, options.method)?;
                    for raw in slices {
                        let links = wash.scan_loss(&raw, &ledger);
                        for link in &links {
                            ledger
                                .apply_wash_adjustment(&link.replacement_lot_id, link.disallowed_amount);
                        }
                        raw_disposals.push(raw);
                    }
                }
            }
        }

        ledger.check_invariants()?;

        let links = wash.into_links();
        let calculator = GainLossCalculator::new(
            options.long_term_threshold_days,
            options.wash_window_days,
            options.as_of,
        );
        let disposals = raw_disposals
            .iter()
            .map(|raw| calculator.finalize(raw, &links))
            .collect();

        Ok(SymbolDerivation {
            account,
            symbol,
            lots: ledger.into_lots(),
            disposals,
            links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decimal, Term, TradeStamp};
    use chrono::Duration;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(n as i64 - 1)
    }

    fn exec(side: Side, qty: i64, px: &str, n: u32, id: &str) -> TradeExecution {
        TradeExecution::new(
            AccountId::new("acct-1".to_string()),
            Symbol::new("AAPL".to_string()),
            TradeStamp::new(day(n), 0),
            side,
            qty,
            d(px),
            Decimal::zero(),
            Some(id),
        )
    }

    fn options(as_of_day: u32) -> CompileOptions {
        CompileOptions {
            method: AccountingMethod::Fifo,
            wash_window_days: 30,
            long_term_threshold_days: 365,
            as_of: day(as_of_day),
        }
    }

    fn derive(executions: Vec<TradeExecution>, as_of_day: u32) -> SymbolDerivation {
        SymbolCompiler::derive(
            AccountId::new("acct-1".to_string()),
            Symbol::new("AAPL".to_string()),
            executions,
            &options(as_of_day),
        )
        .unwrap()
    }

    #[test]
    fn test_wash_sale_end_to_end() {
        // Buy 100 @ $10; sell 100 @ $8 ten days later; buy 100 @ $9 five
        // days after that. The $200 loss defers in full.
        let derivation = derive(
            vec![
                exec(Side::Buy, 100, "10", 1, "B1"),
                exec(Side::Sell, 100, "8", 11, "S1"),
                exec(Side::Buy, 100, "9", 16, "B2"),
            ],
            60,
        );

        assert_eq!(derivation.disposals.len(), 1);
        let disposal = &derivation.disposals[0];
        assert_eq!(disposal.raw_gain_loss, d("-200"));
        assert_eq!(disposal.disallowed_loss, d("200"));
        assert_eq!(disposal.adjusted_gain_loss, Decimal::zero());
        assert!(disposal.wash_sale_flag);
        assert_eq!(disposal.wash_status, WashStatus::Final);

        let replacement = derivation
            .lots
            .iter()
            .find(|l| l.lot_id == "lot:ext:B2")
            .unwrap();
        assert_eq!(replacement.wash_sale_adjustment_total, d("200"));
        assert_eq!(derivation.links.len(), 1);
    }

    #[test]
    fn test_unsorted_input_is_sorted_before_processing() {
        let derivation = derive(
            vec![
                exec(Side::Sell, 100, "12", 11, "S1"),
                exec(Side::Buy, 100, "10", 1, "B1"),
            ],
            60,
        );
        assert_eq!(derivation.disposals.len(), 1);
        assert_eq!(derivation.disposals[0].adjusted_gain_loss, d("200"));
    }

    #[test]
    fn test_duplicate_executions_skipped() {
        let derivation = derive(
            vec![
                exec(Side::Buy, 100, "10", 1, "B1"),
                exec(Side::Buy, 100, "10", 1, "B1"),
                exec(Side::Sell, 40, "11", 20, "S1"),
            ],
            60,
        );
        assert_eq!(derivation.lots.len(), 1);
        assert_eq!(derivation.lots[0].remaining_quantity, 60);
    }

    #[test]
    fn test_oversell_fails_partition() {
        let err = SymbolCompiler::derive(
            AccountId::new("acct-1".to_string()),
            Symbol::new("AAPL".to_string()),
            vec![
                exec(Side::Buy, 50, "10", 1, "B1"),
                exec(Side::Sell, 60, "11", 2, "S1"),
            ],
            &options(60),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientLots { .. }));
    }

    #[test]
    fn test_recent_loss_is_pending() {
        let derivation = derive(
            vec![
                exec(Side::Buy, 100, "10", 1, "B1"),
                exec(Side::Sell, 100, "8", 40, "S1"),
            ],
            45, // only 5 days past the loss
        );
        assert_eq!(derivation.disposals[0].wash_status, WashStatus::Pending);
        assert_eq!(derivation.pending_disposal_ids().len(), 1);
    }

    #[test]
    fn test_term_classification_through_derivation() {
        let mut long_sell = exec(Side::Sell, 50, "11", 1, "S1");
        long_sell.stamp = TradeStamp::new(day(1) + Duration::days(366), 0);
        let mut short_sell = exec(Side::Sell, 50, "11", 1, "S2");
        short_sell.stamp = TradeStamp::new(day(1) + Duration::days(365), 0);

        let derivation = derive(
            vec![exec(Side::Buy, 100, "10", 1, "B1"), short_sell, long_sell],
            800,
        );
        assert_eq!(derivation.disposals[0].term, Term::Short);
        assert_eq!(derivation.disposals[1].term, Term::Long);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let executions = vec![
            exec(Side::Buy, 100, "10", 1, "B1"),
            exec(Side::Buy, 50, "12", 3, "B2"),
            exec(Side::Sell, 120, "9", 11, "S1"),
            exec(Side::Buy, 80, "9.5", 20, "B3"),
        ];
        let a = derive(executions.clone(), 60);
        let b = derive(executions, 60);
        assert_eq!(a, b);
    }
}
