//! LotLedger: ordered lot bookkeeping for one (account, symbol) partition.

use crate::domain::{
    AccountId, AccountingMethod, Decimal, ExecutionOrderingKey, RealizedDisposal, Side, Symbol,
    TaxLot, TradeExecution,
};
use crate::engine::{selector, RawDisposal};
use crate::error::LedgerError;
use std::collections::HashMap;

/// A lot plus its basis pool.
///
/// The pool is the basis the lot's remaining shares will yield when
/// consumed: remaining basis at acquisition prices plus wash-sale
/// disallowances received and not yet drawn. Consuming q of r remaining
/// shares draws pool * q / r, the final draw taking the whole pool, so the
/// basis consumed over a lot's life equals its original cost basis plus all
/// disallowances it received.
#[derive(Debug, Clone)]
struct LotState {
    lot: TaxLot,
    basis_pool: Decimal,
}

/// Per (account, symbol) ordered collection of tax lots.
///
/// Applies executions strictly in ordering-key order: buys create lots,
/// sells consume them via the accounting-method selector and emit raw
/// disposal slices. Retired lots stay in the collection for audit and for
/// wash-sale capacity checks; nothing is ever deleted.
pub struct LotLedger {
    account: AccountId,
    symbol: Symbol,
    /// All lots in creation order, open and retired.
    lots: Vec<LotState>,
    lot_index: HashMap<String, usize>,
    /// Disallowances pledged to buys that have not been applied yet.
    queued_adjustments: HashMap<String, Decimal>,
    last_key: Option<ExecutionOrderingKey>,
    net_position: i64,
}

impl LotLedger {
    pub fn new(account: AccountId, symbol: Symbol) -> Self {
        Self {
            account,
            symbol,
            lots: Vec::new(),
            lot_index: HashMap::new(),
            queued_adjustments: HashMap::new(),
            last_key: None,
            net_position: 0,
        }
    }

    /// Apply a buy, creating exactly one new lot.
    ///
    /// # Errors
    /// `DuplicateExecution` if the execution key was already applied;
    /// `CorruptedLedgerState` on partition mismatch, out-of-order stamps, or
    /// malformed amounts.
    pub fn apply_buy(&mut self, execution: &TradeExecution) -> Result<TaxLot, LedgerError> {
        self.admit(execution, Side::Buy)?;

        let lot_id = TaxLot::lot_id_for(execution.execution_key());
        if self.lot_index.contains_key(&lot_id) {
            return Err(LedgerError::DuplicateExecution(
                execution.execution_key().to_string(),
            ));
        }

        let quantity = Decimal::from(execution.quantity);
        let original_basis = execution.price * quantity + execution.commission;
        let mut lot = TaxLot {
            lot_id: lot_id.clone(),
            account: self.account.clone(),
            symbol: self.symbol.clone(),
            acquisition_date: execution.stamp.date,
            acquisition_seq: execution.stamp.seq,
            original_quantity: execution.quantity,
            remaining_quantity: execution.quantity,
            cost_basis_per_unit: original_basis / quantity,
            wash_sale_adjustment_total: Decimal::zero(),
        };

        // A wash-sale loss scanned earlier may already have pledged a
        // deferral onto this lot before it existed.
        let mut basis_pool = original_basis;
        if let Some(adjustment) = self.queued_adjustments.remove(&lot_id) {
            lot.wash_sale_adjustment_total += adjustment;
            basis_pool += adjustment;
        }

        self.net_position += execution.quantity;
        self.lot_index.insert(lot_id, self.lots.len());
        self.lots.push(LotState {
            lot: lot.clone(),
            basis_pool,
        });
        Ok(lot)
    }

    /// Apply a sell, consuming lots per the selector's plan and emitting one
    /// raw disposal per consumed slice.
    ///
    /// # Errors
    /// `InsufficientLots` on oversell, `AmbiguousSpecificId` on a bad
    /// specific-ID plan, plus the same admission errors as `apply_buy`.
    pub fn apply_sell(
        &mut self,
        execution: &TradeExecution,
        method: AccountingMethod,
    ) -> Result<Vec<RawDisposal>, LedgerError> {
        self.admit(execution, Side::Sell)?;

        let open: Vec<&TaxLot> = self
            .lots
            .iter()
            .filter(|s| s.lot.is_open())
            .map(|s| &s.lot)
            .collect();
        let plan = selector::select(
            &open,
            execution.quantity,
            method,
            execution.specific_lots.as_deref(),
        )?;

        let total = Decimal::from(execution.quantity);
        let mut commission_allocated = Decimal::zero();
        let mut disposals = Vec::with_capacity(plan.len());

        for (index, consumption) in plan.iter().enumerate() {
            let state_index = *self.lot_index.get(&consumption.lot_id).ok_or_else(|| {
                self.corrupted(format!("plan references unknown lot {}", consumption.lot_id))
            })?;
            let remaining = self.lots[state_index].lot.remaining_quantity;
            if consumption.quantity > remaining {
                return Err(self.corrupted(format!(
                    "plan overdraws lot {}: {} > {}",
                    consumption.lot_id, consumption.quantity, remaining
                )));
            }

            let state = &mut self.lots[state_index];
            let quantity = Decimal::from(consumption.quantity);
            let cost_basis = if consumption.quantity == state.lot.remaining_quantity {
                state.basis_pool
            } else {
                state.basis_pool * quantity / Decimal::from(state.lot.remaining_quantity)
            };
            state.basis_pool -= cost_basis;
            state.lot.remaining_quantity -= consumption.quantity;

            let commission_share = if index + 1 == plan.len() {
                execution.commission - commission_allocated
            } else {
                execution.commission * quantity / total
            };
            commission_allocated += commission_share;

            let proceeds = execution.price * quantity - commission_share;
            let raw_gain_loss = proceeds - cost_basis;

            disposals.push(RawDisposal {
                disposal_id: RealizedDisposal::compute_disposal_id(
                    execution.execution_key(),
                    &consumption.lot_id,
                    index,
                ),
                lot_id: consumption.lot_id.clone(),
                account: self.account.clone(),
                symbol: self.symbol.clone(),
                acquisition_date: self.lots[state_index].lot.acquisition_date,
                close_date: execution.stamp.date,
                close_seq: execution.stamp.seq,
                quantity: consumption.quantity,
                proceeds,
                cost_basis,
                raw_gain_loss,
            });
        }

        self.net_position -= execution.quantity;
        Ok(disposals)
    }

    /// Defer a disallowed loss onto a replacement lot, raising its basis.
    ///
    /// The lot may not exist yet (replacement purchased after the loss); the
    /// adjustment is then queued and applied when the buy arrives.
    pub fn apply_wash_adjustment(&mut self, lot_id: &str, amount: Decimal) {
        if !amount.is_positive() {
            return;
        }
        match self.lot_index.get(lot_id) {
            Some(&index) => {
                let state = &mut self.lots[index];
                state.lot.wash_sale_adjustment_total += amount;
                state.basis_pool += amount;
            }
            None => {
                *self
                    .queued_adjustments
                    .entry(lot_id.to_string())
                    .or_insert_with(Decimal::zero) += amount;
            }
        }
    }

    /// Look up a lot, open or retired.
    pub fn lot(&self, lot_id: &str) -> Option<&TaxLot> {
        self.lot_index.get(lot_id).map(|&i| &self.lots[i].lot)
    }

    /// Signed net position from the executions applied so far.
    pub fn net_position(&self) -> i64 {
        self.net_position
    }

    /// Verify the partition invariants at a quiescent point.
    ///
    /// # Errors
    /// `CorruptedLedgerState` if open quantity disagrees with the net
    /// position, any quantity or pool went negative, or a pledged adjustment
    /// never found its lot.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        let open_total: i64 = self
            .lots
            .iter()
            .filter(|s| s.lot.is_open())
            .map(|s| s.lot.remaining_quantity)
            .sum();
        if open_total != self.net_position {
            return Err(self.corrupted(format!(
                "open quantity {} != net position {}",
                open_total, self.net_position
            )));
        }
        for state in &self.lots {
            if state.lot.remaining_quantity < 0 {
                return Err(self.corrupted(format!(
                    "lot {} has negative remaining quantity",
                    state.lot.lot_id
                )));
            }
            if state.basis_pool.is_negative() {
                return Err(self.corrupted(format!(
                    "lot {} has negative basis pool",
                    state.lot.lot_id
                )));
            }
        }
        if let Some(lot_id) = self.queued_adjustments.keys().next() {
            return Err(self.corrupted(format!(
                "wash adjustment pledged to nonexistent lot {}",
                lot_id
            )));
        }
        Ok(())
    }

    /// All lots in creation order, open and retired.
    pub fn into_lots(self) -> Vec<TaxLot> {
        self.lots.into_iter().map(|s| s.lot).collect()
    }

    fn admit(&mut self, execution: &TradeExecution, side: Side) -> Result<(), LedgerError> {
        if execution.account != self.account || execution.symbol != self.symbol {
            return Err(self.corrupted(format!(
                "execution {} belongs to {}/{}",
                execution.execution_key(),
                execution.account,
                execution.symbol
            )));
        }
        if execution.side != side {
            return Err(self.corrupted(format!(
                "execution {} routed to the wrong side",
                execution.execution_key()
            )));
        }
        if execution.quantity <= 0 {
            return Err(self.corrupted(format!(
                "execution {} has non-positive quantity {}",
                execution.execution_key(),
                execution.quantity
            )));
        }
        if execution.price.is_negative() || execution.commission.is_negative() {
            return Err(self.corrupted(format!(
                "execution {} has negative price or commission",
                execution.execution_key()
            )));
        }

        let key = ExecutionOrderingKey::from_execution(execution);
        if let Some(last) = &self.last_key {
            if key <= *last {
                return Err(self.corrupted(format!(
                    "execution {} arrived out of order (after {})",
                    execution.execution_key(),
                    last.execution_key
                )));
            }
        }
        self.last_key = Some(key);
        Ok(())
    }

    fn corrupted(&self, detail: String) -> LedgerError {
        LedgerError::CorruptedLedgerState {
            symbol: format!("{}/{}", self.account, self.symbol),
            detail,
        }
    }
}
