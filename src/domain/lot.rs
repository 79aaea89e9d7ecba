//! TaxLot: a tracked batch of shares acquired together.

use crate::domain::{AccountId, Decimal, Symbol};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A batch of shares acquired by one buy execution, with its own cost basis
/// and acquisition date.
///
/// Created by `LotLedger::apply_buy`; `remaining_quantity` is decremented in
/// place as sells consume it, and the lot is retired from the open set (but
/// kept in the archive) when it reaches zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxLot {
    /// Stable lot identifier, derived from the creating buy's execution key.
    pub lot_id: String,
    pub account: AccountId,
    pub symbol: Symbol,
    pub acquisition_date: NaiveDate,
    /// Same-day creation sequence, the tie-break for FIFO/LIFO and
    /// replacement ordering.
    pub acquisition_seq: i64,
    pub original_quantity: i64,
    pub remaining_quantity: i64,
    /// Per-share basis at acquisition: (price * quantity + commission) / quantity.
    pub cost_basis_per_unit: Decimal,
    /// Total disallowed loss deferred onto this lot by wash sales.
    pub wash_sale_adjustment_total: Decimal,
}

impl TaxLot {
    /// Derive the lot id for the buy execution that creates it.
    pub fn lot_id_for(execution_key: &str) -> String {
        format!("lot:{}", execution_key)
    }

    /// True while any shares remain open.
    pub fn is_open(&self) -> bool {
        self.remaining_quantity > 0
    }

    /// Total basis paid at acquisition, before wash-sale adjustments.
    pub fn original_cost_basis(&self) -> Decimal {
        self.cost_basis_per_unit * Decimal::from(self.original_quantity)
    }

    /// Shares already consumed by disposals.
    pub fn disposed_quantity(&self) -> i64 {
        self.original_quantity - self.remaining_quantity
    }
}
