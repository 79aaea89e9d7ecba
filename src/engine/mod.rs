//! Pure computation engines for deterministic reconciliation logic.
//!
//! Nothing in this module touches the database or the clock: each engine is
//! a function of the execution stream it is given, so re-running over an
//! unchanged log reproduces identical output.

use crate::domain::{AccountId, Decimal, Symbol};
use chrono::NaiveDate;

pub mod gain_loss;
pub mod ledger;
pub mod selector;
pub mod wash;

pub use gain_loss::GainLossCalculator;
pub use ledger::LotLedger;
pub use selector::{select, Consumption};
pub use wash::WashSaleEngine;

/// One lot slice consumed by a sell, before wash-sale disallowance and term
/// classification.
///
/// `cost_basis` is the basis drawn from the lot's pool, so it already
/// reflects wash adjustments the lot received from earlier losses;
/// `raw_gain_loss` is "raw" only with respect to this disposal's own
/// disallowance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDisposal {
    pub disposal_id: String,
    pub lot_id: String,
    pub account: AccountId,
    pub symbol: Symbol,
    pub acquisition_date: NaiveDate,
    pub close_date: NaiveDate,
    pub close_seq: i64,
    pub quantity: i64,
    pub proceeds: Decimal,
    pub cost_basis: Decimal,
    pub raw_gain_loss: Decimal,
}
