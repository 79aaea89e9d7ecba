//! Domain types and determinism layer for the tax-lot reconciliation engine.
//!
//! This module provides:
//! - Lossless monetary amounts via a Decimal wrapper
//! - Domain primitives: AccountId, Symbol, Side, TradeStamp
//! - TradeExecution with a stable, content-derived execution key
//! - TaxLot, RealizedDisposal, and WashSaleLink records
//! - Stable execution ordering for deterministic processing

pub mod decimal;
pub mod disposal;
pub mod execution;
pub mod lot;
pub mod method;
pub mod ordering;
pub mod primitives;

pub use decimal::Decimal;
pub use disposal::{RealizedDisposal, Term, WashSaleLink, WashStatus};
pub use execution::{LotRequest, TradeExecution};
pub use lot::TaxLot;
pub use method::AccountingMethod;
pub use ordering::ExecutionOrderingKey;
pub use primitives::{AccountId, Side, Symbol, TradeStamp};
