//! RealizedDisposal and WashSaleLink: the externally visible results of
//! closing lot quantity.

use crate::domain::{AccountId, Decimal, Symbol};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Holding-period classification of a disposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    Short,
    Long,
}

impl Term {
    /// Parse from the lowercase database representation.
    pub fn parse(s: &str) -> Option<Term> {
        match s {
            "short" => Some(Term::Short),
            "long" => Some(Term::Long),
            _ => None,
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Short => write!(f, "short"),
            Term::Long => write!(f, "long"),
        }
    }
}

/// Whether the wash-sale result of a disposal can still change.
///
/// `Pending` while the 30-day forward window extends past the event log's
/// as-of date; such disposals are re-derived on later runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WashStatus {
    Final,
    Pending,
}

impl WashStatus {
    /// Parse from the lowercase database representation.
    pub fn parse(s: &str) -> Option<WashStatus> {
        match s {
            "final" => Some(WashStatus::Final),
            "pending" => Some(WashStatus::Pending),
            _ => None,
        }
    }
}

impl std::fmt::Display for WashStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WashStatus::Final => write!(f, "final"),
            WashStatus::Pending => write!(f, "pending"),
        }
    }
}

/// The record of closing some quantity of a tax lot, carrying its final
/// taxable gain or loss.
///
/// Created once per lot slice consumed by a sell. Amounts are amended only
/// by re-derivation under a new run version, never by in-place mutation of a
/// published row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizedDisposal {
    /// Stable disposal identifier, hashed from (sell key, lot id, slice index).
    pub disposal_id: String,
    /// The lot this slice consumed.
    pub lot_id: String,
    pub account: AccountId,
    pub symbol: Symbol,
    pub close_date: NaiveDate,
    /// Same-day sequence of the closing sell, for deterministic ordering.
    pub close_seq: i64,
    pub quantity: i64,
    /// Sale proceeds net of this slice's commission share.
    pub proceeds: Decimal,
    /// Basis drawn from the lot, including wash adjustments it had received.
    pub cost_basis: Decimal,
    /// proceeds - cost_basis, before this disposal's own wash disallowance.
    pub raw_gain_loss: Decimal,
    /// Loss deferred onto replacement lots. Zero unless raw_gain_loss < 0.
    pub disallowed_loss: Decimal,
    /// raw_gain_loss + disallowed_loss. Never turns a loss into a gain.
    pub adjusted_gain_loss: Decimal,
    pub term: Term,
    pub wash_sale_flag: bool,
    pub wash_status: WashStatus,
}

impl RealizedDisposal {
    /// Generate the stable disposal id for one slice of a sell.
    ///
    /// Hash of (sell execution key, lot id, slice index) so reruns over an
    /// unchanged log reproduce identical ids.
    pub fn compute_disposal_id(sell_key: &str, lot_id: &str, slice_index: usize) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(sell_key);
        hasher.update(b"|");
        hasher.update(lot_id);
        hasher.update(b"|");
        hasher.update((slice_index as u64).to_le_bytes());
        let hash = hasher.finalize();
        format!("dsp:{}", hex::encode(&hash[..16]))
    }
}

/// One (loss disposal, replacement lot) pairing produced by the wash-sale
/// scan, with the disallowed amount the replacement absorbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WashSaleLink {
    pub loss_disposal_id: String,
    pub replacement_lot_id: String,
    /// Shares of the replacement lot pledged against this loss.
    pub quantity_absorbed: i64,
    pub disallowed_amount: Decimal,
    /// The loss's close date; the adjustment takes effect here.
    pub detected_at: NaiveDate,
}
