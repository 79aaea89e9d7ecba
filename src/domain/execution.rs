//! TradeExecution: a single immutable buy/sell execution.

use crate::domain::{AccountId, Decimal, Side, Symbol, TradeStamp};
use serde::{Deserialize, Serialize};

/// A specific-identification request attached to a sell: consume `quantity`
/// shares from the named lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRequest {
    pub lot_id: String,
    pub quantity: i64,
}

/// A single trade execution as supplied by the ingestion collaborator.
///
/// Immutable once created; deduplicated by `execution_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeExecution {
    /// Stable unique identifier for this execution.
    pub execution_key: String,
    /// Owning account.
    pub account: AccountId,
    /// Security symbol.
    pub symbol: Symbol,
    /// Event-log position: trade date plus same-day sequence number.
    pub stamp: TradeStamp,
    /// Buy or Sell.
    pub side: Side,
    /// Share count. Always positive; the side carries the sign.
    pub quantity: i64,
    /// Execution price per share.
    pub price: Decimal,
    /// Commission paid on the whole execution.
    pub commission: Decimal,
    /// Specific-identification plan for this sell, if the caller supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_lots: Option<Vec<LotRequest>>,
}

impl TradeExecution {
    /// Create a new TradeExecution.
    ///
    /// `source_id` is the upstream execution id when the ingestion
    /// collaborator supplies one; otherwise a content hash is used.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: AccountId,
        symbol: Symbol,
        stamp: TradeStamp,
        side: Side,
        quantity: i64,
        price: Decimal,
        commission: Decimal,
        source_id: Option<&str>,
    ) -> Self {
        let execution_key = Self::compute_execution_key(
            &account, &symbol, stamp, side, quantity, &price, &commission, source_id,
        );
        TradeExecution {
            execution_key,
            account,
            symbol,
            stamp,
            side,
            quantity,
            price,
            commission,
            specific_lots: None,
        }
    }

    /// Attach a specific-identification plan to this sell.
    pub fn with_specific_lots(mut self, lots: Vec<LotRequest>) -> Self {
        self.specific_lots = Some(lots);
        self
    }

    /// Generate a stable unique key for this execution.
    ///
    /// Priority: upstream `source_id` (if present) > hash of deterministic
    /// fields.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_execution_key(
        account: &AccountId,
        symbol: &Symbol,
        stamp: TradeStamp,
        side: Side,
        quantity: i64,
        price: &Decimal,
        commission: &Decimal,
        source_id: Option<&str>,
    ) -> String {
        if let Some(id) = source_id {
            return format!("ext:{}", id);
        }

        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(account.as_str());
        hasher.update(symbol.as_str());
        hasher.update(stamp.date.to_string());
        hasher.update(stamp.seq.to_le_bytes());
        hasher.update(if side == Side::Buy { b"B" } else { b"S" });
        hasher.update(quantity.to_le_bytes());
        hasher.update(price.to_canonical_string());
        hasher.update(commission.to_canonical_string());
        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }

    /// Borrow the precomputed execution key.
    pub fn execution_key(&self) -> &str {
        &self.execution_key
    }

    /// Signed share count: +quantity for buys, -quantity for sells.
    pub fn signed_quantity(&self) -> i64 {
        self.side.sign() * self.quantity
    }
}
