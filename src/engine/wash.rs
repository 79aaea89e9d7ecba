//! WashSaleEngine: defers losses onto replacement purchases inside the
//! 61-day window.
//!
//! The scan runs inside the chronological derivation sweep: every loss is
//! examined at its own close stamp, with past buys visible through the
//! ledger and future buys visible through the execution schedule. Pledges
//! accumulate across losses so each replacement share absorbs at most one
//! disallowance.

use crate::domain::{Decimal, Side, TaxLot, TradeExecution, WashSaleLink};
use crate::engine::{LotLedger, RawDisposal};
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

/// A buy execution seen as a potential replacement purchase.
#[derive(Debug, Clone)]
struct BuyRef {
    lot_id: String,
    acquisition_date: NaiveDate,
    quantity: i64,
}

/// Scans realized losses against nearby replacement purchases for one
/// (account, symbol) partition.
pub struct WashSaleEngine {
    window_days: i64,
    /// All buys for the symbol in stamp order, past and future.
    buys: Vec<BuyRef>,
    /// Shares of each lot already pledged as replacement.
    pledged: HashMap<String, i64>,
    links: Vec<WashSaleLink>,
}

impl WashSaleEngine {
    /// Build the scan state from the symbol's full execution schedule.
    ///
    /// `executions` must be the deterministically sorted stream the ledger
    /// will process; buys are indexed here so that replacements purchased
    /// after a loss are visible when the loss is scanned.
    pub fn new(window_days: i64, executions: &[TradeExecution]) -> Self {
        let buys = executions
            .iter()
            .filter(|e| e.side == Side::Buy)
            .map(|e| BuyRef {
                lot_id: TaxLot::lot_id_for(e.execution_key()),
                acquisition_date: e.stamp.date,
                quantity: e.quantity,
            })
            .collect();
        Self {
            window_days,
            buys,
            pledged: HashMap::new(),
            links: Vec::new(),
        }
    }

    /// True if an acquisition date falls inside the loss's window.
    ///
    /// The window spans `window_days` on both sides of the close date; the
    /// close date itself is excluded.
    pub fn window_contains(&self, close_date: NaiveDate, acquisition_date: NaiveDate) -> bool {
        if acquisition_date == close_date {
            return false;
        }
        let span = Duration::days(self.window_days);
        acquisition_date >= close_date - span && acquisition_date <= close_date + span
    }

    /// Scan one raw disposal at its close stamp.
    ///
    /// Returns the links created for it (also retained internally); the
    /// caller must feed each link's amount back into the ledger via
    /// `apply_wash_adjustment`. Non-losses return no links.
    pub fn scan_loss(&mut self, disposal: &RawDisposal, ledger: &LotLedger) -> Vec<WashSaleLink> {
        if !disposal.raw_gain_loss.is_negative() {
            return Vec::new();
        }

        let loss_abs = disposal.raw_gain_loss.abs();
        let quantity = disposal.quantity;

        // Candidate replacements, earliest acquisition first. `buys` is
        // already in stamp order, so this order doubles as the same-day
        // tie-break by creation sequence.
        let mut capacities: Vec<(String, i64)> = Vec::new();
        let mut total_capacity: i64 = 0;
        for buy in &self.buys {
            if !self.window_contains(disposal.close_date, buy.acquisition_date) {
                continue;
            }
            let pledged = self.pledged.get(&buy.lot_id).copied().unwrap_or(0);
            // Shares disposed at or before the loss stamp cannot absorb a
            // deferral; the ledger's state sits exactly at that stamp. A buy
            // the ledger has not seen yet is entirely in the future, so all
            // of its shares remain eligible.
            let available = match ledger.lot(&buy.lot_id) {
                Some(lot) => lot.remaining_quantity - pledged,
                None => buy.quantity - pledged,
            };
            if available > 0 {
                capacities.push((buy.lot_id.clone(), available));
                total_capacity += available;
            }
        }

        let absorbed = quantity.min(total_capacity);
        if absorbed == 0 {
            return Vec::new();
        }

        let disallowed_total = if absorbed == quantity {
            loss_abs
        } else {
            loss_abs * Decimal::from(absorbed) / Decimal::from(quantity)
        };

        let mut new_links = Vec::new();
        let mut need = absorbed;
        let mut allocated = Decimal::zero();
        for (lot_id, available) in capacities {
            if need == 0 {
                break;
            }
            let take = need.min(available);
            need -= take;
            // Pro-rata by quantity taken; the final absorber takes the exact
            // remainder so the distributed amounts sum to disallowed_total.
            let amount = if need == 0 {
                disallowed_total - allocated
            } else {
                disallowed_total * Decimal::from(take) / Decimal::from(absorbed)
            };
            allocated += amount;
            *self.pledged.entry(lot_id.clone()).or_insert(0) += take;

            new_links.push(WashSaleLink {
                loss_disposal_id: disposal.disposal_id.clone(),
                replacement_lot_id: lot_id,
                quantity_absorbed: take,
                disallowed_amount: amount,
                detected_at: disposal.close_date,
            });
        }

        self.links.extend(new_links.iter().cloned());
        new_links
    }

    /// All links produced so far, in detection order.
    pub fn links(&self) -> &[WashSaleLink] {
        &self.links
    }

    /// Consume the engine, yielding its links.
    pub fn into_links(self) -> Vec<WashSaleLink> {
        self.links
    }
}
