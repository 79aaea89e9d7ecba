//! Accounting-method selector: plans which open lots a sell consumes.
//!
//! Pure strategy. The selector never mutates lots; it only proposes an
//! ordered consumption plan that `LotLedger` then applies.

use crate::domain::{AccountingMethod, LotRequest, TaxLot};
use crate::error::LedgerError;
use std::collections::HashMap;

/// One step of a consumption plan: take `quantity` shares from `lot_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    pub lot_id: String,
    pub quantity: i64,
}

/// Plan the consumption of `requested` shares from the open lots.
///
/// FIFO consumes ascending (acquisition_date, creation seq); LIFO descending
/// with the tie-break reversed; specific-ID follows the caller's plan after
/// validating it against the open lots.
///
/// # Errors
/// `InsufficientLots` if the open quantity cannot cover the request;
/// `AmbiguousSpecificId` if a specific-ID plan is missing, does not sum to
/// the requested quantity, or overdraws a lot.
pub fn select(
    open_lots: &[&TaxLot],
    requested: i64,
    method: AccountingMethod,
    explicit: Option<&[LotRequest]>,
) -> Result<Vec<Consumption>, LedgerError> {
    let available: i64 = open_lots.iter().map(|l| l.remaining_quantity).sum();
    if available < requested {
        return Err(LedgerError::InsufficientLots {
            requested,
            available,
        });
    }

    match method {
        AccountingMethod::Fifo | AccountingMethod::Lifo => {
            let mut ordered: Vec<&TaxLot> = open_lots.to_vec();
            ordered.sort_by(|a, b| {
                let key_a = (a.acquisition_date, a.acquisition_seq, &a.lot_id);
                let key_b = (b.acquisition_date, b.acquisition_seq, &b.lot_id);
                if method == AccountingMethod::Fifo {
                    key_a.cmp(&key_b)
                } else {
                    key_b.cmp(&key_a)
                }
            });

            let mut plan = Vec::new();
            let mut remaining = requested;
            for lot in ordered {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(lot.remaining_quantity);
                plan.push(Consumption {
                    lot_id: lot.lot_id.clone(),
                    quantity: take,
                });
                remaining -= take;
            }
            Ok(plan)
        }
        AccountingMethod::SpecificId => {
            let requests = explicit.ok_or_else(|| {
                LedgerError::AmbiguousSpecificId(
                    "specific-identification sell carries no lot plan".to_string(),
                )
            })?;

            let total: i64 = requests.iter().map(|r| r.quantity).sum();
            if total != requested {
                return Err(LedgerError::AmbiguousSpecificId(format!(
                    "plan covers {} shares but the sell is for {}",
                    total, requested
                )));
            }

            let by_id: HashMap<&str, &TaxLot> = open_lots
                .iter()
                .map(|l| (l.lot_id.as_str(), *l))
                .collect();

            // A lot may appear in several plan entries; validate combined draw.
            let mut drawn: HashMap<&str, i64> = HashMap::new();
            let mut plan = Vec::with_capacity(requests.len());
            for request in requests {
                if request.quantity <= 0 {
                    return Err(LedgerError::AmbiguousSpecificId(format!(
                        "non-positive quantity {} for lot {}",
                        request.quantity, request.lot_id
                    )));
                }
                let lot = by_id.get(request.lot_id.as_str()).ok_or_else(|| {
                    LedgerError::AmbiguousSpecificId(format!(
                        "lot {} is unknown or already retired",
                        request.lot_id
                    ))
                })?;
                let already = drawn.entry(lot.lot_id.as_str()).or_insert(0);
                *already += request.quantity;
                if *already > lot.remaining_quantity {
                    return Err(LedgerError::AmbiguousSpecificId(format!(
                        "lot {} has {} shares remaining, plan requests {}",
                        request.lot_id, lot.remaining_quantity, already
                    )));
                }
                plan.push(Consumption {
                    lot_id: request.lot_id.clone(),
                    quantity: request.quantity,
                });
            }
            Ok(plan)
        }
    }
}
