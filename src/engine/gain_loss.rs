//! GainLossCalculator: final taxable amounts and holding-period terms.

use crate::domain::{RealizedDisposal, Term, WashSaleLink, WashStatus};
use crate::engine::RawDisposal;
use chrono::{Duration, NaiveDate};

/// Finalizes raw disposals into externally visible records: wash
/// disallowance applied, SHORT/LONG term classified, and the forward-window
/// pending flag set against the event log's as-of date.
pub struct GainLossCalculator {
    long_term_threshold_days: i64,
    wash_window_days: i64,
    as_of: NaiveDate,
}

impl GainLossCalculator {
    pub fn new(long_term_threshold_days: i64, wash_window_days: i64, as_of: NaiveDate) -> Self {
        Self {
            long_term_threshold_days,
            wash_window_days,
            as_of,
        }
    }

    /// Classify a holding period: held strictly more than the threshold
    /// (365 calendar days) is long-term, so a lot held exactly 365 days is
    /// short-term and 366 is long-term.
    pub fn classify_term(&self, acquisition_date: NaiveDate, close_date: NaiveDate) -> Term {
        let held_days = (close_date - acquisition_date).num_days();
        if held_days > self.long_term_threshold_days {
            Term::Long
        } else {
            Term::Short
        }
    }

    /// Produce the final disposal record.
    ///
    /// `links` is the full link set for the partition; only those referencing
    /// this disposal contribute. Disallowance moves a loss toward zero and
    /// never creates a gain.
    pub fn finalize(&self, raw: &RawDisposal, links: &[WashSaleLink]) -> RealizedDisposal {
        let disallowed_loss: crate::domain::Decimal = links
            .iter()
            .filter(|l| l.loss_disposal_id == raw.disposal_id)
            .map(|l| l.disallowed_amount)
            .sum();

        let adjusted_gain_loss = raw.raw_gain_loss + disallowed_loss;
        let term = self.classify_term(raw.acquisition_date, raw.close_date);

        // Only a loss can be reshaped by a replacement purchase, and only
        // while its forward window still extends past the log's horizon.
        let window_closes = raw.close_date + Duration::days(self.wash_window_days);
        let wash_status = if raw.raw_gain_loss.is_negative() && window_closes > self.as_of {
            WashStatus::Pending
        } else {
            WashStatus::Final
        };

        RealizedDisposal {
            disposal_id: raw.disposal_id.clone(),
            lot_id: raw.lot_id.clone(),
            account: raw.account.clone(),
            symbol: raw.symbol.clone(),
            close_date: raw.close_date,
            close_seq: raw.close_seq,
            quantity: raw.quantity,
            proceeds: raw.proceeds,
            cost_basis: raw.cost_basis,
            raw_gain_loss: raw.raw_gain_loss,
            disallowed_loss,
            adjusted_gain_loss,
            term,
            wash_sale_flag: disallowed_loss.is_positive(),
            wash_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, Decimal, Symbol};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn date(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn raw(acquired: NaiveDate, closed: NaiveDate, gain_loss: &str) -> RawDisposal {
        let proceeds = d("800");
        RawDisposal {
            disposal_id: "dsp:test".to_string(),
            lot_id: "lot:ext:B1".to_string(),
            account: AccountId::new("acct-1".to_string()),
            symbol: Symbol::new("AAPL".to_string()),
            acquisition_date: acquired,
            close_date: closed,
            close_seq: 0,
            quantity: 100,
            proceeds,
            cost_basis: proceeds - d(gain_loss),
            raw_gain_loss: d(gain_loss),
        }
    }

    fn calculator(as_of: NaiveDate) -> GainLossCalculator {
        GainLossCalculator::new(365, 30, as_of)
    }

    #[test]
    fn test_term_boundary_365_short_366_long() {
        let acquired = date(2023, 1, 1);
        let calc = calculator(date(2025, 1, 1));
        // Exactly 365 days is short-term.
        assert_eq!(
            calc.classify_term(acquired, acquired + Duration::days(365)),
            Term::Short
        );
        assert_eq!(
            calc.classify_term(acquired, acquired + Duration::days(366)),
            Term::Long
        );
    }

    #[test]
    fn test_term_uses_calendar_days_across_leap_year() {
        // 2024 is a leap year: Jan 1 2024 -> Jan 1 2025 is 366 days.
        let calc = calculator(date(2026, 1, 1));
        assert_eq!(
            calc.classify_term(date(2024, 1, 1), date(2025, 1, 1)),
            Term::Long
        );
        assert_eq!(
            calc.classify_term(date(2023, 1, 1), date(2024, 1, 1)),
            Term::Short
        );
    }

    #[test]
    fn test_disallowance_moves_loss_to_zero() {
        let calc = calculator(date(2024, 12, 31));
        let raw = raw(date(2024, 1, 1), date(2024, 6, 1), "-200");
        let links = vec![WashSaleLink {
            loss_disposal_id: "dsp:test".to_string(),
            replacement_lot_id: "lot:ext:B2".to_string(),
            quantity_absorbed: 100,
            disallowed_amount: d("200"),
            detected_at: date(2024, 6, 1),
        }];
        let disposal = calc.finalize(&raw, &links);
        assert_eq!(disposal.disallowed_loss, d("200"));
        assert_eq!(disposal.adjusted_gain_loss, Decimal::zero());
        assert!(disposal.wash_sale_flag);
    }

    #[test]
    fn test_partial_disallowance_reduces_loss() {
        let calc = calculator(date(2024, 12, 31));
        let raw = raw(date(2024, 1, 1), date(2024, 6, 1), "-200");
        let links = vec![WashSaleLink {
            loss_disposal_id: "dsp:test".to_string(),
            replacement_lot_id: "lot:ext:B2".to_string(),
            quantity_absorbed: 40,
            disallowed_amount: d("80"),
            detected_at: date(2024, 6, 1),
        }];
        let disposal = calc.finalize(&raw, &links);
        assert_eq!(disposal.adjusted_gain_loss, d("-120"));
        assert!(disposal.wash_sale_flag);
    }

    #[test]
    fn test_links_for_other_disposals_ignored() {
        let calc = calculator(date(2024, 12, 31));
        let raw = raw(date(2024, 1, 1), date(2024, 6, 1), "-200");
        let links = vec![WashSaleLink {
            loss_disposal_id: "dsp:other".to_string(),
            replacement_lot_id: "lot:ext:B2".to_string(),
            quantity_absorbed: 100,
            disallowed_amount: d("200"),
            detected_at: date(2024, 6, 1),
        }];
        let disposal = calc.finalize(&raw, &links);
        assert_eq!(disposal.disallowed_loss, Decimal::zero());
        assert!(!disposal.wash_sale_flag);
        assert_eq!(disposal.adjusted_gain_loss, d("-200"));
    }

    #[test]
    fn test_loss_pending_until_forward_window_elapses() {
        let close = date(2024, 6, 1);
        let raw = raw(date(2024, 1, 1), close, "-200");

        // as_of one day short of close + 30: still pending.
        let early = calculator(close + Duration::days(29));
        assert_eq!(early.finalize(&raw, &[]).wash_status, WashStatus::Pending);

        // as_of at close + 30: every possible replacement is visible.
        let late = calculator(close + Duration::days(30));
        assert_eq!(late.finalize(&raw, &[]).wash_status, WashStatus::Final);
    }

    #[test]
    fn test_gain_is_final_immediately() {
        let close = date(2024, 6, 1);
        let raw = raw(date(2024, 1, 1), close, "150");
        let calc = calculator(close);
        let disposal = calc.finalize(&raw, &[]);
        assert_eq!(disposal.wash_status, WashStatus::Final);
        assert_eq!(disposal.adjusted_gain_loss, d("150"));
        assert!(!disposal.wash_sale_flag);
    }
}
