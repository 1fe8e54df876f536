use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Uniform GST applied to every quotation and invoice.
pub fn gst_rate() -> Decimal {
    Decimal::new(18, 2)
}

/// Half-up rounding to two decimal places. Every stored money value passes
/// through this; nothing in a money path touches floating point.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn line_total(quantity: u32, unit_price: Decimal) -> Decimal {
    round2(Decimal::from(quantity) * unit_price)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationTotals {
    pub total_items_amount: Decimal,
    pub gst_amount: Decimal,
    pub total_amount: Decimal,
}

/// Recomputes the quotation aggregate from surviving line totals.
/// Invariants: `gst_amount == round2(items * 0.18)` and
/// `total_amount == round2(items + gst)`.
pub fn quotation_totals<I>(line_totals: I) -> QuotationTotals
where
    I: IntoIterator<Item = Decimal>,
{
    let total_items_amount = round2(line_totals.into_iter().sum());
    let gst_amount = round2(total_items_amount * gst_rate());
    let total_amount = round2(total_items_amount + gst_amount);

    QuotationTotals { total_items_amount, gst_amount, total_amount }
}

/// `total - discounted - paid`, clamped at zero. The clamp is unreachable
/// while the overpayment guard holds; it keeps the invariant explicit.
pub fn balance_due(total_amount: Decimal, discounted_amount: Decimal, total_paid: Decimal) -> Decimal {
    round2(total_amount - discounted_amount - total_paid).max(Decimal::ZERO)
}

/// Whole tokens earned on a fully paid invoice: one batch per full 1000 of
/// invoice total, multiplied by the configured rate.
pub fn loyalty_tokens(total_amount: Decimal, rate_per_thousand: u32) -> i64 {
    let batches = (total_amount / Decimal::ONE_THOUSAND).floor().to_i64().unwrap_or(0);
    batches * i64::from(rate_per_thousand)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{balance_due, line_total, loyalty_tokens, quotation_totals, round2};

    #[test]
    fn rounds_midpoints_away_from_zero() {
        assert_eq!(round2(Decimal::new(125, 3)), Decimal::new(13, 2));
        assert_eq!(round2(Decimal::new(2675, 3)), Decimal::new(268, 2));
        assert_eq!(round2(Decimal::new(-125, 3)), Decimal::new(-13, 2));
    }

    #[test]
    fn computes_gst_and_grand_total() {
        let totals = quotation_totals(vec![
            line_total(2, Decimal::new(50000, 2)),
            line_total(1, Decimal::new(100000, 2)),
        ]);

        assert_eq!(totals.total_items_amount, Decimal::new(200000, 2));
        assert_eq!(totals.gst_amount, Decimal::new(36000, 2));
        assert_eq!(totals.total_amount, Decimal::new(236000, 2));
    }

    #[test]
    fn gst_rounds_per_aggregate_not_per_line() {
        let totals = quotation_totals(vec![Decimal::new(10010, 2)]);

        // 100.10 * 0.18 = 18.018 -> 18.02
        assert_eq!(totals.gst_amount, Decimal::new(1802, 2));
        assert_eq!(totals.total_amount, Decimal::new(11812, 2));
    }

    #[test]
    fn empty_quotation_totals_are_zero() {
        let totals = quotation_totals(Vec::new());

        assert_eq!(totals.total_items_amount, Decimal::ZERO);
        assert_eq!(totals.gst_amount, Decimal::ZERO);
        assert_eq!(totals.total_amount, Decimal::ZERO);
    }

    #[test]
    fn balance_never_goes_negative() {
        let balance =
            balance_due(Decimal::new(100000, 2), Decimal::new(60000, 2), Decimal::new(50000, 2));
        assert_eq!(balance, Decimal::ZERO);
    }

    #[test]
    fn balance_subtracts_discount_and_payments() {
        let balance =
            balance_due(Decimal::new(236000, 2), Decimal::new(36000, 2), Decimal::new(50000, 2));
        assert_eq!(balance, Decimal::new(150000, 2));
    }

    #[test]
    fn loyalty_tokens_floor_per_thousand() {
        assert_eq!(loyalty_tokens(Decimal::new(236000, 2), 1), 2);
        assert_eq!(loyalty_tokens(Decimal::new(236000, 2), 3), 6);
        assert_eq!(loyalty_tokens(Decimal::new(99999, 2), 1), 0);
        assert_eq!(loyalty_tokens(Decimal::ZERO, 5), 0);
    }
}
