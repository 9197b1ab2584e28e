// 2.0: margin and liquidation math. pure functions, no state, no I/O.
// callers supply validated positive inputs; nothing here returns an error.
//
// pnl convention: notional-relative. a long earns (mark - entry) * size / entry,
// so a position sized 5000 at entry 100 gains 50 per 1-point move.

use crate::types::{Leverage, Price, Quote, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// floor for degenerate liquidation prices (1x long would otherwise hit zero)
const MIN_LIQ_PRICE: Decimal = dec!(0.0001);

// 2.1: paper gains/losses at the given mark price.
pub fn unrealized_pnl(side: Side, entry_price: Price, size: Quote, mark_price: Price) -> Quote {
    let move_fraction = (mark_price.value() - entry_price.value()) / entry_price.value();
    Quote::new(side.sign() * move_fraction * size.value())
}

// percent is pnl relative to posted margin, expressed as e.g. 50 for +50%.
pub fn pnl_percent(pnl: Quote, margin: Quote) -> Decimal {
    if margin.value().is_zero() {
        return Decimal::ZERO;
    }
    pnl.value() / margin.value() * dec!(100)
}

// 2.2: the price at which margin loss equals maintenance_ratio * margin.
// long: entry * (1 - r/L). short: entry * (1 + r/L). with r = 1 this is the
// full-margin-consumed floor: 5x long from 100 liquidates at 80.
pub fn liquidation_price(
    entry_price: Price,
    leverage: Leverage,
    side: Side,
    maintenance_ratio: Decimal,
) -> Price {
    let offset = maintenance_ratio / leverage.as_decimal();
    let liq = match side {
        Side::Long => entry_price.value() * (Decimal::ONE - offset),
        Side::Short => entry_price.value() * (Decimal::ONE + offset),
    };
    Price::new_unchecked(liq.max(MIN_LIQ_PRICE))
}

// 2.3: liquidation predicate. crossing the threshold counts.
pub fn is_liquidated(side: Side, mark_price: Price, liq_price: Price) -> bool {
    match side {
        Side::Long => mark_price.value() <= liq_price.value(),
        Side::Short => mark_price.value() >= liq_price.value(),
    }
}

// realized loss on a forced close never exceeds posted margin.
pub fn floor_realized_loss(pnl: Quote, margin: Quote) -> Quote {
    pnl.max(Quote::new(-margin.value()))
}

// what the trader gets back: margin plus realized pnl, floored at zero.
pub fn final_settlement(margin: Quote, realized_pnl: Quote) -> Quote {
    Quote::new((margin.value() + realized_pnl.value()).max(Decimal::ZERO))
}

// 2.4: operator-facing health flag. AtRisk = mark within the last 20% of the
// distance between entry and liquidation price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginHealth {
    Healthy,
    AtRisk,
    Liquidatable,
}

pub fn margin_health(side: Side, entry_price: Price, mark_price: Price, liq_price: Price) -> MarginHealth {
    if is_liquidated(side, mark_price, liq_price) {
        return MarginHealth::Liquidatable;
    }

    let total = (entry_price.value() - liq_price.value()).abs();
    if total.is_zero() {
        return MarginHealth::AtRisk;
    }
    let remaining = (mark_price.value() - liq_price.value()).abs();

    if remaining / total <= dec!(0.2) {
        MarginHealth::AtRisk
    } else {
        MarginHealth::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    #[test]
    fn pnl_long_profit() {
        // entry 100, size 5000, mark 110 → (110-100)*5000/100 = 500
        let pnl = unrealized_pnl(Side::Long, p(dec!(100)), Quote::new(dec!(5000)), p(dec!(110)));
        assert_eq!(pnl.value(), dec!(500));
    }

    #[test]
    fn pnl_short_mirrors_long() {
        let long = unrealized_pnl(Side::Long, p(dec!(100)), Quote::new(dec!(5000)), p(dec!(90)));
        let short = unrealized_pnl(Side::Short, p(dec!(100)), Quote::new(dec!(5000)), p(dec!(90)));
        assert_eq!(long.value(), dec!(-500));
        assert_eq!(short.value(), dec!(500));
    }

    #[test]
    fn pnl_percent_relative_to_margin() {
        let pct = pnl_percent(Quote::new(dec!(500)), Quote::new(dec!(1000)));
        assert_eq!(pct, dec!(50));
        assert_eq!(pnl_percent(Quote::new(dec!(500)), Quote::zero()), Decimal::ZERO);
    }

    #[test]
    fn liquidation_price_worked_example() {
        // 5x long from 100 → 100 * (1 - 1/5) = 80
        let liq = liquidation_price(p(dec!(100)), Leverage::new(5).unwrap(), Side::Long, dec!(1));
        assert_eq!(liq.value(), dec!(80));

        let liq_short = liquidation_price(p(dec!(100)), Leverage::new(5).unwrap(), Side::Short, dec!(1));
        assert_eq!(liq_short.value(), dec!(120));
    }

    #[test]
    fn liquidation_price_one_x_long_clamped() {
        // 1x long would liquidate at exactly zero; clamped to the floor
        let liq = liquidation_price(p(dec!(100)), Leverage::new(1).unwrap(), Side::Long, dec!(1));
        assert_eq!(liq.value(), MIN_LIQ_PRICE);
    }

    #[test]
    fn liquidation_price_monotonic_in_leverage() {
        let entry = p(dec!(100));
        let lo = liquidation_price(entry, Leverage::new(2).unwrap(), Side::Long, dec!(1));
        let hi = liquidation_price(entry, Leverage::new(50).unwrap(), Side::Long, dec!(1));
        assert!(hi.value() > lo.value());
        assert!(hi.value() < entry.value());
    }

    #[test]
    fn liquidation_predicate_sides() {
        let liq = p(dec!(80));
        assert!(is_liquidated(Side::Long, p(dec!(80)), liq));
        assert!(is_liquidated(Side::Long, p(dec!(79)), liq));
        assert!(!is_liquidated(Side::Long, p(dec!(81)), liq));

        let liq_s = p(dec!(120));
        assert!(is_liquidated(Side::Short, p(dec!(120)), liq_s));
        assert!(is_liquidated(Side::Short, p(dec!(121)), liq_s));
        assert!(!is_liquidated(Side::Short, p(dec!(119)), liq_s));
    }

    #[test]
    fn loss_floored_at_margin() {
        let floored = floor_realized_loss(Quote::new(dec!(-1500)), Quote::new(dec!(1000)));
        assert_eq!(floored.value(), dec!(-1000));

        let untouched = floor_realized_loss(Quote::new(dec!(-300)), Quote::new(dec!(1000)));
        assert_eq!(untouched.value(), dec!(-300));
    }

    #[test]
    fn settlement_floor_at_zero() {
        assert_eq!(
            final_settlement(Quote::new(dec!(1000)), Quote::new(dec!(500))).value(),
            dec!(1500)
        );
        assert_eq!(
            final_settlement(Quote::new(dec!(1000)), Quote::new(dec!(-1000))).value(),
            dec!(0)
        );
    }

    #[test]
    fn health_bands() {
        let entry = p(dec!(100));
        let liq = p(dec!(80));
        assert_eq!(margin_health(Side::Long, entry, p(dec!(95)), liq), MarginHealth::Healthy);
        // 20% of the 20-point distance remains at mark 84
        assert_eq!(margin_health(Side::Long, entry, p(dec!(84)), liq), MarginHealth::AtRisk);
        assert_eq!(margin_health(Side::Long, entry, p(dec!(79)), liq), MarginHealth::Liquidatable);
    }
}
