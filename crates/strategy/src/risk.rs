//! Risk progress, mode selection, and margin sizing.

use chrono::{DateTime, Utc};
use delta_vault_core::{HedgeFill, HedgeVenueState, Mode, RiskConfig};
use rust_decimal::Decimal;

/// Distance travelled from entry toward the liquidation price, in `[0, 1]`.
///
/// Direction-aware: a short is endangered by the mark rising toward a
/// liquidation price above entry, a long by it falling toward one below.
/// Returns zero when there is no position or any price is unknown.
#[must_use]
pub fn risk_progress(hedge: &HedgeVenueState) -> Decimal {
    if hedge.position_size.is_zero()
        || hedge.mark_price <= Decimal::ZERO
        || hedge.entry_price <= Decimal::ZERO
    {
        return Decimal::ZERO;
    }
    let liquidation = match hedge.liquidation_price {
        Some(price) if price > Decimal::ZERO => price,
        _ => return Decimal::ZERO,
    };

    let (travelled, span) = if hedge.is_short() {
        (hedge.mark_price - hedge.entry_price, liquidation - hedge.entry_price)
    } else {
        (hedge.entry_price - hedge.mark_price, hedge.entry_price - liquidation)
    };

    if span <= Decimal::ZERO {
        // Liquidation price already at or past entry.
        return Decimal::ONE;
    }

    (travelled / span).clamp(Decimal::ZERO, Decimal::ONE)
}

/// Maps risk progress to an operating mode at the configured thresholds.
#[must_use]
pub fn select_mode(progress: Decimal, config: &RiskConfig) -> Mode {
    if progress >= config.full_rebalance_threshold {
        Mode::Redeploy
    } else if progress >= config.partial_trim_threshold {
        Mode::Trim
    } else {
        Mode::Normal
    }
}

/// Newest forced-liquidation fill strictly after `since`.
#[must_use]
pub fn detect_forced_liquidation(
    fills: &[HedgeFill],
    since: Option<DateTime<Utc>>,
) -> Option<&HedgeFill> {
    fills
        .iter()
        .filter(|f| f.is_liquidation)
        .filter(|f| since.map_or(true, |cutoff| f.filled_at > cutoff))
        .max_by_key(|f| f.filled_at)
}

/// Spot (and matching hedge) notional to unwind so the hedge account runs
/// at no more than `leverage`.
///
/// Unwinding `x` of both legs lowers hedge notional by `x` and adds `x` of
/// proceeds to margin, so the smallest `x` with
/// `notional - x <= (account + x) * leverage` is
/// `(notional - account * leverage) / (leverage + 1)`.
#[must_use]
pub fn trim_for_leverage(notional_usd: Decimal, account_usd: Decimal, leverage: Decimal) -> Decimal {
    if leverage <= Decimal::ZERO {
        return notional_usd.max(Decimal::ZERO);
    }
    ((notional_usd - account_usd.max(Decimal::ZERO) * leverage) / (leverage + Decimal::ONE))
        .max(Decimal::ZERO)
}

/// Whether `account_usd` of margin can carry `notional_usd` at `max_leverage`.
#[must_use]
pub fn margin_supports(notional_usd: Decimal, account_usd: Decimal, max_leverage: Decimal) -> bool {
    notional_usd <= account_usd.max(Decimal::ZERO) * max_leverage
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn short(entry: Decimal, mark: Decimal, liq: Decimal) -> HedgeVenueState {
        HedgeVenueState {
            account_value_usd: dec!(500),
            position_size: dec!(-1),
            entry_price: entry,
            mark_price: mark,
            liquidation_price: Some(liq),
            ..Default::default()
        }
    }

    #[test]
    fn short_progress_rises_with_mark() {
        assert_eq!(risk_progress(&short(dec!(2000), dec!(2000), dec!(3000))), dec!(0));
        assert_eq!(risk_progress(&short(dec!(2000), dec!(2500), dec!(3000))), dec!(0.5));
        assert_eq!(risk_progress(&short(dec!(2000), dec!(3200), dec!(3000))), dec!(1));
        // Price moving in the short's favour is not progress.
        assert_eq!(risk_progress(&short(dec!(2000), dec!(1500), dec!(3000))), dec!(0));
    }

    #[test]
    fn long_progress_rises_as_mark_falls() {
        let long = HedgeVenueState {
            position_size: dec!(1),
            entry_price: dec!(2000),
            mark_price: dec!(1800),
            liquidation_price: Some(dec!(1000)),
            ..Default::default()
        };
        assert_eq!(risk_progress(&long), dec!(0.2));
    }

    #[test]
    fn unknown_prices_mean_no_progress() {
        let mut hedge = short(dec!(2000), dec!(0), dec!(3000));
        assert_eq!(risk_progress(&hedge), dec!(0));
        hedge.mark_price = dec!(2500);
        hedge.liquidation_price = None;
        assert_eq!(risk_progress(&hedge), dec!(0));
    }

    #[test]
    fn mode_is_monotonic_in_progress() {
        let config = RiskConfig::default(); // 0.5 trim, 0.8 redeploy
        let mut previous = Mode::Normal;
        for i in 0..=100 {
            let progress = Decimal::from(i) / dec!(100);
            let mode = select_mode(progress, &config);
            assert!(mode >= previous, "mode regressed at {progress}");
            match mode {
                Mode::Normal => assert!(progress < config.partial_trim_threshold),
                Mode::Trim => {
                    assert!(progress >= config.partial_trim_threshold);
                    assert!(progress < config.full_rebalance_threshold);
                }
                Mode::Redeploy => assert!(progress >= config.full_rebalance_threshold),
            }
            previous = mode;
        }
        assert_eq!(previous, Mode::Redeploy);
    }

    #[test]
    fn detects_only_new_liquidations() {
        let t0 = Utc::now();
        let fills = vec![
            HedgeFill {
                filled_at: t0,
                size: dec!(1),
                price: dec!(2000),
                is_liquidation: false,
            },
            HedgeFill {
                filled_at: t0 + chrono::Duration::seconds(5),
                size: dec!(1),
                price: dec!(3000),
                is_liquidation: true,
            },
        ];

        let found = detect_forced_liquidation(&fills, None).unwrap();
        assert_eq!(found.price, dec!(3000));
        assert!(detect_forced_liquidation(&fills, Some(found.filled_at)).is_none());
        assert!(detect_forced_liquidation(&fills[..1], None).is_none());
    }

    #[test]
    fn trim_restores_target_leverage() {
        // 1200 notional on 300 margin is 4x; trimming 200 leaves 1000 on 500 = 2x.
        let trim = trim_for_leverage(dec!(1200), dec!(300), dec!(2));
        assert_eq!(trim, dec!(200));
        assert!(margin_supports(dec!(1200) - trim, dec!(300) + trim, dec!(2)));
        assert_eq!(trim_for_leverage(dec!(500), dec!(300), dec!(2)), Decimal::ZERO);
    }
}
