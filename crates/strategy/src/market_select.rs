//! Fixed-rate market selection with switch hysteresis.

use crate::runtime::MarketSelection;
use chrono::{DateTime, Duration, Utc};
use delta_vault_core::{FixedRatePosition, MarketQuote, MarketSelectionConfig};
use std::cmp::Reverse;
use tracing::{debug, info};

/// Candidates with at least the minimum tenor, best first: longest tenor,
/// then highest mid rate.
#[must_use]
pub fn rank_candidates<'a>(candidates: &'a [MarketQuote], min_tenor_days: u32) -> Vec<&'a MarketQuote> {
    let mut eligible: Vec<&MarketQuote> = candidates
        .iter()
        .filter(|q| q.tenor_days >= min_tenor_days)
        .collect();
    eligible.sort_by_key(|q| Reverse((q.tenor_days, q.mid_rate)));
    eligible
}

/// Decides which market to hold after seeing `candidates` at `now`.
///
/// The current market is kept unless it has dropped out of the eligible set,
/// or the cooldown has elapsed and the best candidate beats its live rate by
/// more than the improvement threshold.
pub(crate) fn select_market(
    current: Option<&MarketSelection>,
    candidates: &[MarketQuote],
    config: &MarketSelectionConfig,
    now: DateTime<Utc>,
) -> Option<MarketSelection> {
    let ranked = rank_candidates(candidates, config.min_tenor_days);
    let best = ranked.first().copied();

    let Some(current) = current else {
        return best.map(|q| {
            info!(market = %q.market_id, rate = %q.mid_rate, "Selected fixed-rate market");
            fresh(q, now)
        });
    };

    let Some(live) = ranked.iter().find(|q| q.market_id == current.market_id) else {
        if let Some(q) = best {
            info!(from = %current.market_id, to = %q.market_id, "Selected market disappeared, switching");
        }
        return best.map(|q| fresh(q, now));
    };

    let kept = MarketSelection {
        market_id: current.market_id.clone(),
        rate: live.mid_rate,
        selected_at: current.selected_at,
    };

    let Some(best) = best else {
        return Some(kept);
    };
    if best.market_id == current.market_id {
        return Some(kept);
    }

    let cooldown_secs = i64::try_from(config.switch_cooldown_secs)
        .unwrap_or(i64::MAX)
        .min(i64::MAX / 1_000);
    let cooldown = Duration::seconds(cooldown_secs);
    let cooled = now.signed_duration_since(current.selected_at) >= cooldown;
    let improvement = best.mid_rate - live.mid_rate;

    if cooled && improvement > config.rate_improvement_threshold {
        info!(
            from = %current.market_id,
            to = %best.market_id,
            improvement = %improvement,
            "Switching fixed-rate market"
        );
        Some(fresh(best, now))
    } else {
        debug!(
            market = %current.market_id,
            candidate = %best.market_id,
            cooled,
            improvement = %improvement,
            "Keeping fixed-rate market"
        );
        Some(kept)
    }
}

/// Treats the market of a live position as the current selection when the
/// runtime has none, so a restart goes through the same hysteresis as a
/// running process. The cooldown restarts at `now`.
///
/// `None` when the position's market is no longer eligible.
pub(crate) fn adopt_position(
    position: &FixedRatePosition,
    candidates: &[MarketQuote],
    config: &MarketSelectionConfig,
    now: DateTime<Utc>,
) -> Option<MarketSelection> {
    let live = rank_candidates(candidates, config.min_tenor_days)
        .into_iter()
        .find(|q| q.market_id == position.market_id)?;
    info!(market = %live.market_id, rate = %live.mid_rate, "Adopted market of live fixed-rate position");
    Some(fresh(live, now))
}

fn fresh(quote: &MarketQuote, now: DateTime<Utc>) -> MarketSelection {
    MarketSelection {
        market_id: quote.market_id.clone(),
        rate: quote.mid_rate,
        selected_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn quote(id: &str, tenor_days: u32, rate: Decimal) -> MarketQuote {
        MarketQuote {
            market_id: id.to_string(),
            tenor_days,
            mid_rate: rate,
            best_bid_rate: rate - dec!(0.001),
            best_ask_rate: rate + dec!(0.001),
            collateral_id: "USDC".to_string(),
        }
    }

    fn config() -> MarketSelectionConfig {
        MarketSelectionConfig {
            underlying: "ETH".to_string(),
            min_tenor_days: 14,
            switch_cooldown_secs: 3_600,
            rate_improvement_threshold: dec!(0.005),
        }
    }

    #[test]
    fn ranks_by_tenor_then_rate_and_drops_short_tenors() {
        let quotes = vec![
            quote("7d", 7, dec!(0.09)),
            quote("30d-low", 30, dec!(0.04)),
            quote("60d", 60, dec!(0.03)),
            quote("30d-high", 30, dec!(0.05)),
        ];
        let ranked: Vec<&str> = rank_candidates(&quotes, 14)
            .iter()
            .map(|q| q.market_id.as_str())
            .collect();
        assert_eq!(ranked, vec!["60d", "30d-high", "30d-low"]);
    }

    #[test]
    fn first_selection_takes_best_candidate() {
        let now = Utc::now();
        let quotes = vec![quote("a", 30, dec!(0.05)), quote("b", 90, dec!(0.04))];
        let selected = select_market(None, &quotes, &config(), now).unwrap();
        assert_eq!(selected.market_id, "b");
        assert_eq!(selected.selected_at, now);
    }

    #[test]
    fn small_improvement_never_switches_across_many_ticks() {
        let start = Utc::now();
        let mut current = MarketSelection {
            market_id: "held".to_string(),
            rate: dec!(0.050),
            selected_at: start,
        };
        // Longer tenor ranks first but only beats the held rate by 0.004.
        let quotes = vec![quote("held", 30, dec!(0.050)), quote("better", 90, dec!(0.054))];

        for tick in 0..500 {
            let now = start + Duration::minutes(tick * 30);
            current = select_market(Some(&current), &quotes, &config(), now).unwrap();
            assert_eq!(current.market_id, "held", "switched on tick {tick}");
        }
        assert_eq!(current.selected_at, start);
    }

    #[test]
    fn large_improvement_waits_for_cooldown() {
        let start = Utc::now();
        let current = MarketSelection {
            market_id: "held".to_string(),
            rate: dec!(0.05),
            selected_at: start,
        };
        let quotes = vec![quote("held", 30, dec!(0.05)), quote("better", 90, dec!(0.07))];

        let early = select_market(Some(&current), &quotes, &config(), start + Duration::minutes(30));
        assert_eq!(early.unwrap().market_id, "held");

        let later = select_market(Some(&current), &quotes, &config(), start + Duration::hours(2));
        let later = later.unwrap();
        assert_eq!(later.market_id, "better");
        assert_eq!(later.selected_at, start + Duration::hours(2));
    }

    #[test]
    fn disappeared_market_is_replaced_immediately() {
        let start = Utc::now();
        let current = MarketSelection {
            market_id: "expired".to_string(),
            rate: dec!(0.05),
            selected_at: start,
        };
        let quotes = vec![quote("next", 30, dec!(0.045))];
        let selected = select_market(Some(&current), &quotes, &config(), start).unwrap();
        assert_eq!(selected.market_id, "next");

        assert!(select_market(Some(&current), &[], &config(), start).is_none());
    }

    #[test]
    fn adopted_position_market_resists_marginal_switch() {
        let start = Utc::now();
        let position = FixedRatePosition {
            market_id: "held".to_string(),
            notional_usd: dec!(600),
            rate: dec!(0.05),
        };
        let quotes = vec![quote("held", 30, dec!(0.050)), quote("better", 90, dec!(0.051))];

        let adopted = adopt_position(&position, &quotes, &config(), start).unwrap();
        let selected = select_market(Some(&adopted), &quotes, &config(), start).unwrap();
        assert_eq!(selected.market_id, "held");

        // Past the cooldown a marginal gain still does not switch.
        let later = select_market(Some(&selected), &quotes, &config(), start + Duration::hours(2));
        assert_eq!(later.unwrap().market_id, "held");
    }

    #[test]
    fn ineligible_position_market_is_not_adopted() {
        let position = FixedRatePosition {
            market_id: "short".to_string(),
            notional_usd: dec!(600),
            rate: dec!(0.05),
        };
        let quotes = vec![quote("short", 7, dec!(0.08)), quote("long", 30, dec!(0.05))];
        assert!(adopt_position(&position, &quotes, &config(), Utc::now()).is_none());
    }

    #[test]
    fn kept_selection_tracks_live_rate() {
        let start = Utc::now();
        let current = MarketSelection {
            market_id: "held".to_string(),
            rate: dec!(0.05),
            selected_at: start,
        };
        let quotes = vec![quote("held", 30, dec!(0.047))];
        let kept = select_market(Some(&current), &quotes, &config(), start).unwrap();
        assert_eq!(kept.rate, dec!(0.047));
    }
}
