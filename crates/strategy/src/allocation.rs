//! Budget-constrained target allocation.
//!
//! The fixed-rate venue has a hard minimum deposit that is not a percentage,
//! so its target is computed first and spot and hedge take their configured
//! weights of what remains. Targets therefore never sum above the portfolio
//! value, however small it is; whatever the weights leave over stays idle.

use delta_vault_core::{AllocationConfig, InventorySnapshot, Venue, VenueTargets};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Allocation of a single venue against its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueAllocation {
    pub venue: Venue,
    pub actual_usd: Decimal,
    pub target_usd: Decimal,
    pub actual_pct: Decimal,
    pub target_pct: Decimal,
    /// `actual - target`, as a fraction of total value.
    pub deviation_pct: Decimal,
    /// `actual - target`, in USD.
    pub deviation_usd: Decimal,
}

impl VenueAllocation {
    /// USD needed to close the deviation. Positive means the venue is under target.
    #[must_use]
    pub fn needed_usd(&self) -> Decimal {
        -self.deviation_usd
    }
}

/// Per-venue deviation from target for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStatus {
    pub total_value: Decimal,
    pub unallocated_usd: Decimal,
    pub fixed_rate_enabled: bool,
    pub targets: VenueTargets,
    pub venues: Vec<VenueAllocation>,
}

impl AllocationStatus {
    #[must_use]
    pub fn venue(&self, venue: Venue) -> Option<&VenueAllocation> {
        self.venues.iter().find(|v| v.venue == venue)
    }

    /// USD the venue is short of its target, zero when at or above.
    #[must_use]
    pub fn deficit_usd(&self, venue: Venue) -> Decimal {
        self.venue(venue)
            .map_or(Decimal::ZERO, |v| v.needed_usd().max(Decimal::ZERO))
    }
}

/// Whether the portfolio is large enough to use the fixed-rate venue.
#[must_use]
pub fn fixed_rate_enabled(total_value: Decimal, config: &AllocationConfig) -> bool {
    total_value > Decimal::ZERO && total_value >= config.fixed_rate_min_portfolio_usd
}

/// Computes per-venue USD targets for a portfolio of `total_value`.
#[must_use]
pub fn compute_targets(total_value: Decimal, config: &AllocationConfig) -> VenueTargets {
    if total_value <= Decimal::ZERO {
        return VenueTargets::default();
    }

    let fixed_rate = if fixed_rate_enabled(total_value, config) {
        (config.fixed_rate_weight * total_value)
            .max(config.fixed_rate_min_deposit_usd)
            .min(total_value)
            .max(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };

    let remainder = total_value - fixed_rate;
    let weight_sum = config.spot_weight + config.hedge_weight;
    if weight_sum <= Decimal::ZERO {
        return VenueTargets {
            spot: Decimal::ZERO,
            hedge: Decimal::ZERO,
            fixed_rate,
        };
    }

    // Weights apply to the remainder as-is; they are scaled down only when
    // they would otherwise claim more than all of it.
    let scale = weight_sum.max(Decimal::ONE);
    let spot = (remainder * config.spot_weight / scale)
        .min(remainder)
        .max(Decimal::ZERO);
    let hedge = (remainder * config.hedge_weight / scale)
        .min(remainder - spot)
        .max(Decimal::ZERO);

    VenueTargets {
        spot,
        hedge,
        fixed_rate,
    }
}

/// Evaluates a snapshot against the configured allocation.
#[must_use]
pub fn evaluate(snapshot: &InventorySnapshot, config: &AllocationConfig) -> AllocationStatus {
    let total_value = snapshot.total_value();
    let targets = compute_targets(total_value, config);
    let pct = |usd: Decimal| {
        if total_value.is_zero() {
            Decimal::ZERO
        } else {
            usd / total_value
        }
    };

    let venues = Venue::ALL
        .iter()
        .map(|&venue| {
            let actual_usd = snapshot.venue_value(venue);
            let target_usd = match venue {
                Venue::Spot => targets.spot,
                Venue::Hedge => targets.hedge,
                Venue::FixedRate => targets.fixed_rate,
            };
            VenueAllocation {
                venue,
                actual_usd,
                target_usd,
                actual_pct: pct(actual_usd),
                target_pct: pct(target_usd),
                deviation_pct: pct(actual_usd - target_usd),
                deviation_usd: actual_usd - target_usd,
            }
        })
        .collect();

    AllocationStatus {
        total_value,
        unallocated_usd: snapshot.unallocated_usd(),
        fixed_rate_enabled: fixed_rate_enabled(total_value, config),
        targets,
        venues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use delta_vault_core::{FixedRateVenueState, HedgeVenueState, SpotVenueState, WalletState};
    use rust_decimal_macros::dec;

    fn config(floor: Decimal) -> AllocationConfig {
        AllocationConfig {
            spot_weight: dec!(0.60),
            hedge_weight: dec!(0.35),
            fixed_rate_weight: dec!(0.05),
            fixed_rate_min_deposit_usd: floor,
            fixed_rate_min_portfolio_usd: dec!(500),
        }
    }

    #[test]
    fn floor_at_percentage_target_weights_the_remainder() {
        let targets = compute_targets(dec!(1000), &config(dec!(50)));
        assert_eq!(targets.fixed_rate, dec!(50));
        assert_eq!(targets.spot, dec!(570));
        assert_eq!(targets.hedge, dec!(332.5));
        assert_eq!(targets.sum(), dec!(952.5));
    }

    #[test]
    fn floor_above_percentage_shrinks_the_remainder() {
        let targets = compute_targets(dec!(1000), &config(dec!(120)));
        assert_eq!(targets.fixed_rate, dec!(120));
        assert_eq!(targets.spot, dec!(528));
        assert_eq!(targets.hedge, dec!(308));
        assert!(targets.sum() <= dec!(1000));
    }

    #[test]
    fn oversized_weights_are_scaled_to_the_remainder() {
        let cfg = AllocationConfig {
            spot_weight: dec!(0.9),
            hedge_weight: dec!(0.6),
            ..config(dec!(50))
        };
        let targets = compute_targets(dec!(1000), &cfg);
        // 950 split 0.9 : 0.6
        assert_eq!(targets.spot, dec!(570));
        assert_eq!(targets.hedge, dec!(380));
        assert_eq!(targets.sum(), dec!(1000));
    }

    #[test]
    fn small_portfolio_skips_fixed_rate_venue() {
        let targets = compute_targets(dec!(400), &config(dec!(50)));
        assert_eq!(targets.fixed_rate, Decimal::ZERO);
        assert_eq!(targets.spot, dec!(240));
        assert_eq!(targets.hedge, dec!(140));
    }

    #[test]
    fn targets_never_exceed_total_value() {
        let totals = [
            dec!(0),
            dec!(0.01),
            dec!(1),
            dec!(49.99),
            dec!(120),
            dec!(499.99),
            dec!(500),
            dec!(777.77),
            dec!(1000),
            dec!(1234567.891),
        ];
        let floors = [dec!(0), dec!(50), dec!(120), dec!(600), dec!(5000)];
        let weights = [
            (dec!(0.60), dec!(0.35), dec!(0.05)),
            (dec!(1), dec!(0), dec!(0)),
            (dec!(0.2), dec!(0.2), dec!(0.9)),
            (dec!(0.333), dec!(0.333), dec!(0.334)),
        ];

        for total in totals {
            for floor in floors {
                for (spot, hedge, fixed) in weights {
                    let cfg = AllocationConfig {
                        spot_weight: spot,
                        hedge_weight: hedge,
                        fixed_rate_weight: fixed,
                        fixed_rate_min_deposit_usd: floor,
                        fixed_rate_min_portfolio_usd: dec!(100),
                    };
                    let t = compute_targets(total, &cfg);
                    assert!(
                        t.sum() <= total,
                        "over-allocated: total={total} floor={floor} targets={t:?}"
                    );
                    assert!(t.spot >= Decimal::ZERO);
                    assert!(t.hedge >= Decimal::ZERO);
                    assert!(t.fixed_rate >= Decimal::ZERO);
                }
            }
        }
    }

    #[test]
    fn evaluate_reports_deviations_without_leakage() {
        let snapshot = InventorySnapshot::new(
            Utc::now(),
            WalletState {
                idle_usd: dec!(100),
                gas_balance: dec!(0.05),
            },
            SpotVenueState {
                yield_units: dec!(0.25),
                price: dec!(2000),
                ..Default::default()
            },
            HedgeVenueState {
                account_value_usd: dec!(350),
                ..Default::default()
            },
            FixedRateVenueState {
                deposited_collateral_usd: dec!(50),
                ..Default::default()
            },
        );

        let status = evaluate(&snapshot, &config(dec!(50)));

        assert_eq!(status.total_value, dec!(1000));
        let actual: Decimal = status.venues.iter().map(|v| v.actual_usd).sum();
        assert_eq!(actual + status.unallocated_usd, status.total_value);
        let spot = status.venue(Venue::Spot).unwrap();
        assert_eq!(spot.deviation_usd, dec!(-70));
        assert_eq!(status.deficit_usd(Venue::Spot), dec!(70));
        assert_eq!(status.deficit_usd(Venue::Hedge), Decimal::ZERO);
        assert_eq!(spot.actual_pct, dec!(0.5));
        assert_eq!(spot.target_pct, dec!(0.57));
    }
}
