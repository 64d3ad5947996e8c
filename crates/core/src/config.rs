use crate::error::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub allocation: AllocationConfig,
    pub risk: RiskConfig,
    pub tolerance: ToleranceConfig,
    pub market: MarketSelectionConfig,
    pub gas: GasConfig,
    pub limits: LoopLimits,
    pub failsafe: FailsafeConfig,
}

/// Target weights and the fixed-rate venue floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub spot_weight: Decimal,
    pub hedge_weight: Decimal,
    pub fixed_rate_weight: Decimal,
    /// Hard minimum deposit on the fixed-rate venue, in USD.
    pub fixed_rate_min_deposit_usd: Decimal,
    /// Below this portfolio size the fixed-rate venue is not used at all.
    pub fixed_rate_min_portfolio_usd: Decimal,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            spot_weight: dec!(0.60),
            hedge_weight: dec!(0.35),
            fixed_rate_weight: dec!(0.05),
            fixed_rate_min_deposit_usd: dec!(50),
            fixed_rate_min_portfolio_usd: dec!(500),
        }
    }
}

/// Mode thresholds on risk progress, and hedge leverage bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub partial_trim_threshold: Decimal,
    pub full_rebalance_threshold: Decimal,
    /// Leverage a trim restores the hedge account to.
    pub target_hedge_leverage: Decimal,
    /// Highest leverage a hedge increase may run at before a trim is preferred.
    pub max_hedge_leverage: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            partial_trim_threshold: dec!(0.5),
            full_rebalance_threshold: dec!(0.8),
            target_hedge_leverage: dec!(2),
            max_hedge_leverage: dec!(3),
        }
    }
}

/// Bands that keep the planner from chasing dust.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Smallest capital movement worth a step, in USD.
    pub min_action_usd: Decimal,
    pub delta_abs_tolerance_usd: Decimal,
    pub delta_rel_tolerance: Decimal,
    /// Fixed-rate notional as a fraction of hedge notional.
    pub fixed_rate_coverage_target: Decimal,
    /// Relative excess over target required before resizing the fixed-rate position.
    pub fixed_rate_resize_band: Decimal,
    /// Collateral required per USD of fixed-rate notional.
    pub fixed_rate_collateral_ratio: Decimal,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            min_action_usd: dec!(10),
            delta_abs_tolerance_usd: dec!(5),
            delta_rel_tolerance: dec!(0.02),
            fixed_rate_coverage_target: dec!(1.0),
            fixed_rate_resize_band: dec!(0.10),
            fixed_rate_collateral_ratio: dec!(0.05),
        }
    }
}

impl ToleranceConfig {
    /// Delta-neutral tolerance for a given exposure: `max(abs_tol, value * rel_tol)`.
    #[must_use]
    pub fn delta_tolerance_usd(&self, exposure_usd: Decimal) -> Decimal {
        self.delta_abs_tolerance_usd
            .max(exposure_usd.abs() * self.delta_rel_tolerance)
    }
}

/// External market selection and switch hysteresis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSelectionConfig {
    pub underlying: String,
    pub min_tenor_days: u32,
    pub switch_cooldown_secs: u64,
    /// Absolute rate improvement required to switch markets after cooldown.
    pub rate_improvement_threshold: Decimal,
}

impl Default for MarketSelectionConfig {
    fn default() -> Self {
        Self {
            underlying: "ETH".to_string(),
            min_tenor_days: 14,
            switch_cooldown_secs: 86_400,
            rate_improvement_threshold: dec!(0.005),
        }
    }
}

/// Execution-gas reserve on the primary chain, in native units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    pub min_reserve: Decimal,
    pub target_reserve: Decimal,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            min_reserve: dec!(0.01),
            target_reserve: dec!(0.03),
        }
    }
}

/// Step budgets bounding one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopLimits {
    pub max_iterations_per_tick: usize,
    pub max_steps_per_iteration: usize,
    pub max_total_steps_per_tick: usize,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations_per_tick: 5,
            max_steps_per_iteration: 4,
            max_total_steps_per_tick: 12,
        }
    }
}

/// Settlement polling used while liquidating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailsafeConfig {
    pub settlement_poll_interval_ms: u64,
    pub settlement_deadline_secs: u64,
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            settlement_poll_interval_ms: 2_000,
            settlement_deadline_secs: 120,
        }
    }
}

impl StrategyConfig {
    /// Checks cross-field constraints the planner relies on.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.allocation;
        if a.spot_weight < Decimal::ZERO
            || a.hedge_weight < Decimal::ZERO
            || a.fixed_rate_weight < Decimal::ZERO
        {
            return Err(ConfigError::InvalidWeights(
                "weights must be non-negative".to_string(),
            ));
        }
        if a.spot_weight + a.hedge_weight <= Decimal::ZERO {
            return Err(ConfigError::InvalidWeights(
                "spot and hedge weights cannot both be zero".to_string(),
            ));
        }
        if a.fixed_rate_weight > Decimal::ONE {
            return Err(ConfigError::InvalidWeights(
                "fixed_rate_weight cannot exceed 1".to_string(),
            ));
        }

        let r = &self.risk;
        let in_unit = |d: Decimal| d >= Decimal::ZERO && d <= Decimal::ONE;
        if !in_unit(r.partial_trim_threshold)
            || !in_unit(r.full_rebalance_threshold)
            || r.partial_trim_threshold > r.full_rebalance_threshold
        {
            return Err(ConfigError::InvalidRiskThresholds {
                partial_trim: r.partial_trim_threshold.to_string(),
                full_rebalance: r.full_rebalance_threshold.to_string(),
            });
        }
        check_min("risk.target_hedge_leverage", r.target_hedge_leverage, Decimal::ONE)?;
        check_min("risk.max_hedge_leverage", r.max_hedge_leverage, r.target_hedge_leverage)?;

        check_min("gas.target_reserve", self.gas.target_reserve, self.gas.min_reserve)?;

        let l = &self.limits;
        for (field, value) in [
            ("limits.max_iterations_per_tick", l.max_iterations_per_tick),
            ("limits.max_steps_per_iteration", l.max_steps_per_iteration),
            ("limits.max_total_steps_per_tick", l.max_total_steps_per_tick),
        ] {
            if value == 0 {
                return Err(ConfigError::BelowMinimum {
                    field,
                    min: "1".to_string(),
                    value: "0".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn check_min(field: &'static str, value: Decimal, min: Decimal) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::BelowMinimum {
            field,
            min: min.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}
