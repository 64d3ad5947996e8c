//! Turns a snapshot into a prioritized plan.
//!
//! Planning is deterministic given the snapshot, the config and the planner
//! runtime. Every step is gated by a tolerance so that a deviation inside its
//! band produces no step at all; the planner prefers inaction to chasing dust.

use crate::allocation::{self, AllocationStatus};
use crate::market_select;
use crate::risk;
use crate::runtime::{LedgerBucket, OneShot, PlannerRuntime};
use delta_vault_core::{
    DesiredState, InventorySnapshot, Mode, Operation, Plan, PlanBuilder, PlanStep,
    RedeployTrigger, StepAction, StrategyConfig, Venue,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Builds the plan for one pass.
pub fn plan(
    snapshot: &InventorySnapshot,
    config: &StrategyConfig,
    runtime: &mut PlannerRuntime,
) -> Plan {
    {
        let ledger = runtime.ledger_mut();
        ledger.release_unexecuted();
        ledger.settle(LedgerBucket::WalletIdle, snapshot.wallet().idle_usd);
        ledger.settle(LedgerBucket::SpotIdle, snapshot.spot().idle_usd);
    }

    if let Some(pending) = snapshot.pending_withdrawal() {
        let message = format!(
            "withdrawal of ${} from {} pending since {}; holding",
            pending.amount_usd.round_dp(2),
            pending.venue,
            pending.initiated_at.format("%Y-%m-%d %H:%M:%S")
        );
        info!(amount = %pending.amount_usd, venue = %pending.venue, "Pending withdrawal, empty plan");
        return Plan::empty(message);
    }

    if snapshot.liquidation_detected() {
        info!("Forced liquidation detected, planning close and redeploy");
        return redeploy(RedeployTrigger::LiquidationDetected, "hedge position was force-liquidated");
    }

    let progress = risk::risk_progress(snapshot.hedge());
    let mode = risk::select_mode(progress, &config.risk);
    if mode == Mode::Redeploy {
        info!(progress = %progress, "Risk threshold reached, planning close and redeploy");
        return redeploy(
            RedeployTrigger::RiskThreshold,
            format!("risk progress {} at or above full rebalance threshold", progress.round_dp(3)),
        );
    }

    let status = allocation::evaluate(snapshot, &config.allocation);
    let now = snapshot.observed_at();
    let adopted = match runtime.selection() {
        Some(_) => None,
        None => snapshot.fixed_rate().position.as_ref().and_then(|position| {
            market_select::adopt_position(
                position,
                snapshot.market_candidates(),
                &config.market,
                now,
            )
        }),
    };
    let selection = market_select::select_market(
        adopted.as_ref().or(runtime.selection()),
        snapshot.market_candidates(),
        &config.market,
        now,
    );
    runtime.set_selection(selection);

    let mut pass = Pass {
        snapshot,
        config,
        status: &status,
        builder: PlanBuilder::new(),
        routed_to_hedge: Decimal::ZERO,
    };

    if mode == Mode::Trim {
        pass.trim_for_risk(progress);
    }
    pass.top_up_gas(runtime);
    pass.route_capital(runtime);
    pass.sweep_spot_idle(runtime);
    let target_hedge_size = pass.resize_hedge();
    let target_fixed_rate = pass.manage_fixed_rate(runtime);

    let desired = DesiredState {
        mode,
        targets: status.targets,
        target_hedge_size,
        target_fixed_rate_notional_usd: target_fixed_rate,
        selected_market: runtime.selected_market_id().map(str::to_string),
    };
    let plan = pass.builder.build(Some(desired), None);
    debug!(
        mode = %mode,
        steps = plan.len(),
        total_value = %status.total_value,
        "Plan built"
    );
    plan
}

fn redeploy(trigger: RedeployTrigger, reason: impl Into<String>) -> Plan {
    let mut builder = PlanBuilder::new();
    builder.push(PlanStep::new(StepAction::CloseAndRedeploy { trigger }, reason));
    builder.build(None, None)
}

struct Pass<'a> {
    snapshot: &'a InventorySnapshot,
    config: &'a StrategyConfig,
    status: &'a AllocationStatus,
    builder: PlanBuilder,
    /// Wallet capital routed to the hedge venue earlier in this pass.
    routed_to_hedge: Decimal,
}

impl Pass<'_> {
    fn min_action(&self) -> Decimal {
        self.config.tolerance.min_action_usd
    }

    /// Partial trim sized to bring the hedge back to target leverage.
    fn trim_for_risk(&mut self, progress: Decimal) {
        let hedge = self.snapshot.hedge();
        let trim = risk::trim_for_leverage(
            hedge.notional_usd(),
            hedge.account_value_usd,
            self.config.risk.target_hedge_leverage,
        );
        if trim < self.min_action() {
            debug!(trim = %trim, progress = %progress, "Trim mode but leverage already at target");
            return;
        }
        self.builder.push(PlanStep::new(
            StepAction::TrimSpot { usd: trim },
            format!(
                "risk progress {} in trim band; restore {}x leverage",
                progress.round_dp(3),
                self.config.risk.target_hedge_leverage
            ),
        ));
    }

    fn top_up_gas(&mut self, runtime: &PlannerRuntime) {
        let gas = &self.config.gas;
        let balance = self.snapshot.wallet().gas_balance;
        if balance >= gas.min_reserve || runtime.one_shot_taken(OneShot::GasToppedUp) {
            return;
        }
        let amount = gas.target_reserve - balance;
        if amount <= Decimal::ZERO {
            return;
        }
        self.builder.push(PlanStep::new(
            StepAction::TopUpGas { amount },
            format!("gas {balance} below reserve {}", gas.min_reserve),
        ));
    }

    /// Spends wallet idle capital on venue deficits, fixed-rate first, never
    /// committing the same dollar twice.
    fn route_capital(&mut self, runtime: &mut PlannerRuntime) {
        let idle = self.snapshot.wallet().idle_usd.max(Decimal::ZERO);
        let mut available = runtime.ledger().available(LedgerBucket::WalletIdle, idle);
        if available < self.min_action() {
            return;
        }

        if self.status.fixed_rate_enabled && !runtime.one_shot_taken(OneShot::FixedRateFunded) {
            let need = self.need(runtime, Venue::FixedRate, Operation::FundFixedRate);
            if let Some(usd) = self.routable(need, available) {
                let step = PlanStep::new(
                    StepAction::FundFixedRate { usd },
                    format!("fixed-rate venue {} under target", need.round_dp(2)),
                );
                available -= self.commit_wallet(runtime, step, usd, idle);
            }
        }

        let need = self.need(runtime, Venue::Hedge, Operation::RouteToHedge);
        if let Some(usd) = self.routable(need, available) {
            let step = PlanStep::new(
                StepAction::RouteToHedge { usd },
                format!("hedge venue {} under target", need.round_dp(2)),
            );
            let spent = self.commit_wallet(runtime, step, usd, idle);
            self.routed_to_hedge += spent;
            available -= spent;
        }

        let need = self.need(runtime, Venue::Spot, Operation::BridgeToSpot);
        if let Some(usd) = self.routable(need, available) {
            let step = PlanStep::new(
                StepAction::BridgeToSpot { usd },
                format!("spot venue {} under target", need.round_dp(2)),
            );
            self.commit_wallet(runtime, step, usd, idle);
        }
    }

    /// Venue deficit less anything already sent there this tick that the
    /// snapshot does not show yet.
    fn need(&self, runtime: &PlannerRuntime, venue: Venue, op: Operation) -> Decimal {
        (self.status.deficit_usd(venue) - runtime.ledger().outstanding(op.as_str()))
            .max(Decimal::ZERO)
    }

    fn routable(&self, need: Decimal, available: Decimal) -> Option<Decimal> {
        let usd = need.min(available);
        (usd >= self.min_action()).then_some(usd)
    }

    /// Pushes a routing step and commits its amount. Returns what was committed.
    fn commit_wallet(
        &mut self,
        runtime: &mut PlannerRuntime,
        step: PlanStep,
        usd: Decimal,
        baseline: Decimal,
    ) -> Decimal {
        let key = step.key.clone();
        if !self.builder.push(step) {
            return Decimal::ZERO;
        }
        runtime
            .ledger_mut()
            .commit(LedgerBucket::WalletIdle, key, usd, baseline);
        usd
    }

    fn sweep_spot_idle(&mut self, runtime: &mut PlannerRuntime) {
        let spot = self.snapshot.spot();
        let idle = spot.idle_usd.max(Decimal::ZERO);
        let usd = runtime.ledger().available(LedgerBucket::SpotIdle, idle);
        let units = spot.idle_units.max(Decimal::ZERO);
        let units_usd = units * spot.price.max(Decimal::ZERO);
        if usd < self.min_action() && units_usd < self.min_action() {
            return;
        }

        let step = PlanStep::new(
            StepAction::SweepSpotIdle { usd, units },
            format!("spot venue holds {} idle and {units} unconverted units", usd.round_dp(2)),
        );
        let key = step.key.clone();
        if self.builder.push(step) {
            runtime
                .ledger_mut()
                .commit(LedgerBucket::SpotIdle, key, usd, idle);
        }
    }

    /// Hedge sized to offset spot exposure. Returns the target size.
    fn resize_hedge(&mut self) -> Decimal {
        let spot = self.snapshot.spot();
        let hedge = self.snapshot.hedge();
        let target_size = -spot.exposure_units();

        if !spot.price_known() || hedge.mark_price <= Decimal::ZERO {
            debug!("Price unknown, skipping hedge resize");
            return target_size;
        }

        let delta_units = target_size - hedge.position_size;
        let delta_usd = delta_units.abs() * spot.price;
        let tolerance = self
            .config
            .tolerance
            .delta_tolerance_usd(spot.exposure_usd());
        if delta_usd <= tolerance {
            return target_size;
        }

        if target_size.abs() > hedge.position_size.abs() {
            let notional = target_size.abs() * hedge.mark_price;
            let margin = hedge.account_value_usd + self.routed_to_hedge;
            if !risk::margin_supports(notional, margin, self.config.risk.max_hedge_leverage) {
                let trim = risk::trim_for_leverage(
                    notional,
                    margin,
                    self.config.risk.target_hedge_leverage,
                );
                if trim >= self.min_action() {
                    self.builder.push(PlanStep::new(
                        StepAction::TrimSpot { usd: trim },
                        format!(
                            "margin {} cannot carry {} hedge notional",
                            margin.round_dp(2),
                            notional.round_dp(2)
                        ),
                    ));
                }
                return target_size;
            }
        }

        self.builder.push(PlanStep::new(
            StepAction::ResizeHedge {
                current_size: hedge.position_size,
                target_size,
            },
            format!(
                "delta {} outside tolerance {}",
                delta_usd.round_dp(2),
                tolerance.round_dp(2)
            ),
        ));
        target_size
    }

    /// Rotates or resizes the fixed-rate position. Returns the target notional.
    fn manage_fixed_rate(&mut self, runtime: &PlannerRuntime) -> Decimal {
        let fixed = self.snapshot.fixed_rate();
        let tolerance = &self.config.tolerance;
        let target = tolerance.fixed_rate_coverage_target * self.snapshot.hedge().notional_usd();
        let selected = runtime.selected_market_id();

        if let (Some(position), Some(selected)) = (fixed.position.as_ref(), selected) {
            if position.market_id != selected {
                self.builder.push(PlanStep::new(
                    StepAction::RotateFixedRateMarket {
                        from_market: position.market_id.clone(),
                        to_market: selected.to_string(),
                        notional_usd: position.notional_usd,
                    },
                    format!("selected market moved from {} to {selected}", position.market_id),
                ));
                return target;
            }
        }

        let Some(market_id) = fixed
            .position
            .as_ref()
            .map(|p| p.market_id.as_str())
            .or(selected)
        else {
            return target;
        };

        let current = fixed.position_notional_usd();
        let diff = target - current;
        let band = self
            .min_action()
            .max(target * tolerance.fixed_rate_resize_band);
        if diff.abs() <= band {
            return target;
        }

        if diff > Decimal::ZERO {
            let required = target * tolerance.fixed_rate_collateral_ratio;
            let collateral = fixed.available_collateral_usd();
            if required > collateral {
                debug!(
                    required = %required,
                    collateral = %collateral,
                    "Waiting for fixed-rate collateral"
                );
                return target;
            }
        }

        self.builder.push(PlanStep::new(
            StepAction::ResizeFixedRate {
                market_id: market_id.to_string(),
                current_notional_usd: current,
                target_notional_usd: target,
            },
            format!(
                "fixed-rate notional {} vs coverage target {}",
                current.round_dp(2),
                target.round_dp(2)
            ),
        ));
        target
    }
}
