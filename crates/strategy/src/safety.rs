//! Post-loop safety pass.
//!
//! A tick can end off-invariant: a step budget runs out, an order partially
//! fills, or a re-observation break leaves the last steps unplanned. This
//! pass re-reads the venues and repairs what it can. A broken delta that
//! survives repair is escalated; fixed-rate coverage is best effort only.

use crate::gateway::{VenueError, VenueGateway};
use crate::observe::observe_inventory;
use crate::risk;
use anyhow::Result;
use chrono::{DateTime, Utc};
use delta_vault_core::{InventorySnapshot, StrategyConfig};
use rust_decimal::Decimal;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyReport {
    /// One line per attempted repair.
    pub actions: Vec<String>,
    /// Set when delta neutrality could not be restored.
    pub escalation: Option<String>,
}

/// Hedge size needed and how far off the current one is, when outside tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaBreach {
    pub current_size: Decimal,
    pub target_size: Decimal,
    pub delta_usd: Decimal,
    pub tolerance_usd: Decimal,
}

/// Checks hedge size against spot exposure. `None` when within tolerance or
/// when a price is unknown.
#[must_use]
pub fn delta_breach(snapshot: &InventorySnapshot, config: &StrategyConfig) -> Option<DeltaBreach> {
    let spot = snapshot.spot();
    let hedge = snapshot.hedge();
    if !spot.price_known() {
        return None;
    }
    let target_size = -spot.exposure_units();
    let delta_usd = (target_size - hedge.position_size).abs() * spot.price;
    let tolerance_usd = config.tolerance.delta_tolerance_usd(spot.exposure_usd());
    (delta_usd > tolerance_usd).then_some(DeltaBreach {
        current_size: hedge.position_size,
        target_size,
        delta_usd,
        tolerance_usd,
    })
}

/// Runs the safety pass on a fresh observation.
///
/// # Errors
///
/// Returns an error if a venue read fails. Venue action failures are
/// recorded in the report instead.
pub async fn run_safety_pass<G>(
    gateway: &G,
    config: &StrategyConfig,
    liquidation_ack: Option<DateTime<Utc>>,
) -> Result<SafetyReport>
where
    G: VenueGateway + ?Sized,
{
    let underlying = config.market.underlying.as_str();
    let mut report = SafetyReport::default();
    let mut snapshot = observe_inventory(gateway, underlying, liquidation_ack)
        .await?
        .snapshot;

    if let Some(pending) = snapshot.pending_withdrawal() {
        info!(amount = %pending.amount_usd, "Safety pass skipped, withdrawal pending");
        report
            .actions
            .push(format!("safety pass skipped: withdrawal of ${} pending", pending.amount_usd));
        return Ok(report);
    }

    // 1. Sweep.
    let spot = snapshot.spot();
    let min_action = config.tolerance.min_action_usd;
    if spot.idle_usd >= min_action || spot.idle_units * spot.price >= min_action {
        let result = gateway.sweep_spot_idle(spot.idle_usd, spot.idle_units).await;
        let swept = result.is_ok();
        report.actions.push(line("sweep spot idle", &result));
        if swept {
            snapshot = observe_inventory(gateway, underlying, liquidation_ack)
                .await?
                .snapshot;
        }
    }

    // 2. Delta neutrality, with one margin repair.
    if let Some(breach) = delta_breach(&snapshot, config) {
        warn!(
            current = %breach.current_size,
            target = %breach.target_size,
            delta_usd = %breach.delta_usd,
            "Delta outside tolerance after loop"
        );
        let result = gateway.resize_hedge(breach.target_size).await;
        let margin_short = matches!(result, Err(VenueError::InsufficientMargin(_)));
        report.actions.push(line("resize hedge", &result));

        if margin_short {
            let hedge = snapshot.hedge();
            let trim = risk::trim_for_leverage(
                breach.target_size.abs() * hedge.mark_price,
                hedge.account_value_usd,
                config.risk.target_hedge_leverage,
            );
            let trimmed = gateway.trim_spot(trim).await;
            report.actions.push(line("trim spot for margin", &trimmed));

            let fresh = observe_inventory(gateway, underlying, liquidation_ack)
                .await?
                .snapshot;
            if let Some(retry) = delta_breach(&fresh, config) {
                let result = gateway.resize_hedge(retry.target_size).await;
                report.actions.push(line("retry resize hedge", &result));
            }
        }

        snapshot = observe_inventory(gateway, underlying, liquidation_ack)
            .await?
            .snapshot;
        if let Some(still) = delta_breach(&snapshot, config) {
            let reason = format!(
                "delta neutrality broken after repair: hedge {} vs target {} ({} USD off, tolerance {})",
                still.current_size,
                still.target_size,
                still.delta_usd.round_dp(2),
                still.tolerance_usd.round_dp(2)
            );
            report.escalation = Some(reason);
            return Ok(report);
        }
    }

    // 3. Fixed-rate coverage, best effort on an existing position.
    let fixed = snapshot.fixed_rate();
    if let Some(position) = fixed.position.as_ref() {
        let tolerance = &config.tolerance;
        let target = tolerance.fixed_rate_coverage_target * snapshot.hedge().notional_usd();
        let diff = target - position.notional_usd;
        let band = min_action.max(target * tolerance.fixed_rate_resize_band);
        let collateral_ok = diff < Decimal::ZERO
            || target * tolerance.fixed_rate_collateral_ratio <= fixed.available_collateral_usd();
        if diff.abs() > band && collateral_ok {
            let result = gateway.resize_fixed_rate(&position.market_id, target).await;
            report.actions.push(line("resize fixed-rate coverage", &result));
        }
    }

    Ok(report)
}

fn line(action: &str, result: &Result<String, VenueError>) -> String {
    match result {
        Ok(message) => format!("[safety] {action} ok: {message}"),
        Err(e) => format!("[safety] {action} failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{PaperGateway, PaperState};
    use delta_vault_core::{FixedRatePosition, PendingWithdrawal, Venue};
    use rust_decimal_macros::dec;

    fn gateway_with(spot_units: Decimal, hedge_margin: Decimal, hedge_size: Decimal) -> PaperGateway {
        let gateway = PaperGateway::new(PaperState::funded(Decimal::ZERO, dec!(2000)));
        gateway.update(|s| {
            s.spot.yield_units = spot_units;
            s.hedge.account_value_usd = hedge_margin;
            s.hedge.position_size = hedge_size;
            s.hedge.entry_price = dec!(2000);
        });
        gateway
    }

    #[tokio::test]
    async fn neutral_book_needs_no_repair() {
        let gateway = gateway_with(dec!(0.3), dec!(350), dec!(-0.3));
        let report = run_safety_pass(&gateway, &StrategyConfig::default(), None)
            .await
            .unwrap();
        assert!(report.actions.is_empty());
        assert!(report.escalation.is_none());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn margin_shortfall_is_trimmed_then_resize_retried() {
        // 1200 exposure against a 0.3 short on 300 margin (900 capacity at 3x).
        let gateway = gateway_with(dec!(0.6), dec!(300), dec!(-0.3));

        let report = run_safety_pass(&gateway, &StrategyConfig::default(), None)
            .await
            .unwrap();

        assert!(report.escalation.is_none(), "{report:?}");
        assert_eq!(
            gateway.calls(),
            vec!["resize_hedge", "trim_spot", "resize_hedge"]
        );
        let state = gateway.state();
        assert_eq!(state.spot.yield_units, dec!(0.5));
        assert_eq!(state.hedge.position_size, dec!(-0.5));
        assert!(report.actions[1].contains("trim spot for margin ok"));
    }

    #[tokio::test]
    async fn unrepairable_delta_escalates() {
        let gateway = gateway_with(dec!(0.3), dec!(350), Decimal::ZERO);
        gateway.fail_always("resize_hedge", VenueError::Rejected("market halted".to_string()));

        let report = run_safety_pass(&gateway, &StrategyConfig::default(), None)
            .await
            .unwrap();

        let reason = report.escalation.unwrap();
        assert!(reason.starts_with("delta neutrality broken after repair"));
        assert!(report.actions[0].contains("market halted"));
    }

    #[tokio::test]
    async fn unknown_price_never_escalates() {
        let gateway = gateway_with(dec!(0.3), dec!(350), Decimal::ZERO);
        gateway.update(|s| s.spot.price = Decimal::ZERO);

        let report = run_safety_pass(&gateway, &StrategyConfig::default(), None)
            .await
            .unwrap();

        assert!(report.escalation.is_none());
        assert_eq!(gateway.call_count("resize_hedge"), 0);
    }

    #[tokio::test]
    async fn pending_withdrawal_skips_pass() {
        let gateway = gateway_with(dec!(0.3), dec!(350), Decimal::ZERO);
        gateway.update(|s| {
            s.pending_withdrawal = Some(PendingWithdrawal {
                venue: Venue::Hedge,
                amount_usd: dec!(120),
                initiated_at: Utc::now(),
            });
        });

        let report = run_safety_pass(&gateway, &StrategyConfig::default(), None)
            .await
            .unwrap();

        assert!(report.actions[0].starts_with("safety pass skipped"));
        assert!(report.escalation.is_none());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn idle_spot_is_swept_before_delta_check() {
        let gateway = gateway_with(dec!(0.25), dec!(350), dec!(-0.3));
        gateway.update(|s| s.spot.idle_usd = dec!(100));

        let report = run_safety_pass(&gateway, &StrategyConfig::default(), None)
            .await
            .unwrap();

        assert!(report.escalation.is_none());
        assert_eq!(gateway.calls(), vec!["sweep_spot_idle"]);
        assert_eq!(gateway.state().spot.yield_units, dec!(0.3));
    }

    fn with_fixed_position(gateway: &PaperGateway, collateral: Decimal, notional: Decimal) {
        gateway.update(|s| {
            s.fixed_rate.deposited_collateral_usd = collateral;
            s.fixed_rate.position = Some(FixedRatePosition {
                market_id: "eth-30d".to_string(),
                notional_usd: notional,
                rate: dec!(0.05),
            });
        });
    }

    #[tokio::test]
    async fn under_covered_position_is_resized_to_hedge_notional() {
        let gateway = gateway_with(dec!(0.3), dec!(350), dec!(-0.3));
        with_fixed_position(&gateway, dec!(50), dec!(300));

        let report = run_safety_pass(&gateway, &StrategyConfig::default(), None)
            .await
            .unwrap();

        assert!(report.escalation.is_none());
        assert_eq!(gateway.calls(), vec!["resize_fixed_rate"]);
        assert!(report.actions[0].contains("resize fixed-rate coverage ok"));
        let position = gateway.state().fixed_rate.position.unwrap();
        assert_eq!(position.notional_usd, dec!(600));
    }

    #[tokio::test]
    async fn coverage_waits_when_collateral_is_short() {
        // 600 target needs 30 of collateral at the default 5% ratio.
        let gateway = gateway_with(dec!(0.3), dec!(350), dec!(-0.3));
        with_fixed_position(&gateway, dec!(20), dec!(300));

        let report = run_safety_pass(&gateway, &StrategyConfig::default(), None)
            .await
            .unwrap();

        assert!(report.actions.is_empty());
        assert!(report.escalation.is_none());
        assert_eq!(gateway.call_count("resize_fixed_rate"), 0);
        let position = gateway.state().fixed_rate.position.unwrap();
        assert_eq!(position.notional_usd, dec!(300));
    }

    #[tokio::test]
    async fn failed_coverage_resize_is_reported_without_escalation() {
        let gateway = gateway_with(dec!(0.3), dec!(350), dec!(-0.3));
        with_fixed_position(&gateway, dec!(50), dec!(300));
        gateway.fail_always(
            "resize_fixed_rate",
            VenueError::Unavailable("maturity rollover".to_string()),
        );

        let report = run_safety_pass(&gateway, &StrategyConfig::default(), None)
            .await
            .unwrap();

        assert_eq!(report.actions.len(), 1);
        assert!(report.actions[0].contains("resize fixed-rate coverage failed"));
        assert!(report.actions[0].contains("maturity rollover"));
        assert!(report.escalation.is_none());
    }
}
