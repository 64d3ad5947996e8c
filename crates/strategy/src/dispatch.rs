//! Static mapping from plan steps to venue actions.

use crate::gateway::{VenueGateway, VenueResult};
use delta_vault_core::{InventorySnapshot, Operation, PlanStep, StepAction, StepOutcome};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes plan steps against a [`VenueGateway`].
///
/// Every step returns a [`StepOutcome`]; venue failures never escape as
/// errors. Operations can be unregistered to run with a reduced capability
/// set, in which case their steps fail without touching the venues.
pub struct StepDispatcher<G: VenueGateway> {
    gateway: Arc<G>,
    handlers: HashSet<Operation>,
}

impl<G: VenueGateway> StepDispatcher<G> {
    /// Dispatcher with a handler for every operation.
    #[must_use]
    pub fn with_all_handlers(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            handlers: Operation::ALL.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn without_handler(mut self, op: Operation) -> Self {
        self.handlers.remove(&op);
        self
    }

    #[must_use]
    pub fn handles(&self, op: Operation) -> bool {
        self.handlers.contains(&op)
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub async fn dispatch(&self, step: &PlanStep, snapshot: &InventorySnapshot) -> StepOutcome {
        let op = step.operation();
        if !self.handles(op) {
            warn!(op = %op, key = %step.key, "No handler registered");
            return StepOutcome::failed(format!("no handler registered for {op}"));
        }

        debug!(op = %op, key = %step.key, reason = %step.reason, "Dispatching step");
        let result = self.run(&step.action, snapshot).await;
        match result {
            Ok(message) => StepOutcome::ok(message),
            Err(e) => StepOutcome::failed(e.to_string()),
        }
    }

    async fn run(&self, action: &StepAction, snapshot: &InventorySnapshot) -> VenueResult {
        let g = &*self.gateway;
        match action {
            StepAction::CloseAndRedeploy { trigger } => g.close_and_redeploy(*trigger).await,
            StepAction::TrimSpot { usd } => g.trim_spot(*usd).await,
            StepAction::TopUpGas { amount } => g.top_up_gas(*amount).await,
            StepAction::FundFixedRate { usd } => {
                g.fund_fixed_rate(clamp_to_wallet(*usd, snapshot)).await
            }
            StepAction::RouteToHedge { usd } => {
                g.route_to_hedge(clamp_to_wallet(*usd, snapshot)).await
            }
            StepAction::BridgeToSpot { usd } => {
                g.bridge_to_spot(clamp_to_wallet(*usd, snapshot)).await
            }
            StepAction::SweepSpotIdle { usd, units } => g.sweep_spot_idle(*usd, *units).await,
            StepAction::ResizeHedge { target_size, .. } => g.resize_hedge(*target_size).await,
            StepAction::RotateFixedRateMarket {
                from_market,
                to_market,
                notional_usd,
            } => {
                g.rotate_fixed_rate(from_market, to_market, *notional_usd)
                    .await
            }
            StepAction::ResizeFixedRate {
                market_id,
                target_notional_usd,
                ..
            } => g.resize_fixed_rate(market_id, *target_notional_usd).await,
        }
    }
}

/// Routing never moves more than the wallet held when the step was planned.
fn clamp_to_wallet(usd: Decimal, snapshot: &InventorySnapshot) -> Decimal {
    usd.min(snapshot.wallet().idle_usd.max(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::VenueError;
    use async_trait::async_trait;
    use chrono::Utc;
    use delta_vault_core::{
        FixedRateVenueState, HedgeFill, HedgeVenueState, MarketQuote, PendingWithdrawal,
        RedeployTrigger, SpotVenueState, WalletState,
    };
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    /// Records every action call; `resize_hedge` always lacks margin.
    #[derive(Default)]
    struct MockGateway {
        calls: Mutex<Vec<String>>,
    }

    impl MockGateway {
        fn record(&self, call: String) -> VenueResult {
            self.calls.lock().push(call.clone());
            Ok(call)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl VenueGateway for MockGateway {
        async fn wallet_state(&self) -> anyhow::Result<WalletState> {
            Ok(WalletState::default())
        }
        async fn spot_state(&self) -> anyhow::Result<SpotVenueState> {
            Ok(SpotVenueState::default())
        }
        async fn hedge_state(&self) -> anyhow::Result<HedgeVenueState> {
            Ok(HedgeVenueState::default())
        }
        async fn fixed_rate_state(&self) -> anyhow::Result<FixedRateVenueState> {
            Ok(FixedRateVenueState::default())
        }
        async fn pending_withdrawal(&self) -> anyhow::Result<Option<PendingWithdrawal>> {
            Ok(None)
        }
        async fn recent_hedge_fills(&self) -> anyhow::Result<Vec<HedgeFill>> {
            Ok(Vec::new())
        }
        async fn market_candidates(&self, _underlying: &str) -> anyhow::Result<Vec<MarketQuote>> {
            Ok(Vec::new())
        }
        async fn close_and_redeploy(&self, trigger: RedeployTrigger) -> VenueResult {
            self.record(format!("close_and_redeploy {trigger:?}"))
        }
        async fn trim_spot(&self, usd: Decimal) -> VenueResult {
            self.record(format!("trim_spot {usd}"))
        }
        async fn top_up_gas(&self, amount: Decimal) -> VenueResult {
            self.record(format!("top_up_gas {amount}"))
        }
        async fn fund_fixed_rate(&self, usd: Decimal) -> VenueResult {
            self.record(format!("fund_fixed_rate {usd}"))
        }
        async fn route_to_hedge(&self, usd: Decimal) -> VenueResult {
            self.record(format!("route_to_hedge {usd}"))
        }
        async fn bridge_to_spot(&self, usd: Decimal) -> VenueResult {
            self.record(format!("bridge_to_spot {usd}"))
        }
        async fn sweep_spot_idle(&self, usd: Decimal, units: Decimal) -> VenueResult {
            self.record(format!("sweep_spot_idle {usd} {units}"))
        }
        async fn resize_hedge(&self, target_size: Decimal) -> VenueResult {
            self.calls.lock().push(format!("resize_hedge {target_size}"));
            Err(VenueError::InsufficientMargin("account 100, need 300".to_string()))
        }
        async fn rotate_fixed_rate(&self, from: &str, to: &str, notional: Decimal) -> VenueResult {
            self.record(format!("rotate {from}->{to} {notional}"))
        }
        async fn resize_fixed_rate(&self, market_id: &str, target: Decimal) -> VenueResult {
            self.record(format!("resize_fixed_rate {market_id} {target}"))
        }
        async fn close_hedge(&self) -> VenueResult {
            self.record("close_hedge".to_string())
        }
        async fn close_fixed_rate(&self) -> VenueResult {
            self.record("close_fixed_rate".to_string())
        }
        async fn unwind_spot(&self) -> VenueResult {
            self.record("unwind_spot".to_string())
        }
    }

    fn snapshot(wallet_idle: Decimal) -> InventorySnapshot {
        InventorySnapshot::new(
            Utc::now(),
            WalletState {
                idle_usd: wallet_idle,
                gas_balance: dec!(0.03),
            },
            SpotVenueState::default(),
            HedgeVenueState::default(),
            FixedRateVenueState::default(),
        )
    }

    #[tokio::test]
    async fn routes_each_action_to_its_gateway_call() {
        let gateway = Arc::new(MockGateway::default());
        let dispatcher = StepDispatcher::with_all_handlers(Arc::clone(&gateway));
        let snap = snapshot(dec!(1000));

        let steps = [
            PlanStep::new(StepAction::FundFixedRate { usd: dec!(50) }, "fund"),
            PlanStep::new(
                StepAction::RotateFixedRateMarket {
                    from_market: "old".to_string(),
                    to_market: "new".to_string(),
                    notional_usd: dec!(600),
                },
                "rotate",
            ),
            PlanStep::new(
                StepAction::CloseAndRedeploy {
                    trigger: RedeployTrigger::RiskThreshold,
                },
                "risk",
            ),
        ];
        for step in &steps {
            assert!(dispatcher.dispatch(step, &snap).await.success);
        }

        assert_eq!(
            gateway.calls(),
            vec![
                "fund_fixed_rate 50".to_string(),
                "rotate old->new 600".to_string(),
                "close_and_redeploy RiskThreshold".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn venue_error_becomes_failed_outcome() {
        let gateway = Arc::new(MockGateway::default());
        let dispatcher = StepDispatcher::with_all_handlers(Arc::clone(&gateway));
        let step = PlanStep::new(
            StepAction::ResizeHedge {
                current_size: dec!(-0.1),
                target_size: dec!(-0.3),
            },
            "delta",
        );

        let outcome = dispatcher.dispatch(&step, &snapshot(dec!(0))).await;

        assert!(!outcome.success);
        assert!(outcome.message.starts_with("insufficient margin"));
    }

    #[tokio::test]
    async fn unregistered_operation_fails_without_venue_call() {
        let gateway = Arc::new(MockGateway::default());
        let dispatcher = StepDispatcher::with_all_handlers(Arc::clone(&gateway))
            .without_handler(Operation::BridgeToSpot);
        let step = PlanStep::new(StepAction::BridgeToSpot { usd: dec!(100) }, "bridge");

        let outcome = dispatcher.dispatch(&step, &snapshot(dec!(1000))).await;

        assert!(!outcome.success);
        assert!(outcome.message.contains("no handler registered"));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn routing_is_clamped_to_observed_wallet() {
        let gateway = Arc::new(MockGateway::default());
        let dispatcher = StepDispatcher::with_all_handlers(Arc::clone(&gateway));
        let step = PlanStep::new(StepAction::RouteToHedge { usd: dec!(350) }, "route");

        dispatcher.dispatch(&step, &snapshot(dec!(200))).await;

        assert_eq!(gateway.calls(), vec!["route_to_hedge 200".to_string()]);
    }
}
