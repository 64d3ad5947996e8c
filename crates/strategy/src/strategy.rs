//! The delta-neutral allocation strategy driven by the observe-plan-act loop.

use crate::dispatch::StepDispatcher;
use crate::failsafe::{liquidate_all, RiskState, RiskStateMachine};
use crate::gateway::VenueGateway;
use crate::observe::observe_inventory;
use crate::planner;
use crate::risk;
use crate::runtime::PlannerRuntime;
use crate::safety::run_safety_pass;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delta_vault_core::{
    run_opa_loop, InventorySnapshot, OpaStrategy, Operation, PendingWithdrawal, Plan, PlanStep,
    StepOutcome, StopReason, StrategyConfig, TickError, TickOutcome,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Operations after which the snapshot is stale. Gas is bought with wallet
/// capital, so a top-up invalidates the wallet reading too.
const INVENTORY_CHANGING: [Operation; 8] = [
    Operation::CloseAndRedeploy,
    Operation::TrimSpot,
    Operation::TopUpGas,
    Operation::FundFixedRate,
    Operation::RouteToHedge,
    Operation::BridgeToSpot,
    Operation::SweepSpotIdle,
    Operation::ResizeHedge,
];

/// Keeps capital split across the spot, hedge and fixed-rate venues with the
/// hedge offsetting spot exposure.
///
/// The host calls [`tick`](Self::tick) on its own cadence and never runs two
/// ticks at once. All cross-tick state (planner runtime, risk state, the
/// last acknowledged liquidation) lives here.
pub struct DeltaNeutralStrategy<G: VenueGateway> {
    config: StrategyConfig,
    config_updates: Option<watch::Receiver<StrategyConfig>>,
    dispatcher: StepDispatcher<G>,
    runtime: PlannerRuntime,
    risk: RiskStateMachine,
    /// Newest forced-liquidation fill already handled by a redeploy.
    liquidation_ack: Option<DateTime<Utc>>,
    /// Liquidation fill seen by the latest observation.
    observed_liquidation: Option<DateTime<Utc>>,
    /// Withdrawal that blocked a previous tick.
    pending_withdrawal: Option<PendingWithdrawal>,
}

impl<G: VenueGateway> DeltaNeutralStrategy<G> {
    #[must_use]
    pub fn new(gateway: Arc<G>, config: StrategyConfig) -> Self {
        Self::with_dispatcher(StepDispatcher::with_all_handlers(gateway), config)
    }

    #[must_use]
    pub fn with_dispatcher(dispatcher: StepDispatcher<G>, config: StrategyConfig) -> Self {
        Self {
            config,
            config_updates: None,
            dispatcher,
            runtime: PlannerRuntime::new(),
            risk: RiskStateMachine::new(),
            liquidation_ack: None,
            observed_liquidation: None,
            pending_withdrawal: None,
        }
    }

    /// Applies configuration published on `updates` at the next tick boundary.
    #[must_use]
    pub fn with_config_updates(mut self, updates: watch::Receiver<StrategyConfig>) -> Self {
        self.config_updates = Some(updates);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &StrategyConfig {
        &self.config
    }

    #[must_use]
    pub const fn runtime(&self) -> &PlannerRuntime {
        &self.runtime
    }

    #[must_use]
    pub const fn risk_state(&self) -> RiskState {
        self.risk.state()
    }

    #[must_use]
    pub const fn is_failsafe(&self) -> bool {
        self.risk.is_failsafe()
    }

    #[must_use]
    pub fn failsafe_reason(&self) -> Option<&str> {
        self.risk.failsafe_reason()
    }

    /// Operator reset after a failsafe liquidation.
    pub fn clear_failsafe(&mut self) {
        self.risk.clear();
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<G> {
        self.dispatcher.gateway()
    }

    /// Runs one tick: the loop, then the safety pass, escalating to a full
    /// liquidation if delta neutrality cannot be restored.
    pub async fn tick(&mut self) -> TickOutcome {
        self.refresh_config();
        let limits = self.config.limits.clone();

        let mut outcome = run_opa_loop(self, &limits).await;
        if !outcome.success
            || outcome.stop == StopReason::StartBlocked
            || self.pending_withdrawal.is_some()
        {
            return outcome;
        }

        let gateway = Arc::clone(self.dispatcher.gateway());
        match run_safety_pass(gateway.as_ref(), &self.config, self.liquidation_ack).await {
            Ok(report) => {
                outcome.append_messages(&report.actions);
                if let Some(reason) = report.escalation {
                    self.escalate(reason, &mut outcome).await;
                }
            }
            Err(e) => {
                let detail = format!("{e:#}");
                error!(error = %detail, "Safety pass could not observe");
                outcome.append_messages([format!("safety pass aborted: {detail}")]);
                outcome.success = false;
            }
        }
        outcome
    }

    async fn escalate(&mut self, reason: String, outcome: &mut TickOutcome) {
        self.risk.trigger_failsafe(reason.clone());
        let trail = std::mem::replace(&mut outcome.message, format!("failsafe: {reason}"));
        if !trail.is_empty() {
            outcome.append_messages([trail]);
        }

        let gateway = Arc::clone(self.dispatcher.gateway());
        match liquidate_all(gateway.as_ref(), &self.config.failsafe).await {
            Ok(report) => outcome.append_messages([format!("liquidation: {}", report.summary())]),
            Err(e) => outcome.append_messages([format!("liquidation incomplete: {e:#}")]),
        }
        outcome.success = false;
        outcome.stop = StopReason::Fatal(TickError::FailsafeActive(reason));
    }

    fn refresh_config(&mut self) {
        let Some(updates) = self.config_updates.as_mut() else {
            return;
        };
        if updates.has_changed().unwrap_or(false) {
            let config = updates.borrow_and_update().clone();
            info!("Applying updated strategy config");
            self.config = config;
        }
    }
}

#[async_trait]
impl<G: VenueGateway> OpaStrategy for DeltaNeutralStrategy<G> {
    async fn observe(&mut self) -> Result<InventorySnapshot> {
        let observation = observe_inventory(
            self.dispatcher.gateway().as_ref(),
            &self.config.market.underlying,
            self.liquidation_ack,
        )
        .await?;
        self.observed_liquidation = observation.liquidation_fill_at;
        Ok(observation.snapshot)
    }

    fn plan(&mut self, snapshot: &InventorySnapshot) -> Result<Plan> {
        let progress = risk::risk_progress(snapshot.hedge());
        self.risk
            .observe_mode(risk::select_mode(progress, &self.config.risk));
        Ok(planner::plan(snapshot, &self.config, &mut self.runtime))
    }

    async fn execute_step(
        &mut self,
        step: &PlanStep,
        snapshot: &InventorySnapshot,
    ) -> Result<StepOutcome> {
        Ok(self.dispatcher.dispatch(step, snapshot).await)
    }

    fn inventory_changing_ops(&self) -> &[Operation] {
        &INVENTORY_CHANGING
    }

    async fn on_loop_start(&mut self) -> Option<TickOutcome> {
        if let Some(reason) = self.risk.failsafe_reason() {
            return Some(TickOutcome::blocked(
                false,
                format!("failsafe active: {reason}"),
            ));
        }

        self.runtime.begin_tick();

        let known = self.pending_withdrawal.as_ref()?;
        match self.dispatcher.gateway().pending_withdrawal().await {
            Ok(Some(pending)) => {
                let message = format!(
                    "withdrawal of ${} from {} still pending; holding",
                    pending.amount_usd.round_dp(2),
                    pending.venue
                );
                self.pending_withdrawal = Some(pending);
                Some(TickOutcome::blocked(true, message))
            }
            Ok(None) => {
                info!(amount = %known.amount_usd, "Pending withdrawal settled");
                self.pending_withdrawal = None;
                None
            }
            Err(e) => Some(TickOutcome::blocked(
                false,
                format!("could not confirm withdrawal status: {e:#}"),
            )),
        }
    }

    fn on_step_executed(&mut self, step: &PlanStep, outcome: &StepOutcome) {
        self.runtime.step_executed(step, outcome.success);
        if outcome.success && step.operation() == Operation::CloseAndRedeploy {
            if let Some(at) = self.observed_liquidation.take() {
                info!(filled_at = %at, "Liquidation acknowledged");
                self.liquidation_ack = Some(at);
            }
        }
    }

    fn should_stop_early(
        &mut self,
        snapshot: &InventorySnapshot,
        _iteration: usize,
    ) -> Option<String> {
        let pending = snapshot.pending_withdrawal()?;
        warn!(amount = %pending.amount_usd, venue = %pending.venue, "Withdrawal pending, holding");
        let reason = format!(
            "withdrawal of ${} from {} pending; holding",
            pending.amount_usd.round_dp(2),
            pending.venue
        );
        self.pending_withdrawal = Some(pending.clone());
        Some(reason)
    }

    async fn on_loop_end(&mut self, messages: &[String], total_steps: usize) {
        info!(
            steps = total_steps,
            lines = messages.len(),
            risk_state = ?self.risk.state(),
            "Tick finished"
        );
    }
}
