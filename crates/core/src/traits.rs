use crate::engine::TickOutcome;
use crate::plan::{Operation, Plan, PlanStep};
use crate::snapshot::InventorySnapshot;
use anyhow::Result;
use async_trait::async_trait;

/// Result of executing one plan step. Handlers report venue failures here
/// instead of returning errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    pub message: String,
}

impl StepOutcome {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A strategy driven by the observe-plan-act loop.
///
/// The four required methods supply state, decisions and actions; the hooks
/// default to no-ops.
#[async_trait]
pub trait OpaStrategy: Send {
    /// Takes a fresh snapshot. An error aborts the tick.
    async fn observe(&mut self) -> Result<InventorySnapshot>;

    /// Turns a snapshot into a prioritized plan. An error aborts the tick.
    fn plan(&mut self, snapshot: &InventorySnapshot) -> Result<Plan>;

    /// Performs one step. An `Err` is converted into a failed [`StepOutcome`]
    /// by the loop and never aborts the tick.
    async fn execute_step(
        &mut self,
        step: &PlanStep,
        snapshot: &InventorySnapshot,
    ) -> Result<StepOutcome>;

    /// Operations whose success invalidates the current snapshot.
    fn inventory_changing_ops(&self) -> &[Operation];

    /// Runs before the first observation. Returning an outcome ends the tick immediately.
    async fn on_loop_start(&mut self) -> Option<TickOutcome> {
        None
    }

    fn on_step_executed(&mut self, _step: &PlanStep, _outcome: &StepOutcome) {}

    /// Returning a reason stops the loop after observation, before planning.
    fn should_stop_early(
        &mut self,
        _snapshot: &InventorySnapshot,
        _iteration: usize,
    ) -> Option<String> {
        None
    }

    async fn on_loop_end(&mut self, _messages: &[String], _total_steps: usize) {}
}
