//! Observe-plan-act loop engine.
//!
//! One call to [`run_opa_loop`] is one tick. Steps run strictly one after
//! another; after any successful inventory-changing step the loop abandons
//! the rest of the current plan and observes again, so no step ever acts on
//! a snapshot older than the last change it could have caused.

use crate::config::LoopLimits;
use crate::error::TickError;
use crate::plan::Operation;
use crate::plan::PriorityBand;
use crate::traits::{OpaStrategy, StepOutcome};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Why a tick's loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Planner returned no steps.
    Converged,
    /// An iteration executed nothing.
    NoProgress,
    IterationBudget,
    StepBudget,
    /// `should_stop_early` fired.
    EarlyStop(String),
    /// `on_loop_start` short-circuited the tick.
    StartBlocked,
    Fatal(TickError),
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub success: bool,
    /// One line per executed step plus any loop notes.
    pub message: String,
    pub steps_executed: usize,
    pub iterations: usize,
    /// True when a rotation step succeeded during the tick.
    pub rotated: bool,
    pub stop: StopReason,
}

impl TickOutcome {
    /// Outcome for a tick that never reached observation.
    #[must_use]
    pub fn blocked(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            steps_executed: 0,
            iterations: 0,
            rotated: false,
            stop: StopReason::StartBlocked,
        }
    }

    /// Appends lines to the message trail.
    pub fn append_messages<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            if !self.message.is_empty() {
                self.message.push('\n');
            }
            self.message.push_str(line.as_ref());
        }
    }
}

/// Runs one tick of the observe-plan-act loop against `strategy`.
pub async fn run_opa_loop<S>(strategy: &mut S, limits: &LoopLimits) -> TickOutcome
where
    S: OpaStrategy + ?Sized,
{
    if let Some(outcome) = strategy.on_loop_start().await {
        info!(success = outcome.success, message = %outcome.message, "Tick blocked at loop start");
        return outcome;
    }

    let changing: HashSet<Operation> = strategy.inventory_changing_ops().iter().copied().collect();
    let mut messages: Vec<String> = Vec::new();
    let mut total_steps = 0usize;
    let mut iterations = 0usize;
    let mut rotated = false;
    let mut safety_step_failed = false;
    let mut stop = StopReason::IterationBudget;

    for iteration in 0..limits.max_iterations_per_tick {
        iterations = iteration + 1;

        let snapshot = match strategy.observe().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let err = TickError::Observe(format!("{e:#}"));
                error!(iteration, error = %err, "Aborting tick");
                return abort(strategy, messages, total_steps, iterations, rotated, err).await;
            }
        };

        if let Some(reason) = strategy.should_stop_early(&snapshot, iteration) {
            info!(iteration, reason = %reason, "Stopping loop early");
            messages.push(reason.clone());
            stop = StopReason::EarlyStop(reason);
            break;
        }

        let plan = match strategy.plan(&snapshot) {
            Ok(plan) => plan,
            Err(e) => {
                let err = TickError::Plan(format!("{e:#}"));
                error!(iteration, error = %err, "Aborting tick");
                return abort(strategy, messages, total_steps, iterations, rotated, err).await;
            }
        };

        if plan.is_empty() {
            if let Some(note) = plan.message() {
                messages.push(note.to_string());
            }
            debug!(iteration, "Plan empty, converged");
            stop = StopReason::Converged;
            break;
        }

        let remaining = limits.max_total_steps_per_tick.saturating_sub(total_steps);
        let budget = limits.max_steps_per_iteration.min(remaining);
        let mut executed = 0usize;

        for step in plan.steps().iter().take(budget) {
            let op = step.operation();
            let outcome = match strategy.execute_step(step, &snapshot).await {
                Ok(outcome) => outcome,
                Err(e) => StepOutcome::failed(format!("{e:#}")),
            };
            executed += 1;
            total_steps += 1;

            if outcome.success {
                info!(iteration, op = %op, key = %step.key, message = %outcome.message, "Step succeeded");
            } else {
                warn!(iteration, op = %op, key = %step.key, message = %outcome.message, "Step failed");
                if op.band() == PriorityBand::Safety {
                    safety_step_failed = true;
                }
            }
            messages.push(format!(
                "[{op}] {}: {}",
                if outcome.success { "ok" } else { "failed" },
                outcome.message
            ));
            if outcome.success && op.is_rotation() {
                rotated = true;
            }

            strategy.on_step_executed(step, &outcome);

            if outcome.success && changing.contains(&op) {
                debug!(iteration, op = %op, "Inventory changed, re-observing");
                break;
            }
        }

        if executed == 0 {
            stop = StopReason::NoProgress;
            break;
        }
        if total_steps >= limits.max_total_steps_per_tick {
            stop = StopReason::StepBudget;
            break;
        }
    }

    strategy.on_loop_end(&messages, total_steps).await;

    info!(
        iterations,
        steps = total_steps,
        rotated,
        stop = ?stop,
        "Tick loop finished"
    );

    TickOutcome {
        success: !safety_step_failed,
        message: messages.join("\n"),
        steps_executed: total_steps,
        iterations,
        rotated,
        stop,
    }
}

async fn abort<S>(
    strategy: &mut S,
    mut messages: Vec<String>,
    total_steps: usize,
    iterations: usize,
    rotated: bool,
    err: TickError,
) -> TickOutcome
where
    S: OpaStrategy + ?Sized,
{
    messages.push(err.to_string());
    strategy.on_loop_end(&messages, total_steps).await;
    TickOutcome {
        success: false,
        message: messages.join("\n"),
        steps_executed: total_steps,
        iterations,
        rotated,
        stop: StopReason::Fatal(err),
    }
}
