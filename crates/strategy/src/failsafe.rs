//! Risk state tracking and the one-way failsafe liquidation.

use crate::gateway::{VenueError, VenueGateway};
use anyhow::{Context, Result};
use delta_vault_core::{poll_until, FailsafeConfig, Mode, PollStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskState {
    Normal,
    Trim,
    Redeploy,
    /// Terminal until an operator clears it.
    FailsafeLiquidating,
}

impl From<Mode> for RiskState {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Normal => Self::Normal,
            Mode::Trim => Self::Trim,
            Mode::Redeploy => Self::Redeploy,
        }
    }
}

#[derive(Debug)]
pub struct RiskStateMachine {
    state: RiskState,
    failsafe_reason: Option<String>,
}

impl Default for RiskStateMachine {
    fn default() -> Self {
        Self {
            state: RiskState::Normal,
            failsafe_reason: None,
        }
    }
}

impl RiskStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> RiskState {
        self.state
    }

    #[must_use]
    pub const fn is_failsafe(&self) -> bool {
        matches!(self.state, RiskState::FailsafeLiquidating)
    }

    #[must_use]
    pub fn failsafe_reason(&self) -> Option<&str> {
        self.failsafe_reason.as_deref()
    }

    /// Follows the planner's mode. Ignored once the failsafe has latched.
    pub fn observe_mode(&mut self, mode: Mode) {
        if self.is_failsafe() {
            return;
        }
        let next = RiskState::from(mode);
        if next != self.state {
            info!(from = ?self.state, to = ?next, "Risk state transition");
            self.state = next;
        }
    }

    /// Latches the failsafe. The first reason is kept.
    pub fn trigger_failsafe(&mut self, reason: impl Into<String>) {
        if self.is_failsafe() {
            return;
        }
        let reason = reason.into();
        error!(from = ?self.state, reason = %reason, "Failsafe triggered");
        self.state = RiskState::FailsafeLiquidating;
        self.failsafe_reason = Some(reason);
    }

    /// Operator reset.
    pub fn clear(&mut self) {
        if let Some(reason) = self.failsafe_reason.take() {
            warn!(reason = %reason, "Failsafe cleared by operator");
        }
        self.state = RiskState::Normal;
    }
}

/// What a failsafe liquidation achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationReport {
    pub hedge: Result<String, VenueError>,
    pub fixed_rate: Result<String, VenueError>,
    pub spot: Result<String, VenueError>,
    /// False when the hedge still showed a position at the deadline.
    pub hedge_flat: bool,
}

impl LiquidationReport {
    #[must_use]
    pub fn summary(&self) -> String {
        let leg = |name: &str, r: &Result<String, VenueError>| match r {
            Ok(m) => format!("{name} closed: {m}"),
            Err(e) => format!("{name} close failed: {e}"),
        };
        let mut lines = vec![
            leg("hedge", &self.hedge),
            leg("fixed-rate", &self.fixed_rate),
            leg("spot", &self.spot),
        ];
        if !self.hedge_flat {
            lines.push("hedge settlement still pending".to_string());
        }
        lines.join("; ")
    }
}

/// Closes every venue position concurrently, then waits for the hedge to
/// read flat.
///
/// # Errors
///
/// Returns an error only if reading the hedge while polling fails. Venue
/// failures on the individual closes are reported in the
/// [`LiquidationReport`].
pub async fn liquidate_all<G>(gateway: &G, config: &FailsafeConfig) -> Result<LiquidationReport>
where
    G: VenueGateway + ?Sized,
{
    warn!("Liquidating all venue positions");
    let (hedge, fixed_rate, spot) = tokio::join!(
        gateway.close_hedge(),
        gateway.close_fixed_rate(),
        gateway.unwind_spot(),
    );

    let interval = Duration::from_millis(config.settlement_poll_interval_ms);
    let deadline = Duration::from_secs(config.settlement_deadline_secs);
    let status = poll_until(interval, deadline, || async {
        let hedge = gateway
            .hedge_state()
            .await
            .context("reading hedge during liquidation")?;
        Ok::<_, anyhow::Error>((hedge.position_size == Decimal::ZERO).then_some(()))
    })
    .await?;

    let hedge_flat = match status {
        PollStatus::Settled(()) => true,
        PollStatus::Pending { waited } => {
            warn!(waited = ?waited, "Hedge not flat by deadline");
            false
        }
    };

    let report = LiquidationReport {
        hedge,
        fixed_rate,
        spot,
        hedge_flat,
    };
    info!(summary = %report.summary(), "Liquidation finished");
    Ok(report)
}
