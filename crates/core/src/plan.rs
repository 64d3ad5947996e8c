//! Plan and step types produced by a planning pass.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Priority bands. Lower values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityBand {
    Safety = 0,
    Gas = 5,
    CapitalRouting = 10,
    PositionManagement = 20,
    RatePositionManagement = 30,
}

impl PriorityBand {
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }
}

/// Closed set of actions a plan can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    CloseAndRedeploy,
    TrimSpot,
    TopUpGas,
    FundFixedRate,
    RouteToHedge,
    BridgeToSpot,
    SweepSpotIdle,
    ResizeHedge,
    RotateFixedRateMarket,
    ResizeFixedRate,
}

impl Operation {
    pub const ALL: [Self; 10] = [
        Self::CloseAndRedeploy,
        Self::TrimSpot,
        Self::TopUpGas,
        Self::FundFixedRate,
        Self::RouteToHedge,
        Self::BridgeToSpot,
        Self::SweepSpotIdle,
        Self::ResizeHedge,
        Self::RotateFixedRateMarket,
        Self::ResizeFixedRate,
    ];

    #[must_use]
    pub const fn band(self) -> PriorityBand {
        match self {
            Self::CloseAndRedeploy | Self::TrimSpot => PriorityBand::Safety,
            Self::TopUpGas => PriorityBand::Gas,
            Self::FundFixedRate | Self::RouteToHedge | Self::BridgeToSpot | Self::SweepSpotIdle => {
                PriorityBand::CapitalRouting
            }
            Self::ResizeHedge => PriorityBand::PositionManagement,
            Self::RotateFixedRateMarket | Self::ResizeFixedRate => {
                PriorityBand::RatePositionManagement
            }
        }
    }

    #[must_use]
    pub const fn priority(self) -> u8 {
        self.band().value()
    }

    /// Rotation steps roll capital from one external market into another.
    #[must_use]
    pub const fn is_rotation(self) -> bool {
        matches!(self, Self::RotateFixedRateMarket)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CloseAndRedeploy => "close_and_redeploy",
            Self::TrimSpot => "trim_spot",
            Self::TopUpGas => "top_up_gas",
            Self::FundFixedRate => "fund_fixed_rate",
            Self::RouteToHedge => "route_to_hedge",
            Self::BridgeToSpot => "bridge_to_spot",
            Self::SweepSpotIdle => "sweep_spot_idle",
            Self::ResizeHedge => "resize_hedge",
            Self::RotateFixedRateMarket => "rotate_fixed_rate_market",
            Self::ResizeFixedRate => "resize_fixed_rate",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operating mode selected from risk progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mode {
    Normal,
    Trim,
    Redeploy,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Trim => write!(f, "TRIM"),
            Self::Redeploy => write!(f, "REDEPLOY"),
        }
    }
}

/// What caused a full close-and-redeploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedeployTrigger {
    LiquidationDetected,
    RiskThreshold,
}

/// Parameters for each operation. One variant per [`Operation`], carrying
/// exactly the fields its handler needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepAction {
    CloseAndRedeploy {
        trigger: RedeployTrigger,
    },
    TrimSpot {
        usd: Decimal,
    },
    TopUpGas {
        amount: Decimal,
    },
    FundFixedRate {
        usd: Decimal,
    },
    RouteToHedge {
        usd: Decimal,
    },
    BridgeToSpot {
        usd: Decimal,
    },
    SweepSpotIdle {
        usd: Decimal,
        units: Decimal,
    },
    ResizeHedge {
        current_size: Decimal,
        target_size: Decimal,
    },
    RotateFixedRateMarket {
        from_market: String,
        to_market: String,
        notional_usd: Decimal,
    },
    ResizeFixedRate {
        market_id: String,
        current_notional_usd: Decimal,
        target_notional_usd: Decimal,
    },
}

impl StepAction {
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::CloseAndRedeploy { .. } => Operation::CloseAndRedeploy,
            Self::TrimSpot { .. } => Operation::TrimSpot,
            Self::TopUpGas { .. } => Operation::TopUpGas,
            Self::FundFixedRate { .. } => Operation::FundFixedRate,
            Self::RouteToHedge { .. } => Operation::RouteToHedge,
            Self::BridgeToSpot { .. } => Operation::BridgeToSpot,
            Self::SweepSpotIdle { .. } => Operation::SweepSpotIdle,
            Self::ResizeHedge { .. } => Operation::ResizeHedge,
            Self::RotateFixedRateMarket { .. } => Operation::RotateFixedRateMarket,
            Self::ResizeFixedRate { .. } => Operation::ResizeFixedRate,
        }
    }
}

/// A single prioritized action within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub action: StepAction,
    pub priority: u8,
    /// Unique within a plan; a second step with the same key is dropped.
    pub key: String,
    pub reason: String,
}

impl PlanStep {
    /// Creates a step keyed by its operation, at the operation's band priority.
    #[must_use]
    pub fn new(action: StepAction, reason: impl Into<String>) -> Self {
        let op = action.operation();
        Self {
            key: op.as_str().to_string(),
            priority: op.priority(),
            action,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.action.operation()
    }
}

/// Per-venue USD targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueTargets {
    pub spot: Decimal,
    pub hedge: Decimal,
    pub fixed_rate: Decimal,
}

impl VenueTargets {
    #[must_use]
    pub fn sum(&self) -> Decimal {
        self.spot + self.hedge + self.fixed_rate
    }
}

/// Target state the planner steers toward during one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub mode: Mode,
    pub targets: VenueTargets,
    /// Signed hedge size (negative is short).
    pub target_hedge_size: Decimal,
    pub target_fixed_rate_notional_usd: Decimal,
    pub selected_market: Option<String>,
}

/// Accumulates steps for one planning pass, dropping duplicate keys.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    steps: Vec<PlanStep>,
    keys: HashSet<String>,
}

impl PlanBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step unless one with the same key is already present.
    /// Returns `true` if the step was added.
    pub fn push(&mut self, step: PlanStep) -> bool {
        if !self.keys.insert(step.key.clone()) {
            tracing::debug!(key = %step.key, "duplicate plan step ignored");
            return false;
        }
        self.steps.push(step);
        true
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sorts by priority (stable, so insertion order breaks ties) and freezes the plan.
    #[must_use]
    pub fn build(mut self, desired: Option<DesiredState>, message: Option<String>) -> Plan {
        self.steps.sort_by_key(|s| s.priority);
        Plan {
            steps: self.steps,
            desired,
            message,
        }
    }
}

/// Ordered, deduplicated steps for one planning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
    desired: Option<DesiredState>,
    message: Option<String>,
}

impl Plan {
    /// A plan with no steps, explaining why nothing is to be done.
    #[must_use]
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            desired: None,
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub const fn desired(&self) -> Option<&DesiredState> {
        self.desired.as_ref()
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}
