//! Core types and the observe-plan-act loop for delta-neutral capital allocation.
//!
//! - [`snapshot`]: immutable inventory view across the wallet and venues
//! - [`plan`]: operations, priority bands, steps, and the deduplicating plan builder
//! - [`traits`]: the [`OpaStrategy`] contract the loop drives
//! - [`engine`]: the loop itself, with budgets and the re-observation rule
//! - [`config`], [`config_loader`], [`config_watcher`]: strategy configuration
//! - [`poll`]: bounded settlement polling

pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod engine;
pub mod error;
pub mod plan;
pub mod poll;
pub mod snapshot;
pub mod telemetry;
pub mod traits;

pub use config::{
    AllocationConfig, FailsafeConfig, GasConfig, LoopLimits, MarketSelectionConfig, RiskConfig,
    StrategyConfig, ToleranceConfig,
};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use engine::{run_opa_loop, StopReason, TickOutcome};
pub use error::{ConfigError, TickError};
pub use plan::{
    DesiredState, Mode, Operation, Plan, PlanBuilder, PlanStep, PriorityBand, RedeployTrigger,
    StepAction, VenueTargets,
};
pub use poll::{poll_until, PollStatus};
pub use snapshot::{
    FixedRatePosition, FixedRateVenueState, HedgeFill, HedgeVenueState, InventorySnapshot,
    MarketQuote, PendingWithdrawal, SpotVenueState, Venue, WalletState,
};
pub use traits::{OpaStrategy, StepOutcome};
