//! Delta-neutral capital allocation across a spot venue, a perpetual hedge
//! venue and a fixed-rate venue.
//!
//! [`DeltaNeutralStrategy`] implements [`delta_vault_core::OpaStrategy`] and
//! exposes a single [`tick`](DeltaNeutralStrategy::tick) entry point. Venues
//! are reached only through [`VenueGateway`]; [`PaperGateway`] simulates them
//! in memory.

pub mod allocation;
pub mod dispatch;
pub mod failsafe;
pub mod gateway;
pub mod market_select;
pub mod observe;
pub mod paper;
pub mod planner;
pub mod risk;
pub mod runtime;
pub mod safety;
pub mod strategy;

pub use allocation::{AllocationStatus, VenueAllocation};
pub use dispatch::StepDispatcher;
pub use failsafe::{liquidate_all, LiquidationReport, RiskState, RiskStateMachine};
pub use gateway::{VenueError, VenueGateway, VenueResult};
pub use observe::{observe_inventory, Observation};
pub use paper::{PaperGateway, PaperState};
pub use planner::plan;
pub use runtime::{LedgerBucket, PlannerRuntime, VirtualLedger};
pub use safety::{run_safety_pass, DeltaBreach, SafetyReport};
pub use strategy::DeltaNeutralStrategy;
