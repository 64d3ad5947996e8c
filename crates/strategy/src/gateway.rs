//! Boundary to the external venues.
//!
//! Reads return `anyhow::Result` because a failed read aborts the tick.
//! Actions return [`VenueResult`]: venue-reported failures are values, and
//! the dispatcher turns them into failed step outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delta_vault_core::{
    FixedRateVenueState, HedgeFill, HedgeVenueState, MarketQuote, PendingWithdrawal,
    RedeployTrigger, SpotVenueState, WalletState,
};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failure reported by a venue for an action it was asked to perform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VenueError {
    /// The hedge account lacks margin for the requested size.
    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// The venue refused the request outright.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Accepted but not settled before the call's own deadline.
    #[error("pending: {0}")]
    Pending(String),

    #[error("venue unavailable: {0}")]
    Unavailable(String),
}

/// Result of a venue action. `Ok` carries a human-readable summary.
pub type VenueResult<T = String> = Result<T, VenueError>;

#[async_trait]
pub trait VenueGateway: Send + Sync {
    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    async fn wallet_state(&self) -> anyhow::Result<WalletState>;

    async fn spot_state(&self) -> anyhow::Result<SpotVenueState>;

    async fn hedge_state(&self) -> anyhow::Result<HedgeVenueState>;

    async fn fixed_rate_state(&self) -> anyhow::Result<FixedRateVenueState>;

    /// Cross-venue withdrawal in flight, if any.
    async fn pending_withdrawal(&self) -> anyhow::Result<Option<PendingWithdrawal>>;

    /// Recent fills on the hedge venue, newest last.
    async fn recent_hedge_fills(&self) -> anyhow::Result<Vec<HedgeFill>>;

    async fn market_candidates(&self, underlying: &str) -> anyhow::Result<Vec<MarketQuote>>;

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Closes every position and returns capital to the wallet for redeployment.
    async fn close_and_redeploy(&self, trigger: RedeployTrigger) -> VenueResult;

    /// Sells `usd` of spot together with the matching hedge, freeing margin.
    async fn trim_spot(&self, usd: Decimal) -> VenueResult;

    async fn top_up_gas(&self, amount: Decimal) -> VenueResult;

    async fn fund_fixed_rate(&self, usd: Decimal) -> VenueResult;

    async fn route_to_hedge(&self, usd: Decimal) -> VenueResult;

    async fn bridge_to_spot(&self, usd: Decimal) -> VenueResult;

    /// Converts idle spot-venue balance and idle units to the yield-bearing form.
    async fn sweep_spot_idle(&self, usd: Decimal, units: Decimal) -> VenueResult;

    /// Sets the hedge to `target_size` (signed, negative is short).
    async fn resize_hedge(&self, target_size: Decimal) -> VenueResult;

    async fn rotate_fixed_rate(
        &self,
        from_market: &str,
        to_market: &str,
        notional_usd: Decimal,
    ) -> VenueResult;

    async fn resize_fixed_rate(&self, market_id: &str, target_notional_usd: Decimal) -> VenueResult;

    // ------------------------------------------------------------------
    // Failsafe
    // ------------------------------------------------------------------

    async fn close_hedge(&self) -> VenueResult;

    async fn close_fixed_rate(&self) -> VenueResult;

    async fn unwind_spot(&self) -> VenueResult;

    /// Time as the venues see it. Defaults to the local clock.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
