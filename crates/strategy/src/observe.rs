//! Snapshot assembly from concurrent venue reads.

use crate::gateway::VenueGateway;
use crate::risk;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use delta_vault_core::InventorySnapshot;
use tracing::{debug, warn};

/// A snapshot plus the liquidation fill that flagged it, if any.
#[derive(Debug, Clone)]
pub struct Observation {
    pub snapshot: InventorySnapshot,
    /// Timestamp of the newest unacknowledged forced-liquidation fill.
    pub liquidation_fill_at: Option<DateTime<Utc>>,
}

/// Reads every venue at once and builds a snapshot.
///
/// Fills at or before `liquidation_ack` were already handled and do not flag
/// the snapshot again.
///
/// # Errors
///
/// Returns an error if any venue read fails. No partial snapshot is built.
pub async fn observe_inventory<G>(
    gateway: &G,
    underlying: &str,
    liquidation_ack: Option<DateTime<Utc>>,
) -> Result<Observation>
where
    G: VenueGateway + ?Sized,
{
    let (wallet, spot, hedge, fixed_rate, pending, fills, candidates) = tokio::try_join!(
        async { gateway.wallet_state().await.context("reading wallet") },
        async { gateway.spot_state().await.context("reading spot venue") },
        async { gateway.hedge_state().await.context("reading hedge venue") },
        async { gateway.fixed_rate_state().await.context("reading fixed-rate venue") },
        async {
            gateway
                .pending_withdrawal()
                .await
                .context("reading pending withdrawals")
        },
        async {
            gateway
                .recent_hedge_fills()
                .await
                .context("reading hedge fills")
        },
        async {
            gateway
                .market_candidates(underlying)
                .await
                .with_context(|| format!("reading {underlying} market candidates"))
        },
    )?;

    let liquidation_fill_at =
        risk::detect_forced_liquidation(&fills, liquidation_ack).map(|f| f.filled_at);
    if let Some(at) = liquidation_fill_at {
        warn!(filled_at = %at, "Unacknowledged forced liquidation on hedge venue");
    }

    let snapshot = InventorySnapshot::new(gateway.now(), wallet, spot, hedge, fixed_rate)
        .with_pending_withdrawal(pending)
        .with_liquidation_detected(liquidation_fill_at.is_some())
        .with_market_candidates(candidates);

    debug!(
        total_value = %snapshot.total_value(),
        total_exposure = %snapshot.total_exposure(),
        candidates = snapshot.market_candidates().len(),
        "Observed inventory"
    );

    Ok(Observation {
        snapshot,
        liquidation_fill_at,
    })
}
