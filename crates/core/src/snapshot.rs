//! Point-in-time inventory across the wallet and the three venues.
//!
//! A snapshot is produced once per observation and never mutated. The
//! aggregate figures (`total_value`, `total_exposure`) are derived in the
//! constructor and have no setters, so they can never drift from the
//! per-venue readings they summarise.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// External venue holding part of the portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    /// Yield-bearing spot position.
    Spot,
    /// Perpetual hedge venue.
    Hedge,
    /// Fixed-rate collateral venue.
    FixedRate,
}

impl Venue {
    pub const ALL: [Self; 3] = [Self::Spot, Self::Hedge, Self::FixedRate];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Hedge => "hedge",
            Self::FixedRate => "fixed_rate",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Balances held on the primary chain wallet, not yet routed to any venue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletState {
    /// Idle stablecoin balance in USD.
    pub idle_usd: Decimal,
    /// Native gas token balance (in native units).
    pub gas_balance: Decimal,
}

/// Spot venue readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotVenueState {
    /// Idle stablecoin sitting on the spot venue.
    pub idle_usd: Decimal,
    /// Asset units held in yield-bearing form.
    pub yield_units: Decimal,
    /// Asset units held but not yet converted to the yield-bearing form.
    pub idle_units: Decimal,
    /// Asset price in USD. `Decimal::ZERO` means the price is unknown.
    pub price: Decimal,
}

impl SpotVenueState {
    /// Total asset units the hedge must offset.
    #[must_use]
    pub fn exposure_units(&self) -> Decimal {
        (self.yield_units + self.idle_units).max(Decimal::ZERO)
    }

    #[must_use]
    pub fn exposure_usd(&self) -> Decimal {
        self.exposure_units() * self.price.max(Decimal::ZERO)
    }

    #[must_use]
    pub fn value_usd(&self) -> Decimal {
        (self.idle_usd.max(Decimal::ZERO) + self.exposure_usd()).max(Decimal::ZERO)
    }

    #[must_use]
    pub fn price_known(&self) -> bool {
        self.price > Decimal::ZERO
    }
}

/// Hedge venue readings. `position_size` is signed: negative is short.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HedgeVenueState {
    /// Account equity including unrealized P&L.
    pub account_value_usd: Decimal,
    /// Margin not currently backing the position.
    pub idle_margin_usd: Decimal,
    pub position_size: Decimal,
    pub entry_price: Decimal,
    /// Mark price. `Decimal::ZERO` means the price is unknown.
    pub mark_price: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
}

impl HedgeVenueState {
    #[must_use]
    pub fn notional_usd(&self) -> Decimal {
        self.position_size.abs() * self.mark_price.max(Decimal::ZERO)
    }

    #[must_use]
    pub fn is_short(&self) -> bool {
        self.position_size < Decimal::ZERO
    }

    #[must_use]
    pub fn value_usd(&self) -> Decimal {
        self.account_value_usd.max(Decimal::ZERO)
    }
}

/// Open position on the fixed-rate venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedRatePosition {
    pub market_id: String,
    pub notional_usd: Decimal,
    pub rate: Decimal,
}

/// Fixed-rate venue readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedRateVenueState {
    /// Collateral deposited and backing positions.
    pub deposited_collateral_usd: Decimal,
    /// Collateral on the venue but not yet deposited.
    pub idle_collateral_usd: Decimal,
    /// Funds sent toward the venue that have not settled yet.
    pub in_flight_usd: Decimal,
    pub position: Option<FixedRatePosition>,
}

impl FixedRateVenueState {
    #[must_use]
    pub fn value_usd(&self) -> Decimal {
        self.deposited_collateral_usd.max(Decimal::ZERO)
            + self.idle_collateral_usd.max(Decimal::ZERO)
            + self.in_flight_usd.max(Decimal::ZERO)
    }

    /// Collateral usable for sizing positions, counting funds still in flight.
    #[must_use]
    pub fn available_collateral_usd(&self) -> Decimal {
        self.value_usd()
    }

    #[must_use]
    pub fn position_notional_usd(&self) -> Decimal {
        self.position
            .as_ref()
            .map_or(Decimal::ZERO, |p| p.notional_usd.max(Decimal::ZERO))
    }
}

/// Cross-venue withdrawal that has been initiated but not settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWithdrawal {
    pub venue: Venue,
    pub amount_usd: Decimal,
    pub initiated_at: DateTime<Utc>,
}

/// Candidate market on the fixed-rate venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub market_id: String,
    pub tenor_days: u32,
    pub mid_rate: Decimal,
    pub best_bid_rate: Decimal,
    pub best_ask_rate: Decimal,
    pub collateral_id: String,
}

/// Fill reported by the hedge venue's recent-fills history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeFill {
    pub filled_at: DateTime<Utc>,
    pub size: Decimal,
    pub price: Decimal,
    /// Set when the venue forcibly closed the position.
    pub is_liquidation: bool,
}

/// Immutable view of balances and positions across every venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventorySnapshot {
    observed_at: DateTime<Utc>,
    wallet: WalletState,
    spot: SpotVenueState,
    hedge: HedgeVenueState,
    fixed_rate: FixedRateVenueState,
    pending_withdrawal: Option<PendingWithdrawal>,
    liquidation_detected: bool,
    market_candidates: Vec<MarketQuote>,
    total_value: Decimal,
    total_exposure: Decimal,
}

impl InventorySnapshot {
    #[must_use]
    pub fn new(
        observed_at: DateTime<Utc>,
        wallet: WalletState,
        spot: SpotVenueState,
        hedge: HedgeVenueState,
        fixed_rate: FixedRateVenueState,
    ) -> Self {
        let total_value = wallet.idle_usd.max(Decimal::ZERO)
            + spot.value_usd()
            + hedge.value_usd()
            + fixed_rate.value_usd();
        let total_exposure = spot.exposure_usd() + hedge.notional_usd();

        Self {
            observed_at,
            wallet,
            spot,
            hedge,
            fixed_rate,
            pending_withdrawal: None,
            liquidation_detected: false,
            market_candidates: Vec::new(),
            total_value,
            total_exposure,
        }
    }

    #[must_use]
    pub fn with_pending_withdrawal(mut self, pending: Option<PendingWithdrawal>) -> Self {
        self.pending_withdrawal = pending;
        self
    }

    #[must_use]
    pub fn with_liquidation_detected(mut self, detected: bool) -> Self {
        self.liquidation_detected = detected;
        self
    }

    #[must_use]
    pub fn with_market_candidates(mut self, candidates: Vec<MarketQuote>) -> Self {
        self.market_candidates = candidates;
        self
    }

    #[must_use]
    pub const fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    #[must_use]
    pub const fn wallet(&self) -> &WalletState {
        &self.wallet
    }

    #[must_use]
    pub const fn spot(&self) -> &SpotVenueState {
        &self.spot
    }

    #[must_use]
    pub const fn hedge(&self) -> &HedgeVenueState {
        &self.hedge
    }

    #[must_use]
    pub const fn fixed_rate(&self) -> &FixedRateVenueState {
        &self.fixed_rate
    }

    #[must_use]
    pub const fn pending_withdrawal(&self) -> Option<&PendingWithdrawal> {
        self.pending_withdrawal.as_ref()
    }

    #[must_use]
    pub const fn liquidation_detected(&self) -> bool {
        self.liquidation_detected
    }

    #[must_use]
    pub fn market_candidates(&self) -> &[MarketQuote] {
        &self.market_candidates
    }

    /// Sum of every balance the portfolio owns, in USD. Never negative.
    #[must_use]
    pub const fn total_value(&self) -> Decimal {
        self.total_value
    }

    /// Gross notional exposure (spot plus absolute hedge), in USD. Never negative.
    #[must_use]
    pub const fn total_exposure(&self) -> Decimal {
        self.total_exposure
    }

    /// Value attributed to a single venue.
    #[must_use]
    pub fn venue_value(&self, venue: Venue) -> Decimal {
        match venue {
            Venue::Spot => self.spot.value_usd(),
            Venue::Hedge => self.hedge.value_usd(),
            Venue::FixedRate => self.fixed_rate.value_usd(),
        }
    }

    /// Capital held in the wallet and not attributed to any venue.
    #[must_use]
    pub fn unallocated_usd(&self) -> Decimal {
        self.wallet.idle_usd.max(Decimal::ZERO)
    }
}
