//! In-memory venue simulator.

use crate::gateway::{VenueError, VenueGateway, VenueResult};
use async_trait::async_trait;
use chrono::Utc;
use delta_vault_core::{
    FixedRatePosition, FixedRateVenueState, HedgeFill, HedgeVenueState, MarketQuote,
    PendingWithdrawal, RedeployTrigger, SpotVenueState, WalletState,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};

/// Simulated balances and positions across the wallet and all three venues.
#[derive(Debug, Clone)]
pub struct PaperState {
    pub wallet: WalletState,
    pub spot: SpotVenueState,
    pub hedge: HedgeVenueState,
    pub fixed_rate: FixedRateVenueState,
    pub pending_withdrawal: Option<PendingWithdrawal>,
    pub fills: Vec<HedgeFill>,
    pub candidates: Vec<MarketQuote>,
    /// Leverage above which hedge orders are refused for margin.
    pub max_leverage: Decimal,
    /// Collateral required per USD of fixed-rate notional.
    pub collateral_ratio: Decimal,
    /// USD cost of one native gas unit.
    pub gas_price_usd: Decimal,
}

impl PaperState {
    /// A wallet holding `usd` at an asset price of `price`, nothing deployed.
    #[must_use]
    pub fn funded(usd: Decimal, price: Decimal) -> Self {
        Self {
            wallet: WalletState {
                idle_usd: usd,
                gas_balance: dec!(0.03),
            },
            spot: SpotVenueState {
                price,
                ..Default::default()
            },
            hedge: HedgeVenueState {
                mark_price: price,
                ..Default::default()
            },
            fixed_rate: FixedRateVenueState::default(),
            pending_withdrawal: None,
            fills: Vec::new(),
            candidates: Vec::new(),
            max_leverage: dec!(3),
            collateral_ratio: dec!(0.05),
            gas_price_usd: dec!(2000),
        }
    }

    #[must_use]
    pub fn with_candidates(mut self, candidates: Vec<MarketQuote>) -> Self {
        self.candidates = candidates;
        self
    }

    fn price(&self) -> Decimal {
        self.spot.price
    }

    fn debit_wallet(&mut self, usd: Decimal) -> VenueResult<()> {
        if usd <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!("non-positive amount {usd}")));
        }
        if usd > self.wallet.idle_usd {
            return Err(VenueError::InsufficientBalance(format!(
                "wallet holds {}, asked for {usd}",
                self.wallet.idle_usd
            )));
        }
        self.wallet.idle_usd -= usd;
        Ok(())
    }

    fn set_hedge_size(&mut self, target: Decimal) {
        let price = self.price();
        let hedge = &mut self.hedge;
        let current = hedge.position_size;
        if target.is_zero() {
            hedge.entry_price = Decimal::ZERO;
        } else if current.is_zero() || current.is_sign_negative() != target.is_sign_negative() {
            hedge.entry_price = price;
        } else if target.abs() > current.abs() {
            hedge.entry_price =
                (current.abs() * hedge.entry_price + (target.abs() - current.abs()) * price)
                    / target.abs();
        }
        hedge.position_size = target;
        hedge.mark_price = price;
        self.refresh_hedge();
    }

    fn refresh_hedge(&mut self) {
        let max_leverage = self.max_leverage;
        let hedge = &mut self.hedge;
        let size = hedge.position_size;
        hedge.unrealized_pnl = (hedge.mark_price - hedge.entry_price) * size;
        if size.is_zero() {
            hedge.liquidation_price = None;
            hedge.unrealized_pnl = Decimal::ZERO;
        } else {
            // Equity is gone once the mark has moved account / |size| against us.
            let cushion = hedge.account_value_usd.max(Decimal::ZERO) / size.abs();
            hedge.liquidation_price = Some(if size < Decimal::ZERO {
                hedge.mark_price + cushion
            } else {
                (hedge.mark_price - cushion).max(Decimal::ZERO)
            });
        }
        let used = hedge.notional_usd() / max_leverage;
        hedge.idle_margin_usd = (hedge.account_value_usd - used).max(Decimal::ZERO);
    }

    fn sell_spot_units(&mut self, units: Decimal) -> Decimal {
        let from_idle = units.min(self.spot.idle_units);
        self.spot.idle_units -= from_idle;
        let from_yield = (units - from_idle).min(self.spot.yield_units);
        self.spot.yield_units -= from_yield;
        (from_idle + from_yield) * self.price()
    }
}

/// Venue gateway that simulates every action against a [`PaperState`].
///
/// # Safety
///
/// Makes **zero** external calls. Every balance lives in memory, so it is
/// impossible to move real capital through this gateway.
///
/// Failures can be injected per call name (`"resize_hedge"`,
/// `"route_to_hedge"`, ...), either for the next call only or for every call.
/// Every action is appended to a call log.
pub struct PaperGateway {
    state: Mutex<PaperState>,
    fail_next: Mutex<HashMap<String, VecDeque<VenueError>>>,
    fail_always: Mutex<HashMap<String, VenueError>>,
    calls: Mutex<Vec<String>>,
}

impl PaperGateway {
    #[must_use]
    pub fn new(state: PaperState) -> Self {
        Self {
            state: Mutex::new(state),
            fail_next: Mutex::new(HashMap::new()),
            fail_always: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> PaperState {
        self.state.lock().clone()
    }

    /// Mutates the simulated state directly, as an outside event would.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut PaperState),
    {
        let mut state = self.state.lock();
        f(&mut state);
        state.refresh_hedge();
    }

    /// Moves the asset price, marking the hedge to market.
    pub fn set_price(&self, price: Decimal) {
        let mut state = self.state.lock();
        let pnl = (price - state.hedge.mark_price) * state.hedge.position_size;
        state.hedge.account_value_usd += pnl;
        state.spot.price = price;
        state.hedge.mark_price = price;
        state.refresh_hedge();
    }

    /// The venue force-closes the hedge and keeps what margin is left.
    pub fn force_liquidate_hedge(&self) {
        let mut state = self.state.lock();
        let size = state.hedge.position_size;
        let price = state.price();
        state.fills.push(HedgeFill {
            filled_at: Utc::now(),
            size: -size,
            price,
            is_liquidation: true,
        });
        state.hedge.account_value_usd = (state.hedge.account_value_usd / dec!(10)).round_dp(2);
        state.set_hedge_size(Decimal::ZERO);
    }

    pub fn fail_next(&self, call: &str, error: VenueError) {
        self.fail_next
            .lock()
            .entry(call.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn fail_always(&self, call: &str, error: VenueError) {
        self.fail_always.lock().insert(call.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.fail_next.lock().clear();
        self.fail_always.lock().clear();
    }

    /// Names of the actions invoked so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }

    /// Logs the call, applies any injected failure, then runs `apply`.
    fn act<F>(&self, call: &str, apply: F) -> VenueResult
    where
        F: FnOnce(&mut PaperState) -> VenueResult,
    {
        self.calls.lock().push(call.to_string());
        if let Some(error) = self
            .fail_next
            .lock()
            .get_mut(call)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if let Some(error) = self.fail_always.lock().get(call) {
            return Err(error.clone());
        }
        let mut state = self.state.lock();
        let result = apply(&mut state);
        state.refresh_hedge();
        result
    }
}

#[async_trait]
impl VenueGateway for PaperGateway {
    async fn wallet_state(&self) -> anyhow::Result<WalletState> {
        Ok(self.state.lock().wallet.clone())
    }

    async fn spot_state(&self) -> anyhow::Result<SpotVenueState> {
        Ok(self.state.lock().spot.clone())
    }

    async fn hedge_state(&self) -> anyhow::Result<HedgeVenueState> {
        Ok(self.state.lock().hedge.clone())
    }

    async fn fixed_rate_state(&self) -> anyhow::Result<FixedRateVenueState> {
        Ok(self.state.lock().fixed_rate.clone())
    }

    async fn pending_withdrawal(&self) -> anyhow::Result<Option<PendingWithdrawal>> {
        Ok(self.state.lock().pending_withdrawal.clone())
    }

    async fn recent_hedge_fills(&self) -> anyhow::Result<Vec<HedgeFill>> {
        Ok(self.state.lock().fills.clone())
    }

    async fn market_candidates(&self, _underlying: &str) -> anyhow::Result<Vec<MarketQuote>> {
        Ok(self.state.lock().candidates.clone())
    }

    async fn close_and_redeploy(&self, trigger: RedeployTrigger) -> VenueResult {
        self.act("close_and_redeploy", |s| {
            s.set_hedge_size(Decimal::ZERO);
            let hedge_cash = s.hedge.account_value_usd.max(Decimal::ZERO);
            s.hedge.account_value_usd = Decimal::ZERO;

            let units = s.spot.exposure_units();
            let spot_cash = s.sell_spot_units(units) + s.spot.idle_usd;
            s.spot.idle_usd = Decimal::ZERO;

            let fixed_cash = s.fixed_rate.value_usd();
            s.fixed_rate = FixedRateVenueState::default();

            let total = hedge_cash + spot_cash + fixed_cash;
            s.wallet.idle_usd += total;
            Ok(format!("closed all venues ({trigger:?}), {} back in wallet", total.round_dp(2)))
        })
    }

    async fn trim_spot(&self, usd: Decimal) -> VenueResult {
        self.act("trim_spot", |s| {
            if s.price() <= Decimal::ZERO {
                return Err(VenueError::Rejected("spot price unknown".to_string()));
            }
            let units = (usd / s.price()).min(s.spot.exposure_units());
            let proceeds = s.sell_spot_units(units);
            s.hedge.account_value_usd += proceeds;
            let size = s.hedge.position_size;
            let reduced = if size < Decimal::ZERO {
                (size + units).min(Decimal::ZERO)
            } else {
                (size - units).max(Decimal::ZERO)
            };
            s.set_hedge_size(reduced);
            Ok(format!("trimmed {units} units, {} to hedge margin", proceeds.round_dp(2)))
        })
    }

    async fn top_up_gas(&self, amount: Decimal) -> VenueResult {
        self.act("top_up_gas", |s| {
            let cost = amount * s.gas_price_usd;
            s.debit_wallet(cost)?;
            s.wallet.gas_balance += amount;
            Ok(format!("bought {amount} gas for {}", cost.round_dp(2)))
        })
    }

    async fn fund_fixed_rate(&self, usd: Decimal) -> VenueResult {
        self.act("fund_fixed_rate", |s| {
            s.debit_wallet(usd)?;
            s.fixed_rate.deposited_collateral_usd += usd;
            Ok(format!("deposited {usd} collateral"))
        })
    }

    async fn route_to_hedge(&self, usd: Decimal) -> VenueResult {
        self.act("route_to_hedge", |s| {
            s.debit_wallet(usd)?;
            s.hedge.account_value_usd += usd;
            Ok(format!("routed {usd} to hedge margin"))
        })
    }

    async fn bridge_to_spot(&self, usd: Decimal) -> VenueResult {
        self.act("bridge_to_spot", |s| {
            s.debit_wallet(usd)?;
            s.spot.idle_usd += usd;
            Ok(format!("bridged {usd} to spot venue"))
        })
    }

    async fn sweep_spot_idle(&self, usd: Decimal, units: Decimal) -> VenueResult {
        self.act("sweep_spot_idle", |s| {
            let usd = usd.min(s.spot.idle_usd).max(Decimal::ZERO);
            if usd > Decimal::ZERO && s.price() <= Decimal::ZERO {
                return Err(VenueError::Rejected("spot price unknown".to_string()));
            }
            let bought = if usd > Decimal::ZERO { usd / s.price() } else { Decimal::ZERO };
            let moved = units.min(s.spot.idle_units).max(Decimal::ZERO);
            s.spot.idle_usd -= usd;
            s.spot.idle_units -= moved;
            s.spot.yield_units += bought + moved;
            Ok(format!("swept {usd} and {moved} units into yield position"))
        })
    }

    async fn resize_hedge(&self, target_size: Decimal) -> VenueResult {
        self.act("resize_hedge", |s| {
            if s.price() <= Decimal::ZERO {
                return Err(VenueError::Rejected("mark price unknown".to_string()));
            }
            let notional = target_size.abs() * s.price();
            let capacity = s.hedge.account_value_usd.max(Decimal::ZERO) * s.max_leverage;
            if notional > capacity {
                return Err(VenueError::InsufficientMargin(format!(
                    "{} notional exceeds {} capacity",
                    notional.round_dp(2),
                    capacity.round_dp(2)
                )));
            }
            let from = s.hedge.position_size;
            s.set_hedge_size(target_size);
            Ok(format!("hedge {from} -> {target_size}"))
        })
    }

    async fn rotate_fixed_rate(
        &self,
        from_market: &str,
        to_market: &str,
        notional_usd: Decimal,
    ) -> VenueResult {
        self.act("rotate_fixed_rate", |s| {
            let rate = s
                .candidates
                .iter()
                .find(|q| q.market_id == to_market)
                .map(|q| q.mid_rate)
                .ok_or_else(|| VenueError::Rejected(format!("unknown market {to_market}")))?;
            match s.fixed_rate.position.as_mut() {
                Some(position) if position.market_id == from_market => {
                    position.market_id = to_market.to_string();
                    position.notional_usd = notional_usd;
                    position.rate = rate;
                    Ok(format!("rolled {notional_usd} from {from_market} to {to_market}"))
                }
                _ => Err(VenueError::Rejected(format!("no position on {from_market}"))),
            }
        })
    }

    async fn resize_fixed_rate(&self, market_id: &str, target_notional_usd: Decimal) -> VenueResult {
        self.act("resize_fixed_rate", |s| {
            let required = target_notional_usd * s.collateral_ratio;
            let collateral = s.fixed_rate.value_usd();
            if required > collateral {
                return Err(VenueError::InsufficientBalance(format!(
                    "{} collateral needed, {} available",
                    required.round_dp(2),
                    collateral.round_dp(2)
                )));
            }
            let rate = s
                .candidates
                .iter()
                .find(|q| q.market_id == market_id)
                .map_or(Decimal::ZERO, |q| q.mid_rate);
            s.fixed_rate.position = (target_notional_usd > Decimal::ZERO).then(|| FixedRatePosition {
                market_id: market_id.to_string(),
                notional_usd: target_notional_usd,
                rate,
            });
            Ok(format!("{market_id} notional now {}", target_notional_usd.round_dp(2)))
        })
    }

    async fn close_hedge(&self) -> VenueResult {
        self.act("close_hedge", |s| {
            let from = s.hedge.position_size;
            s.set_hedge_size(Decimal::ZERO);
            Ok(format!("closed hedge of {from}"))
        })
    }

    async fn close_fixed_rate(&self) -> VenueResult {
        self.act("close_fixed_rate", |s| {
            let cash = s.fixed_rate.value_usd();
            s.fixed_rate = FixedRateVenueState::default();
            s.wallet.idle_usd += cash;
            Ok(format!("withdrew {} collateral", cash.round_dp(2)))
        })
    }

    async fn unwind_spot(&self) -> VenueResult {
        self.act("unwind_spot", |s| {
            let units = s.spot.exposure_units();
            let cash = s.sell_spot_units(units) + s.spot.idle_usd;
            s.spot.idle_usd = Decimal::ZERO;
            s.wallet.idle_usd += cash;
            Ok(format!("sold {units} units for {}", cash.round_dp(2)))
        })
    }
}
