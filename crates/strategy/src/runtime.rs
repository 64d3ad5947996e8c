//! Mutable planner state that outlives a single planning pass.
//!
//! Only the planner and the strategy's tick-boundary hooks touch this. Its
//! fields are private and its mutators crate-private; hosts can create one
//! and start a tick, nothing more.

use chrono::{DateTime, Utc};
use delta_vault_core::{Operation, PlanStep};
use rust_decimal::Decimal;
use std::collections::HashSet;

/// Balances the planner may spend from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerBucket {
    WalletIdle,
    SpotIdle,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    bucket: LedgerBucket,
    key: String,
    amount: Decimal,
    /// Inventory reading the commitment was planned against.
    baseline: Decimal,
    executed: bool,
}

/// Capital earmarked by steps within the current tick.
///
/// `available = inventory - committed`, clamped at zero. Commitments whose
/// steps were never executed are released before the next planning pass.
/// Executed ones stay until a reading shows the balance has actually
/// dropped by them, because venue balance reads can lag settlement.
#[derive(Debug, Clone, Default)]
pub struct VirtualLedger {
    entries: Vec<LedgerEntry>,
}

impl VirtualLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn committed(&self, bucket: LedgerBucket) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.bucket == bucket)
            .map(|e| e.amount)
            .sum()
    }

    /// Amount still committed under `key`.
    #[must_use]
    pub fn outstanding(&self, key: &str) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.key == key)
            .map(|e| e.amount)
            .sum()
    }

    #[must_use]
    pub fn available(&self, bucket: LedgerBucket, inventory: Decimal) -> Decimal {
        (inventory - self.committed(bucket)).max(Decimal::ZERO)
    }

    /// Earmarks `amount` of `bucket` for the step `key`, planned against an
    /// inventory reading of `baseline`. Non-positive amounts are ignored.
    pub fn commit(
        &mut self,
        bucket: LedgerBucket,
        key: impl Into<String>,
        amount: Decimal,
        baseline: Decimal,
    ) {
        if amount <= Decimal::ZERO {
            return;
        }
        self.entries.push(LedgerEntry {
            bucket,
            key: key.into(),
            amount,
            baseline,
            executed: false,
        });
    }

    /// Marks the commitments of step `key` as spent.
    pub fn mark_executed(&mut self, key: &str) {
        for entry in self.entries.iter_mut().filter(|e| e.key == key) {
            entry.executed = true;
        }
    }

    /// Drops commitments from steps that never ran.
    pub fn release_unexecuted(&mut self) {
        self.entries.retain(|e| e.executed);
    }

    /// Drops executed commitments that a fresh `inventory` reading already
    /// reflects. Commitments planned against the same reading settle
    /// cumulatively, in commit order.
    pub fn settle(&mut self, bucket: LedgerBucket, inventory: Decimal) {
        let mut group: Option<Decimal> = None;
        let mut drawn = Decimal::ZERO;
        self.entries.retain(|e| {
            if e.bucket != bucket || !e.executed {
                return true;
            }
            if group != Some(e.baseline) {
                group = Some(e.baseline);
                drawn = Decimal::ZERO;
            }
            drawn += e.amount;
            inventory > e.baseline - drawn
        });
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

/// Actions attempted at most once per tick, whether or not they succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum OneShot {
    FixedRateFunded,
    GasToppedUp,
}

impl OneShot {
    const fn for_operation(op: Operation) -> Option<Self> {
        match op {
            Operation::FundFixedRate => Some(Self::FixedRateFunded),
            Operation::TopUpGas => Some(Self::GasToppedUp),
            _ => None,
        }
    }
}

/// Current external market choice, kept across ticks for hysteresis.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MarketSelection {
    pub market_id: String,
    pub rate: Decimal,
    pub selected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PlannerRuntime {
    selection: Option<MarketSelection>,
    ledger: VirtualLedger,
    one_shots: HashSet<OneShot>,
    ticks_started: u64,
}

impl PlannerRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears everything scoped to a tick. Market selection survives.
    pub fn begin_tick(&mut self) {
        self.ledger.reset();
        self.one_shots.clear();
        self.ticks_started += 1;
    }

    #[must_use]
    pub fn selected_market_id(&self) -> Option<&str> {
        self.selection.as_ref().map(|s| s.market_id.as_str())
    }

    #[must_use]
    pub const fn ticks_started(&self) -> u64 {
        self.ticks_started
    }

    pub(crate) const fn selection(&self) -> Option<&MarketSelection> {
        self.selection.as_ref()
    }

    pub(crate) fn set_selection(&mut self, selection: Option<MarketSelection>) {
        self.selection = selection;
    }

    pub(crate) fn ledger(&self) -> &VirtualLedger {
        &self.ledger
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut VirtualLedger {
        &mut self.ledger
    }

    pub(crate) fn one_shot_taken(&self, flag: OneShot) -> bool {
        self.one_shots.contains(&flag)
    }

    /// Records that a planned step ran. Only successful steps keep their
    /// ledger commitments past the next planning pass.
    pub(crate) fn step_executed(&mut self, step: &PlanStep, success: bool) {
        if let Some(flag) = OneShot::for_operation(step.operation()) {
            self.one_shots.insert(flag);
        }
        if success {
            self.ledger.mark_executed(&step.key);
        }
    }
}
