//! Hierarchical spend ledger for one task.
//!
//! # Invariants
//! - `spent` never decreases (spend is strictly additive, no refunds)
//! - a fresh sub-ledger never receives more than `total - spent - reserve`
//!   as measured at allocation time
//! - the reserve is never handed out by `allocate`

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

/// Default share of the total withheld from allocation.
pub const DEFAULT_RESERVE_PERCENT: f64 = 10.0;

/// Usage fractions at which a warning is emitted.
const WARNING_THRESHOLDS: [f64; 2] = [0.80, 0.90];

/// A ledger shared between the orchestrator, its agents and budget queries.
pub type SharedBudget = Arc<RwLock<BudgetManager>>;

/// Budget tracked against one running agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubLedger {
    pub allocated: f64,
    pub spent: f64,
}

impl SubLedger {
    /// Allocation not yet consumed (never negative).
    pub fn unspent(&self) -> f64 {
        (self.allocated - self.spent).max(0.0)
    }
}

/// Notification emitted by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BudgetEvent {
    /// Spend was recorded against a sub-ledger.
    Spend {
        ledger_id: String,
        amount_usd: f64,
        spent_usd: f64,
        remaining_usd: f64,
    },
    /// Cumulative usage crossed a warning band on this spend.
    Warning {
        threshold_percent: u8,
        spent_usd: f64,
        total_usd: f64,
    },
    /// Global spend reached the total.
    Exhausted { spent_usd: f64, total_usd: f64 },
}

/// Point-in-time view of a ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub total: f64,
    pub spent: f64,
    pub remaining: f64,
    pub per_agent: BTreeMap<String, SubLedger>,
}

/// One global ceiling, per-agent sub-allocations, spend recording,
/// threshold warnings and reclamation.
#[derive(Debug)]
pub struct BudgetManager {
    total: f64,
    spent: f64,
    reserve_percent: f64,
    ledgers: HashMap<String, SubLedger>,
    events: broadcast::Sender<BudgetEvent>,
}

impl BudgetManager {
    /// Create a ledger for `total_usd` with the default 10% reserve.
    ///
    /// Negative or non-finite totals are treated as zero.
    pub fn new(total_usd: f64) -> Self {
        let total = if total_usd.is_finite() {
            total_usd.max(0.0)
        } else {
            0.0
        };
        let (events, _) = broadcast::channel(256);
        Self {
            total,
            spent: 0.0,
            reserve_percent: DEFAULT_RESERVE_PERCENT,
            ledgers: HashMap::new(),
            events,
        }
    }

    /// Override the reserve percentage (clamped to `[0, 100]`).
    pub fn with_reserve_percent(mut self, percent: f64) -> Self {
        self.reserve_percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            DEFAULT_RESERVE_PERCENT
        };
        self
    }

    /// Wrap this ledger for sharing across agents.
    pub fn into_shared(self) -> SharedBudget {
        Arc::new(RwLock::new(self))
    }

    /// Subscribe to spend, warning and exhaustion notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BudgetEvent> {
        self.events.subscribe()
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }

    pub fn reserve_percent(&self) -> f64 {
        self.reserve_percent
    }

    /// Amount permanently withheld from allocation.
    pub fn reserve(&self) -> f64 {
        self.total * self.reserve_percent / 100.0
    }

    /// Unspent part of the total.
    ///
    /// # Property
    /// `remaining() == max(0, total - spent)`
    pub fn remaining(&self) -> f64 {
        (self.total - self.spent).max(0.0)
    }

    /// Amount a new allocation may receive.
    ///
    /// # Property
    /// `headroom() == max(0, total - spent - reserve)`
    pub fn headroom(&self) -> f64 {
        (self.total - self.spent - self.reserve()).max(0.0)
    }

    /// Cumulative spend as a fraction of the total (0 when the total is 0).
    pub fn usage_fraction(&self) -> f64 {
        if self.total > 0.0 {
            self.spent / self.total
        } else {
            0.0
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.spent >= self.total
    }

    /// Sub-ledger currently registered for `id`, if any.
    pub fn ledger(&self, id: &str) -> Option<SubLedger> {
        self.ledgers.get(id).copied()
    }

    /// Register a fresh sub-ledger for `id`.
    ///
    /// # Postconditions
    /// - `result <= requested`
    /// - `result <= max(0, total - spent - reserve)`
    ///
    /// Allocating an id twice overwrites the earlier sub-ledger.
    pub fn allocate(&mut self, id: &str, requested: f64) -> f64 {
        let requested = if requested.is_finite() {
            requested.max(0.0)
        } else {
            0.0
        };
        let granted = requested.min(self.headroom());

        if self.ledgers.contains_key(id) {
            tracing::warn!(ledger = %id, "Re-allocating an active sub-ledger; previous allocation dropped");
        }
        self.ledgers.insert(
            id.to_string(),
            SubLedger {
                allocated: granted,
                spent: 0.0,
            },
        );

        tracing::debug!(
            ledger = %id,
            requested,
            granted,
            headroom = self.headroom(),
            "Allocated sub-budget"
        );
        granted
    }

    /// Record spend against the global total and `id`'s sub-ledger.
    ///
    /// Returns `false` once the global total is exhausted.
    pub fn record_spend(&mut self, id: &str, amount: f64) -> bool {
        let amount = if amount.is_finite() {
            amount.max(0.0)
        } else {
            0.0
        };
        let previous = self.spent;
        self.spent += amount;
        if let Some(ledger) = self.ledgers.get_mut(id) {
            ledger.spent += amount;
        }

        let _ = self.events.send(BudgetEvent::Spend {
            ledger_id: id.to_string(),
            amount_usd: amount,
            spent_usd: self.spent,
            remaining_usd: self.remaining(),
        });

        for threshold in WARNING_THRESHOLDS {
            let line = self.total * threshold;
            if previous < line && self.spent >= line {
                let threshold_percent = (threshold * 100.0).round() as u8;
                tracing::warn!(
                    spent = self.spent,
                    total = self.total,
                    "Budget usage crossed {}%",
                    threshold_percent
                );
                let _ = self.events.send(BudgetEvent::Warning {
                    threshold_percent,
                    spent_usd: self.spent,
                    total_usd: self.total,
                });
            }
        }

        if self.is_exhausted() {
            tracing::warn!(spent = self.spent, total = self.total, "Budget exhausted");
            let _ = self.events.send(BudgetEvent::Exhausted {
                spent_usd: self.spent,
                total_usd: self.total,
            });
            return false;
        }
        true
    }

    /// Advisory check: `id` is under its allocation and the total is not exhausted.
    pub fn can_spend(&self, id: &str) -> bool {
        match self.ledgers.get(id) {
            Some(ledger) => ledger.spent < ledger.allocated && self.spent < self.total,
            None => false,
        }
    }

    /// Drop `id`'s sub-ledger and return its unspent allocation to the pool.
    ///
    /// Global `spent` is untouched. Unknown ids return 0 and change nothing.
    pub fn release(&mut self, id: &str) -> f64 {
        match self.ledgers.remove(id) {
            Some(ledger) => {
                let unspent = ledger.unspent();
                tracing::debug!(ledger = %id, unspent, "Released sub-budget");
                unspent
            }
            None => 0.0,
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            total: self.total,
            spent: self.spent,
            remaining: self.remaining(),
            per_agent: self
                .ledgers
                .iter()
                .map(|(id, ledger)| (id.clone(), *ledger))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn drain(rx: &mut broadcast::Receiver<BudgetEvent>) -> Vec<BudgetEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn warnings(events: &[BudgetEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                BudgetEvent::Warning {
                    threshold_percent, ..
                } => Some(*threshold_percent),
                _ => None,
            })
            .collect()
    }

    fn exhausted(events: &[BudgetEvent]) -> bool {
        events
            .iter()
            .any(|e| matches!(e, BudgetEvent::Exhausted { .. }))
    }

    #[test]
    fn test_allocate_respects_reserve_and_request() {
        let mut budget = BudgetManager::new(5.0);
        assert!(approx(budget.reserve(), 0.5));

        assert!(approx(budget.allocate("a", 1.0), 1.0));
        // Requests above headroom are clamped to total - spent - reserve.
        assert!(approx(budget.allocate("b", 100.0), 4.5));

        budget.record_spend("b", 4.0);
        assert!(approx(budget.allocate("c", 1.0), 0.5));
        budget.record_spend("c", 1.0);
        assert_eq!(budget.allocate("d", 1.0), 0.0);
    }

    #[test]
    fn test_allocate_never_exceeds_bounds() {
        let mut budget = BudgetManager::new(2.0).with_reserve_percent(25.0);
        for (i, (spend, request)) in [(0.0, 3.0), (0.4, 0.2), (0.9, 1.0), (0.5, -1.0), (1.0, 0.7)]
            .into_iter()
            .enumerate()
        {
            budget.record_spend("x", spend);
            let bound = (budget.total() - budget.spent() - budget.reserve()).max(0.0);
            let granted = budget.allocate(&format!("agent-{}", i), request);
            assert!(granted <= bound + 1e-12);
            assert!(granted <= request.max(0.0) + 1e-12);
            assert!(granted >= 0.0);
        }
    }

    #[test]
    fn test_spent_is_sum_and_monotonic() {
        let mut budget = BudgetManager::new(10.0);
        budget.allocate("a", 3.0);
        let amounts = [0.25, 1.0, 0.0, -3.0, 2.5, f64::NAN];
        let mut last = 0.0;
        for amount in amounts {
            budget.record_spend("a", amount);
            assert!(budget.spent() >= last);
            last = budget.spent();
        }
        assert!(approx(budget.spent(), 3.75));
        assert!(approx(budget.ledger("a").unwrap().spent, 3.75));
    }

    #[test]
    fn test_warnings_fire_when_crossing_bands() {
        let mut budget = BudgetManager::new(10.0);
        let mut rx = budget.subscribe();

        budget.record_spend("a", 7.0);
        assert!(warnings(&drain(&mut rx)).is_empty());

        budget.record_spend("a", 1.5);
        assert_eq!(warnings(&drain(&mut rx)), vec![80]);

        budget.record_spend("a", 0.1);
        assert!(warnings(&drain(&mut rx)).is_empty());

        budget.record_spend("a", 0.5);
        assert_eq!(warnings(&drain(&mut rx)), vec![90]);

        budget.record_spend("a", 0.1);
        assert!(warnings(&drain(&mut rx)).is_empty());
    }

    #[test]
    fn test_single_spend_can_cross_both_bands() {
        let mut budget = BudgetManager::new(1.0);
        let mut rx = budget.subscribe();
        assert!(budget.record_spend("a", 0.95));
        assert_eq!(warnings(&drain(&mut rx)), vec![80, 90]);
    }

    #[test]
    fn test_exhausted_iff_spent_reaches_total() {
        let mut budget = BudgetManager::new(1.0);
        let mut rx = budget.subscribe();

        assert!(budget.record_spend("a", 0.5));
        assert!(!exhausted(&drain(&mut rx)));

        assert!(!budget.record_spend("a", 0.5));
        assert!(exhausted(&drain(&mut rx)));

        assert!(!budget.record_spend("a", 0.2));
        assert!(exhausted(&drain(&mut rx)));
    }

    #[test]
    fn test_can_spend() {
        let mut budget = BudgetManager::new(1.0);
        assert!(!budget.can_spend("a"));

        budget.allocate("a", 0.3);
        assert!(budget.can_spend("a"));
        budget.record_spend("a", 0.3);
        assert!(!budget.can_spend("a"));

        budget.allocate("b", 0.5);
        budget.record_spend("c", 0.8);
        assert!(!budget.can_spend("b"));
    }

    #[test]
    fn test_release_returns_unspent() {
        let mut budget = BudgetManager::new(5.0);
        budget.allocate("a", 2.0);
        budget.record_spend("a", 0.75);

        assert!(approx(budget.release("a"), 1.25));
        assert!(budget.ledger("a").is_none());
        assert!(approx(budget.spent(), 0.75));
        // Headroom reflects real spend only.
        assert!(approx(budget.headroom(), 5.0 - 0.75 - 0.5));
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut budget = BudgetManager::new(5.0);
        budget.allocate("a", 1.0);
        budget.record_spend("a", 0.5);
        let before = budget.snapshot();

        assert_eq!(budget.release("missing"), 0.0);
        assert_eq!(budget.snapshot(), before);
    }

    #[test]
    fn test_overspent_ledger_releases_zero() {
        let mut budget = BudgetManager::new(5.0);
        budget.allocate("a", 0.1);
        budget.record_spend("a", 0.4);
        assert_eq!(budget.release("a"), 0.0);
    }

    #[test]
    fn test_snapshot() {
        let mut budget = BudgetManager::new(3.0);
        budget.allocate("planner", 0.3);
        budget.record_spend("planner", 0.1);

        let snapshot = budget.snapshot();
        assert_eq!(snapshot.total, 3.0);
        assert!(approx(snapshot.spent, 0.1));
        assert!(approx(snapshot.remaining, 2.9));
        assert_eq!(snapshot.per_agent.len(), 1);
        assert!(approx(snapshot.per_agent["planner"].allocated, 0.3));
    }
}
