//! Allocation ledger.
//!
//! Bookkeeping for a fixed pool of tokens spread over named areas. Every
//! mutating call either keeps each area inside `[min_per_area, max_per_area]`
//! and the allocated sum at or below the pool, or fails without changing
//! anything.
//!
//! `sum_equals` is only checked by [`AllocationLedger::validate`], so a user
//! can pass through partial allocations. [`AllocationLedger::finish`] is the
//! completion step that enforces it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Bounds on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedgerConstraints {
    pub min_per_area: u64,
    pub max_per_area: Option<u64>,
    /// Required allocated sum once the user is done
    pub sum_equals: Option<u64>,
}

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub at: DateTime<Utc>,
}

/// One broken constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    BelowMinimum { area: String, value: u64, min: u64 },
    AboveMaximum { area: String, value: u64, max: u64 },
    OverTotal { allocated: u64, total: u64 },
    SumMismatch { allocated: u64, expected: u64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowMinimum { area, value, min } => {
                write!(f, "{} has {} (minimum {})", area, value, min)
            }
            Self::AboveMaximum { area, value, max } => {
                write!(f, "{} has {} (maximum {})", area, value, max)
            }
            Self::OverTotal { allocated, total } => {
                write!(f, "{} allocated from a pool of {}", allocated, total)
            }
            Self::SumMismatch { allocated, expected } => {
                write!(f, "{} allocated, {} required", allocated, expected)
            }
        }
    }
}

/// Result of [`AllocationLedger::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LedgerValidation {
    pub violations: Vec<Violation>,
}

impl LedgerValidation {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Ledger errors. A failed call leaves the ledger untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Unknown area: {0}")]
    UnknownArea(String),

    #[error("No areas given")]
    NoAreas,

    #[error("Ratios sum to zero")]
    ZeroRatio,

    #[error("Area {0} is listed more than once")]
    DuplicateArea(String),

    #[error("Cannot transfer from {0} to itself")]
    SameArea(String),

    #[error("{0}")]
    Bounds(Violation),

    #[error("Allocation incomplete: {} violation(s)", .0.len())]
    Incomplete(Vec<Violation>),

    #[error("Failed to import ledger: {0}")]
    Import(String),

    #[error("Failed to export ledger: {0}")]
    Export(String),
}

/// Handle returned by [`AllocationLedger::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&BTreeMap<String, u64>)>;

/// Serialized ledger document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub total: u64,
    pub constraints: LedgerConstraints,
    pub allocations: BTreeMap<String, u64>,
    #[serde(default)]
    pub history: Vec<TransferRecord>,
}

/// Constrained token ledger over named areas.
pub struct AllocationLedger {
    total: u64,
    constraints: LedgerConstraints,
    allocations: BTreeMap<String, u64>,
    history: Vec<TransferRecord>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl fmt::Debug for AllocationLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationLedger")
            .field("total", &self.total)
            .field("constraints", &self.constraints)
            .field("allocations", &self.allocations)
            .field("history", &self.history.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl AllocationLedger {
    /// Create a ledger with every area at `min_per_area`.
    pub fn new<I, S>(
        total: u64,
        areas: I,
        constraints: LedgerConstraints,
    ) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allocations: BTreeMap<String, u64> = areas
            .into_iter()
            .map(|a| (a.into(), constraints.min_per_area))
            .collect();

        let ledger = Self {
            total,
            constraints,
            allocations,
            history: Vec::new(),
            listeners: Vec::new(),
            next_subscription: 0,
        };
        ledger.check_bounds(&ledger.allocations)?;
        Ok(ledger)
    }

    pub fn get(&self, area: &str) -> Option<u64> {
        self.allocations.get(area).copied()
    }

    pub fn allocations(&self) -> &BTreeMap<String, u64> {
        &self.allocations
    }

    pub fn constraints(&self) -> &LedgerConstraints {
        &self.constraints
    }

    /// The pool size.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn allocated(&self) -> u64 {
        self.allocations.values().sum()
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.allocated())
    }

    /// Completed transfers, oldest first.
    pub fn history(&self) -> &[TransferRecord] {
        &self.history
    }

    /// Add `delta` (possibly negative) to an area.
    pub fn allocate(&mut self, area: &str, delta: i64) -> Result<u64, LedgerError> {
        let current = self.current(area)?;
        let next = current.checked_add_signed(delta).ok_or_else(|| {
            if delta > 0 {
                LedgerError::Bounds(Violation::OverTotal {
                    allocated: u64::MAX,
                    total: self.total,
                })
            } else {
                LedgerError::Bounds(Violation::BelowMinimum {
                    area: area.to_string(),
                    value: 0,
                    min: self.constraints.min_per_area,
                })
            }
        })?;
        self.set_allocation(area, next)
    }

    /// Set an area to an absolute value.
    pub fn set_allocation(&mut self, area: &str, value: u64) -> Result<u64, LedgerError> {
        self.current(area)?;
        let mut next = self.allocations.clone();
        next.insert(area.to_string(), value);
        self.commit(next)?;
        Ok(value)
    }

    /// Move `amount` between two areas; both sides change or neither does.
    pub fn transfer(&mut self, from: &str, to: &str, amount: u64) -> Result<(), LedgerError> {
        if from == to {
            return Err(LedgerError::SameArea(from.to_string()));
        }
        let source = self.current(from)?;
        let target = self.current(to)?;

        let min = self.constraints.min_per_area;
        let remaining_source = source
            .checked_sub(amount)
            .filter(|v| *v >= min)
            .ok_or_else(|| {
                LedgerError::Bounds(Violation::BelowMinimum {
                    area: from.to_string(),
                    value: source.saturating_sub(amount),
                    min,
                })
            })?;

        let mut next = self.allocations.clone();
        next.insert(from.to_string(), remaining_source);
        next.insert(to.to_string(), target.saturating_add(amount));
        self.commit(next)?;

        self.history.push(TransferRecord {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            at: Utc::now(),
        });
        debug!(target: "consult_sync.ledger", from, to, amount, "Transfer recorded");
        Ok(())
    }

    /// Split the pool evenly over `areas`, which replace the current areas.
    ///
    /// The first `total % n` areas each get one extra token.
    pub fn distribute_evenly<S: AsRef<str>>(&mut self, areas: &[S]) -> Result<(), LedgerError> {
        if areas.is_empty() {
            return Err(LedgerError::NoAreas);
        }
        check_distinct(areas.iter().map(AsRef::as_ref))?;
        let n = areas.len() as u64;
        let base = self.total / n;
        let extra = self.total % n;

        let next = areas
            .iter()
            .enumerate()
            .map(|(i, area)| {
                let bonus = u64::from((i as u64) < extra);
                (area.as_ref().to_string(), base + bonus)
            })
            .collect();
        self.commit(next)
    }

    /// Split the pool by ratio over the listed areas, which replace the
    /// current areas.
    ///
    /// Each area gets the floor of its share except the last, which takes
    /// what is left so the sum equals the pool exactly.
    pub fn distribute_by_ratio<S: AsRef<str>>(
        &mut self,
        ratios: &[(S, u64)],
    ) -> Result<(), LedgerError> {
        let Some(((last_area, _), head)) = ratios.split_last() else {
            return Err(LedgerError::NoAreas);
        };
        check_distinct(ratios.iter().map(|(area, _)| area.as_ref()))?;
        let ratio_sum: u128 = ratios.iter().map(|(_, r)| u128::from(*r)).sum();
        if ratio_sum == 0 {
            return Err(LedgerError::ZeroRatio);
        }

        let mut next = BTreeMap::new();
        let mut assigned = 0u64;
        for (area, ratio) in head {
            let share = (u128::from(self.total) * u128::from(*ratio) / ratio_sum) as u64;
            assigned += share;
            next.insert(area.as_ref().to_string(), share);
        }
        next.insert(last_area.as_ref().to_string(), self.total - assigned);
        self.commit(next)
    }

    /// Put every area back to `min_per_area` and clear the history.
    pub fn reset(&mut self) -> Result<(), LedgerError> {
        let min = self.constraints.min_per_area;
        let next = self.allocations.keys().map(|k| (k.clone(), min)).collect();
        self.commit(next)?;
        self.history.clear();
        Ok(())
    }

    /// Check bounds and `sum_equals` without changing anything.
    pub fn validate(&self) -> LedgerValidation {
        let mut violations = self.bound_violations(&self.allocations);
        if let Some(expected) = self.constraints.sum_equals {
            let allocated = self.allocated();
            if allocated != expected {
                violations.push(Violation::SumMismatch { allocated, expected });
            }
        }
        LedgerValidation { violations }
    }

    /// Finish allocating: the final allocation if it validates.
    pub fn finish(&self) -> Result<BTreeMap<String, u64>, LedgerError> {
        let validation = self.validate();
        if validation.is_valid() {
            Ok(self.allocations.clone())
        } else {
            Err(LedgerError::Incomplete(validation.violations))
        }
    }

    /// Call `listener` with the allocations after every successful change.
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&BTreeMap<String, u64>) + 'static,
    ) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            total: self.total,
            constraints: self.constraints.clone(),
            allocations: self.allocations.clone(),
            history: self.history.clone(),
        }
    }

    /// Serialize the ledger to a JSON string.
    pub fn export(&self) -> Result<String, LedgerError> {
        serde_json::to_string(&self.snapshot()).map_err(|e| LedgerError::Export(e.to_string()))
    }

    /// Replace the ledger's contents with an exported document.
    ///
    /// Documents that break the bounds are rejected; `sum_equals` is not
    /// checked here.
    pub fn import(&mut self, input: &str) -> Result<(), LedgerError> {
        let doc: LedgerSnapshot =
            serde_json::from_str(input).map_err(|e| LedgerError::Import(e.to_string()))?;

        let staged = Self {
            total: doc.total,
            constraints: doc.constraints,
            allocations: BTreeMap::new(),
            history: Vec::new(),
            listeners: Vec::new(),
            next_subscription: 0,
        };
        if let Err(e) = staged.check_bounds(&doc.allocations) {
            warn!(target: "consult_sync.ledger", error = %e, "Rejected ledger import");
            return Err(LedgerError::Import(e.to_string()));
        }

        self.total = staged.total;
        self.constraints = staged.constraints;
        self.allocations = doc.allocations;
        self.history = doc.history;
        self.notify();
        Ok(())
    }

    fn current(&self, area: &str) -> Result<u64, LedgerError> {
        self.get(area)
            .ok_or_else(|| LedgerError::UnknownArea(area.to_string()))
    }

    fn bound_violations(&self, allocations: &BTreeMap<String, u64>) -> Vec<Violation> {
        let min = self.constraints.min_per_area;
        let mut violations = Vec::new();
        for (area, &value) in allocations {
            if value < min {
                violations.push(Violation::BelowMinimum {
                    area: area.clone(),
                    value,
                    min,
                });
            }
            if let Some(max) = self.constraints.max_per_area {
                if value > max {
                    violations.push(Violation::AboveMaximum {
                        area: area.clone(),
                        value,
                        max,
                    });
                }
            }
        }
        let allocated = allocations
            .values()
            .fold(0u64, |acc, v| acc.saturating_add(*v));
        if allocated > self.total {
            violations.push(Violation::OverTotal {
                allocated,
                total: self.total,
            });
        }
        violations
    }

    fn check_bounds(&self, allocations: &BTreeMap<String, u64>) -> Result<(), LedgerError> {
        match self.bound_violations(allocations).into_iter().next() {
            Some(violation) => Err(LedgerError::Bounds(violation)),
            None => Ok(()),
        }
    }

    /// Swap in `next` if it keeps every bound.
    fn commit(&mut self, next: BTreeMap<String, u64>) -> Result<(), LedgerError> {
        self.check_bounds(&next)?;
        self.allocations = next;
        self.notify();
        Ok(())
    }

    fn notify(&mut self) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&self.allocations);
        }
    }
}

/// Reject area lists that name an area twice.
fn check_distinct<'a>(areas: impl Iterator<Item = &'a str>) -> Result<(), LedgerError> {
    let mut seen = HashSet::new();
    for area in areas {
        if !seen.insert(area) {
            return Err(LedgerError::DuplicateArea(area.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ledger(total: u64, max: Option<u64>) -> AllocationLedger {
        AllocationLedger::new(
            total,
            ["health", "career", "family"],
            LedgerConstraints {
                min_per_area: 0,
                max_per_area: max,
                sum_equals: Some(total),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_allocate_within_bounds() {
        let mut ledger = ledger(10, Some(6));
        assert_eq!(ledger.allocate("health", 4), Ok(4));
        assert_eq!(ledger.allocate("health", -1), Ok(3));
        assert_eq!(ledger.remaining(), 7);

        assert!(matches!(
            ledger.allocate("health", 4),
            Err(LedgerError::Bounds(Violation::AboveMaximum { .. }))
        ));
        assert!(matches!(
            ledger.allocate("health", -4),
            Err(LedgerError::Bounds(Violation::BelowMinimum { .. }))
        ));
        assert_eq!(ledger.get("health"), Some(3));
        assert_eq!(
            ledger.allocate("hobbies", 1),
            Err(LedgerError::UnknownArea("hobbies".into()))
        );
    }

    #[test]
    fn test_set_allocation_respects_pool() {
        let mut ledger = ledger(10, None);
        ledger.set_allocation("health", 6).unwrap();
        ledger.set_allocation("career", 4).unwrap();

        assert_eq!(
            ledger.set_allocation("family", 1),
            Err(LedgerError::Bounds(Violation::OverTotal {
                allocated: 11,
                total: 10
            }))
        );
        // Computed against the other areas, so lowering is fine
        assert_eq!(ledger.set_allocation("health", 2), Ok(2));
        assert_eq!(ledger.allocated(), 6);
    }

    #[test]
    fn test_transfer_is_atomic_and_recorded() {
        let mut ledger = ledger(10, Some(5));
        ledger.set_allocation("health", 5).unwrap();
        ledger.set_allocation("career", 4).unwrap();

        ledger.transfer("health", "family", 3).unwrap();
        assert_eq!(ledger.get("health"), Some(2));
        assert_eq!(ledger.get("family"), Some(3));
        assert_eq!(ledger.history().len(), 1);
        assert_eq!(ledger.history()[0].amount, 3);

        // Destination would exceed its maximum: neither side moves
        let before = ledger.allocations().clone();
        assert!(ledger.transfer("family", "career", 2).is_err());
        // Source would go negative
        assert!(ledger.transfer("health", "family", 3).is_err());
        assert_eq!(ledger.allocations(), &before);
        assert_eq!(ledger.history().len(), 1);

        assert_eq!(
            ledger.transfer("career", "career", 1),
            Err(LedgerError::SameArea("career".into()))
        );
    }

    #[test]
    fn test_distribute_evenly_remainder_goes_first() {
        let mut ledger = ledger(10, None);
        ledger.distribute_evenly(&["a", "b", "c"]).unwrap();
        assert_eq!(ledger.get("a"), Some(4));
        assert_eq!(ledger.get("b"), Some(3));
        assert_eq!(ledger.get("c"), Some(3));
        assert_eq!(ledger.get("health"), None);

        let empty: [&str; 0] = [];
        assert_eq!(ledger.distribute_evenly(&empty), Err(LedgerError::NoAreas));
    }

    #[test]
    fn test_distribute_by_ratio_exact_sum() {
        let mut ledger = ledger(100, None);
        ledger
            .distribute_by_ratio(&[("health", 2), ("career", 3), ("family", 5)])
            .unwrap();

        let expected: BTreeMap<String, u64> = [("career", 30), ("family", 50), ("health", 20)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(ledger.allocations(), &expected);

        ledger.distribute_by_ratio(&[("a", 1), ("b", 1), ("c", 1)]).unwrap();
        assert_eq!(ledger.get("a"), Some(33));
        assert_eq!(ledger.get("c"), Some(34));
        assert_eq!(ledger.allocated(), 100);
    }

    #[test]
    fn test_distribute_rejects_repeated_areas() {
        let mut ledger = ledger(100, None);
        let before = ledger.allocations().clone();

        assert_eq!(
            ledger.distribute_by_ratio(&[("a", 1), ("a", 1)]),
            Err(LedgerError::DuplicateArea("a".into()))
        );
        assert_eq!(
            ledger.distribute_evenly(&["a", "b", "a"]),
            Err(LedgerError::DuplicateArea("a".into()))
        );
        assert_eq!(ledger.allocations(), &before);
    }

    #[test]
    fn test_allocate_overflow_reports_over_total() {
        let mut ledger = ledger(u64::MAX, None);
        ledger.set_allocation("health", u64::MAX - 1).unwrap();

        assert!(matches!(
            ledger.allocate("health", 2),
            Err(LedgerError::Bounds(Violation::OverTotal { total: u64::MAX, .. }))
        ));
        assert_eq!(ledger.get("health"), Some(u64::MAX - 1));
    }

    #[test]
    fn test_distribute_by_ratio_fails_atomically() {
        let mut ledger = ledger(100, Some(40));
        ledger.set_allocation("health", 10).unwrap();
        let before = ledger.allocations().clone();

        assert!(matches!(
            ledger.distribute_by_ratio(&[("health", 2), ("career", 3), ("family", 5)]),
            Err(LedgerError::Bounds(Violation::AboveMaximum { .. }))
        ));
        assert_eq!(ledger.allocations(), &before);
        assert_eq!(
            ledger.distribute_by_ratio(&[("health", 0)]),
            Err(LedgerError::ZeroRatio)
        );
    }

    #[test]
    fn test_validate_and_finish() {
        let mut ledger = ledger(10, None);
        ledger.set_allocation("health", 4).unwrap();

        let validation = ledger.validate();
        assert!(!validation.is_valid());
        assert_eq!(
            validation.violations,
            vec![Violation::SumMismatch {
                allocated: 4,
                expected: 10
            }]
        );
        assert!(matches!(ledger.finish(), Err(LedgerError::Incomplete(_))));

        ledger.set_allocation("career", 6).unwrap();
        assert!(ledger.validate().is_valid());
        assert_eq!(ledger.finish().unwrap().values().sum::<u64>(), 10);
    }

    #[test]
    fn test_minimums_and_reset() {
        let constraints = LedgerConstraints {
            min_per_area: 1,
            max_per_area: None,
            sum_equals: None,
        };
        let mut ledger = AllocationLedger::new(5, ["a", "b"], constraints.clone()).unwrap();
        assert_eq!(ledger.allocated(), 2);

        ledger.transfer("a", "b", 0).unwrap();
        assert!(ledger.transfer("a", "b", 1).is_err());
        ledger.allocate("b", 3).unwrap();

        ledger.reset().unwrap();
        assert_eq!(ledger.get("b"), Some(1));
        assert!(ledger.history().is_empty());

        // Minimums alone exceed the pool
        assert!(AllocationLedger::new(1, ["a", "b"], constraints).is_err());
    }

    #[test]
    fn test_subscribers() {
        let mut ledger = ledger(10, None);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let id = ledger.subscribe(move |allocations| {
            sink.borrow_mut().push(allocations.values().sum::<u64>());
        });

        ledger.allocate("health", 2).unwrap();
        // Rejected calls do not notify
        let _ = ledger.allocate("health", 20);
        ledger.allocate("career", 3).unwrap();
        assert!(ledger.unsubscribe(id));
        assert!(!ledger.unsubscribe(id));
        ledger.allocate("family", 1).unwrap();

        assert_eq!(*seen.borrow(), vec![2, 5]);
    }

    #[test]
    fn test_export_import() {
        let mut source = ledger(10, Some(8));
        source.set_allocation("health", 5).unwrap();
        source.transfer("health", "career", 2).unwrap();
        let exported = source.export().unwrap();

        let mut target = ledger(3, None);
        target.import(&exported).unwrap();
        assert_eq!(target.snapshot(), source.snapshot());
        assert_eq!(target.total(), 10);

        let mut doc: LedgerSnapshot = serde_json::from_str(&exported).unwrap();
        doc.allocations.insert("family".into(), 9);
        let broken = serde_json::to_string(&doc).unwrap();
        assert!(matches!(target.import(&broken), Err(LedgerError::Import(_))));
        assert_eq!(target.snapshot(), source.snapshot());

        assert!(matches!(target.import("not json"), Err(LedgerError::Import(_))));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(usize, u64),
        Allocate(usize, i64),
        Transfer(usize, usize, u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 0..30u64).prop_map(|(a, v)| Op::Set(a, v)),
            (0..3usize, -15..15i64).prop_map(|(a, d)| Op::Allocate(a, d)),
            (0..3usize, 0..3usize, 0..15u64).prop_map(|(a, b, n)| Op::Transfer(a, b, n)),
        ]
    }

    proptest! {
        #[test]
        fn prop_bounds_always_hold(ops in prop::collection::vec(op(), 0..60)) {
            let areas = ["health", "career", "family"];
            let mut ledger = AllocationLedger::new(
                20,
                areas,
                LedgerConstraints { min_per_area: 1, max_per_area: Some(12), sum_equals: Some(20) },
            )
            .unwrap();

            for op in ops {
                let _ = match op {
                    Op::Set(a, v) => ledger.set_allocation(areas[a], v).map(|_| ()),
                    Op::Allocate(a, d) => ledger.allocate(areas[a], d).map(|_| ()),
                    Op::Transfer(a, b, n) => ledger.transfer(areas[a], areas[b], n),
                };

                prop_assert!(ledger.allocated() <= ledger.total());
                for value in ledger.allocations().values() {
                    prop_assert!((1..=12).contains(value));
                }
            }
        }
    }
}
