use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::catalog::FilterCatalog;
use crate::filter::{FilterKind, SlotDemand};

/// One kind's usage as reported in a status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterBudget {
    pub kind: FilterKind,
    pub running: u32,
    pub max: u32,
}

/// Per-kind running counts with all-or-nothing reservation.
///
/// A reservation takes every slot a demand names or none of them, so a job
/// can never hold part of its demand while waiting for the rest. All
/// access goes through the mutex, which is never held across an await.
#[derive(Debug)]
pub struct BudgetLedger {
    max: [u32; FilterKind::COUNT],
    running: Mutex<[u32; FilterKind::COUNT]>,
}

impl BudgetLedger {
    pub fn new(max: [u32; FilterKind::COUNT]) -> Self {
        Self {
            max,
            running: Mutex::new([0; FilterKind::COUNT]),
        }
    }

    pub fn from_catalog(catalog: &FilterCatalog) -> Self {
        Self::new(catalog.limits())
    }

    /// Atomically reserve the whole demand, or nothing.
    pub fn try_reserve(&self, demand: &SlotDemand) -> bool {
        let mut running = self.running.lock().expect("ledger mutex poisoned");
        for kind in FilterKind::ALL {
            if running[kind.index()] + demand.count(kind) > self.max[kind.index()] {
                return false;
            }
        }
        for kind in FilterKind::ALL {
            running[kind.index()] += demand.count(kind);
        }
        true
    }

    /// Return a previously reserved demand.
    ///
    /// Underflow means a double release or a release that was never
    /// reserved. Masking that would corrupt every admission decision that
    /// follows, so it aborts the daemon.
    pub fn release(&self, demand: &SlotDemand) {
        let mut running = self.running.lock().expect("ledger mutex poisoned");
        for kind in FilterKind::ALL {
            let count = &mut running[kind.index()];
            let freed = demand.count(kind);
            assert!(
                *count >= freed,
                "budget ledger underflow for {kind}: releasing {freed} with {count} running"
            );
            *count -= freed;
        }
    }

    /// A consistent copy of every kind's usage, in catalogue order.
    pub fn snapshot(&self) -> Vec<FilterBudget> {
        let running = self.running.lock().expect("ledger mutex poisoned");
        FilterKind::ALL
            .into_iter()
            .map(|kind| FilterBudget {
                kind,
                running: running[kind.index()],
                max: self.max[kind.index()],
            })
            .collect()
    }
}
