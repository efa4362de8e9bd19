use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sdstore::filter::{FilterKind, SlotDemand};
use sdstore::ledger::BudgetLedger;

fn demand(pipeline: &[FilterKind]) -> SlotDemand {
    SlotDemand::from_pipeline(pipeline)
}

fn limits(nop: u32, bcompress: u32) -> [u32; FilterKind::COUNT] {
    let mut max = [2u32; FilterKind::COUNT];
    max[FilterKind::Nop.index()] = nop;
    max[FilterKind::Bcompress.index()] = bcompress;
    max
}

fn running(ledger: &BudgetLedger, kind: FilterKind) -> u32 {
    ledger
        .snapshot()
        .into_iter()
        .find(|budget| budget.kind == kind)
        .unwrap()
        .running
}

#[test]
fn reserve_within_budget_succeeds() {
    let ledger = BudgetLedger::new(limits(3, 2));
    assert!(ledger.try_reserve(&demand(&[FilterKind::Nop, FilterKind::Nop])));
    assert_eq!(running(&ledger, FilterKind::Nop), 2);
}

#[test]
fn reserve_beyond_budget_fails() {
    let ledger = BudgetLedger::new(limits(3, 2));
    assert!(ledger.try_reserve(&demand(&[FilterKind::Nop, FilterKind::Nop])));
    assert!(!ledger.try_reserve(&demand(&[FilterKind::Nop, FilterKind::Nop])));
    assert_eq!(running(&ledger, FilterKind::Nop), 2);
}

#[test]
fn reserve_is_all_or_nothing() {
    let ledger = BudgetLedger::new(limits(3, 1));
    assert!(ledger.try_reserve(&demand(&[FilterKind::Bcompress])));

    // Plenty of nop budget left, but bcompress is full: the whole demand
    // must be refused and the nop count must stay untouched.
    assert!(!ledger.try_reserve(&demand(&[FilterKind::Nop, FilterKind::Bcompress])));
    assert_eq!(running(&ledger, FilterKind::Nop), 0);
    assert_eq!(running(&ledger, FilterKind::Bcompress), 1);
}

#[test]
fn release_restores_capacity() {
    let ledger = BudgetLedger::new(limits(3, 2));
    let d = demand(&[FilterKind::Nop, FilterKind::Nop, FilterKind::Nop]);
    assert!(ledger.try_reserve(&d));
    assert!(!ledger.try_reserve(&demand(&[FilterKind::Nop])));

    ledger.release(&d);
    assert_eq!(running(&ledger, FilterKind::Nop), 0);
    assert!(ledger.try_reserve(&demand(&[FilterKind::Nop])));
}

#[test]
fn snapshot_lists_kinds_in_catalogue_order() {
    let ledger = BudgetLedger::new(limits(3, 2));
    let kinds: Vec<FilterKind> = ledger.snapshot().into_iter().map(|b| b.kind).collect();
    assert_eq!(kinds, FilterKind::ALL.to_vec());
}

#[test]
#[should_panic(expected = "budget ledger underflow")]
fn release_without_reserve_panics() {
    let ledger = BudgetLedger::new(limits(3, 2));
    ledger.release(&demand(&[FilterKind::Nop]));
}

/// Hammer the ledger from several threads and check that the number of
/// concurrently held reservations never exceeds the budget.
#[test]
fn concurrent_reservations_never_overcommit() {
    let ledger = Arc::new(BudgetLedger::new(limits(3, 2)));
    let held = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = Arc::clone(&ledger);
        let held = Arc::clone(&held);
        handles.push(thread::spawn(move || {
            let d = demand(&[FilterKind::Nop]);
            for _ in 0..200 {
                if ledger.try_reserve(&d) {
                    let now = held.fetch_add(1, Ordering::SeqCst) + 1;
                    assert!(now <= 3, "{now} nop slots held with a budget of 3");
                    thread::sleep(Duration::from_micros(50));
                    held.fetch_sub(1, Ordering::SeqCst);
                    ledger.release(&d);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(running(&ledger, FilterKind::Nop), 0);
}
