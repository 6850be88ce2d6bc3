// Parallel-for coverage: the caller thread and the spawned instances must
// together process exactly the input range.

use ember_core::task::{parallel_for, parallel_for_each, IndexRange};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn counters(len: usize) -> Arc<Vec<AtomicU32>> {
    Arc::new((0..len).map(|_| AtomicU32::new(0)).collect())
}

#[test]
fn parallel_for_touches_every_index_once() {
    let acc = counters(1100);

    let slots = acc.clone();
    parallel_for(IndexRange::new(0, 1000), 64, 4, move |range| {
        for index in range.iter() {
            slots[index as usize].fetch_add(1, Ordering::SeqCst);
        }
    });

    for (index, slot) in acc.iter().enumerate() {
        let expected = if index < 1000 { 1 } else { 0 };
        assert_eq!(
            slot.load(Ordering::SeqCst),
            expected,
            "index {} touch count",
            index
        );
    }
}

#[test]
fn parallel_for_with_offset_range() {
    let acc = counters(600);

    let slots = acc.clone();
    parallel_for(IndexRange::new(100, 400), 16, 8, move |range| {
        for index in range.iter() {
            slots[index as usize].fetch_add(1, Ordering::SeqCst);
        }
    });

    for (index, slot) in acc.iter().enumerate() {
        let expected = u32::from((100..500).contains(&index));
        assert_eq!(slot.load(Ordering::SeqCst), expected, "index {}", index);
    }
}

#[test]
fn parallel_for_small_range_runs_inline() {
    let acc = counters(32);

    // range smaller than one block: everything happens on this thread
    let slots = acc.clone();
    parallel_for(IndexRange::new(0, 32), 64, 4, move |range| {
        for index in range.iter() {
            slots[index as usize].fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(acc.iter().all(|slot| slot.load(Ordering::SeqCst) == 1));
}

#[test]
fn parallel_for_each_touches_every_index_once() {
    let acc = counters(333);

    let slots = acc.clone();
    parallel_for_each(IndexRange::new(0, 333), 4, move |index| {
        slots[index as usize].fetch_add(1, Ordering::SeqCst);
    });

    assert!(acc.iter().all(|slot| slot.load(Ordering::SeqCst) == 1));
}

#[test]
fn parallel_for_each_single_element() {
    let acc = Arc::new(AtomicU32::new(0));

    let counter = acc.clone();
    parallel_for_each(IndexRange::new(7, 1), 8, move |index| {
        assert_eq!(index, 7);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(acc.load(Ordering::SeqCst), 1);
}

#[test]
fn parallel_for_empty_range_is_a_no_op() {
    parallel_for(IndexRange::new(0, 0), 16, 4, |_range| {
        panic!("body must not run for an empty range");
    });
    parallel_for_each(IndexRange::new(0, 0), 4, |_index| {
        panic!("body must not run for an empty range");
    });
}
