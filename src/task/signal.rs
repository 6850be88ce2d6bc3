// # Synchronization Signals
//
// A signal is a counted synchronization primitive: it is created with an
// initial count and *trips* when the count reaches zero. Completion
// callbacks and signal-to-signal forwarding links fire at that instant, on
// whichever thread performed the final trip.
//
// Handles are 64-bit `(slot, generation)` values into a process-wide table.
// The generation check makes stale handles harmless: once a signal finishes,
// its slot generation resets to zero and every outstanding handle simply
// reports `finished() == true`.

use crate::task::entry::TaskContext;
use crossbeam::queue::ArrayQueue;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SIGNAL_BIT_COUNT: u32 = 16;
const SIGNAL_MASK: u64 = (1 << SIGNAL_BIT_COUNT) - 1;
const MAX_SIGNALS: usize = 1 << SIGNAL_BIT_COUNT;

/// Callback invoked the instant a signal trips. May run on any thread.
pub type SignalCallback = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// Signal handle
// ============================================================================

/// Value handle to a synchronization signal. The empty handle reports as
/// finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signal {
    id: u64,
}

impl Signal {
    /// The empty signal; always finished.
    #[inline]
    pub const fn empty() -> Self {
        Self { id: 0 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.id == 0
    }

    #[inline]
    pub(crate) fn raw(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn from_raw(id: u64) -> Self {
        Self { id }
    }

    //--

    /// Create a signal that trips after `count` trips.
    pub fn create(count: u32, name: &'static str) -> Signal {
        signal_list().create(count, name)
    }

    /// Create a signal that trips once all `signals` have tripped, plus
    /// `extra` manual trips. Inputs that already finished are accounted for
    /// immediately.
    pub fn merge(signals: &[Signal], extra: u32) -> Signal {
        signal_list().merge(signals, extra)
    }

    /// Take over the completion signal of the current task: the caller
    /// becomes responsible for tripping it and the scheduler will no longer
    /// do so automatically.
    pub fn steal(ctx: &mut TaskContext) -> Signal {
        let signal = ctx.completion_signal;
        debug_assert!(!signal.is_empty(), "task completion signal already stolen");
        ctx.completion_signal = Signal::empty();
        signal
    }

    //--

    /// Subtract one from the signal counter, tripping the signal if it
    /// reaches zero.
    #[inline]
    pub fn trip(&self) {
        self.trip_count(1);
    }

    /// Subtract `count` from the signal counter. Tripping a dead signal or
    /// subtracting below zero is a contract violation.
    pub fn trip_count(&self, count: u32) {
        signal_list().trip(*self, count);
    }

    /// Check whether the signal has finished. The empty signal is always
    /// finished. May race with an in-flight trip; use for optimizations and
    /// wait loops only.
    pub fn finished(&self) -> bool {
        signal_list().finished(*self)
    }

    //--

    /// Attach `func` to run the instant the signal finishes. If the signal
    /// has already finished the callback runs inline before returning.
    pub fn register_completion_callback(&self, func: impl FnOnce() + Send + 'static) {
        signal_list().register_completion_callback(*self, Box::new(func));
    }

    /// Trip `other` by `count` automatically once this signal finishes. If
    /// this signal has already finished, `other` is tripped right away.
    pub fn register_completion_signal(&self, other: Signal, count: u32) {
        signal_list().register_completion_signal(*self, other, count);
    }

    //--

    /// Busy-wait until the signal finishes.
    pub fn wait_spin_infinite(&self) {
        while !self.finished() {
            std::hint::spin_loop();
        }
    }

    /// Busy-wait until the signal finishes or the timeout elapses. Returns
    /// true if the signal finished in time.
    pub fn wait_spin_with_timeout(&self, ms: u32) -> bool {
        let deadline = Instant::now() + Duration::from_millis(ms as u64);
        while !self.finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::hint::spin_loop();
        }
        true
    }

    /// Park the current task on the signal through the context's yielder,
    /// releasing the worker thread until the signal trips.
    pub fn wait_with_yield(&self, ctx: &TaskContext) {
        ctx.yielder().yield_and_wait(*self);
    }
}

// ============================================================================
// Signal table
// ============================================================================

struct SlotLists {
    name: &'static str,
    callbacks: Vec<SignalCallback>,
    forwarding: Vec<(Signal, u32)>,
}

struct SignalSlot {
    /// Current generation; zero means the slot is free or completed.
    generation: AtomicU64,
    /// Remaining trip count.
    counter: AtomicI64,
    /// Callback / forwarding lists, appended under this lock but always
    /// executed outside it.
    lists: Mutex<SlotLists>,
}

pub(crate) struct SignalList {
    generation_counter: AtomicU64,
    free_slots: ArrayQueue<u32>,
    slots: Vec<SignalSlot>,
}

impl SignalList {
    fn new() -> Self {
        let free_slots = ArrayQueue::new(MAX_SIGNALS);
        let mut slots = Vec::with_capacity(MAX_SIGNALS);
        for index in 0..MAX_SIGNALS {
            // slot 0 stays unused so the empty handle never aliases a signal
            if index != 0 {
                free_slots
                    .push(index as u32)
                    .expect("free slot queue sized to the table");
            }
            slots.push(SignalSlot {
                generation: AtomicU64::new(0),
                counter: AtomicI64::new(0),
                lists: Mutex::new(SlotLists {
                    name: "",
                    callbacks: Vec::new(),
                    forwarding: Vec::new(),
                }),
            });
        }

        Self {
            generation_counter: AtomicU64::new(1),
            free_slots,
            slots,
        }
    }

    fn split(signal: Signal) -> (usize, u64) {
        let index = (signal.id & SIGNAL_MASK) as usize;
        let generation = signal.id >> SIGNAL_BIT_COUNT;
        (index, generation)
    }

    fn create(&self, count: u32, name: &'static str) -> Signal {
        debug_assert!(count > 0, "signal counter should be at least 1");
        if count == 0 {
            return Signal::empty();
        }

        let generation = self.generation_counter.fetch_add(1, Ordering::Relaxed);
        let index = self
            .free_slots
            .pop()
            .expect("signal table exhausted") as usize;

        let slot = &self.slots[index];
        {
            let mut lists = slot.lists.lock();
            debug_assert_eq!(slot.generation.load(Ordering::Relaxed), 0);
            debug_assert!(lists.callbacks.is_empty());
            debug_assert!(lists.forwarding.is_empty());
            lists.name = name;
            slot.counter.store(count as i64, Ordering::Relaxed);
            slot.generation.store(generation, Ordering::Release);
        }

        Signal {
            id: index as u64 | (generation << SIGNAL_BIT_COUNT),
        }
    }

    fn merge(&self, inputs: &[Signal], extra: u32) -> Signal {
        let total = inputs.len() as u32 + extra;
        if total == 0 {
            return Signal::empty();
        }

        let output = self.create(total, "MergedSignal");

        // install forwarding links on every input that is still live; inputs
        // that already finished are settled with an immediate subtraction
        let mut failed = 0u32;
        for input in inputs {
            let (index, generation) = Self::split(*input);
            let slot = &self.slots[index];

            let mut lists = slot.lists.lock();
            if slot.generation.load(Ordering::Acquire) == generation && generation != 0 {
                lists.forwarding.push((output, 1));
            } else {
                failed += 1;
            }
        }

        if failed > 0 {
            tracing::debug!(lost = failed, total = inputs.len(), "merge inputs already finished");
            self.trip(output, failed);
        }

        output
    }

    fn finished(&self, signal: Signal) -> bool {
        if signal.is_empty() {
            return true;
        }

        let (index, generation) = Self::split(signal);
        self.slots[index].generation.load(Ordering::Acquire) != generation
    }

    fn trip(&self, signal: Signal, count: u32) {
        debug_assert!(!signal.is_empty(), "tripping the empty signal");
        if signal.is_empty() || count == 0 {
            return;
        }

        let (index, generation) = Self::split(signal);
        let slot = &self.slots[index];

        if slot.generation.load(Ordering::Acquire) != generation {
            debug_assert!(false, "tripping a dead signal");
            tracing::error!(index, "tripping a dead signal");
            return;
        }

        let new_count = slot.counter.fetch_sub(count as i64, Ordering::AcqRel) - count as i64;
        debug_assert!(new_count >= 0, "signal counter went below zero");

        if new_count == 0 {
            let (name, callbacks, forwarding) = {
                let mut lists = slot.lists.lock();
                let name = lists.name;
                lists.name = "";
                slot.generation.store(0, Ordering::Release);
                (
                    name,
                    std::mem::take(&mut lists.callbacks),
                    std::mem::take(&mut lists.forwarding),
                )
            };
            tracing::trace!(signal = name, "signal finished");

            // the slot is recyclable before the callbacks run
            let _ = self.free_slots.push(index as u32);

            // callbacks run before any forwarding edge fires, in reverse
            // registration order
            for callback in callbacks.into_iter().rev() {
                callback();
            }

            // forwarding is depth-first, bounded by the dependency DAG depth
            for (target, forward_count) in forwarding.into_iter().rev() {
                self.trip(target, forward_count);
            }
        }
    }

    fn register_completion_callback(&self, signal: Signal, callback: SignalCallback) {
        debug_assert!(!signal.is_empty(), "callback on the empty signal");
        if signal.is_empty() {
            callback();
            return;
        }

        let (index, generation) = Self::split(signal);
        let slot = &self.slots[index];

        let leftover = {
            let mut lists = slot.lists.lock();
            if slot.generation.load(Ordering::Acquire) == generation {
                lists.callbacks.push(callback);
                None
            } else {
                Some(callback)
            }
        };

        // signal already dead: run inline, outside the slot lock
        if let Some(callback) = leftover {
            callback();
        }
    }

    fn register_completion_signal(&self, signal: Signal, other: Signal, count: u32) {
        debug_assert!(!signal.is_empty(), "forwarding from the empty signal");
        debug_assert!(!other.is_empty(), "forwarding to the empty signal");
        if signal.is_empty() || other.is_empty() {
            return;
        }

        let (index, generation) = Self::split(signal);
        let slot = &self.slots[index];

        let installed = {
            let mut lists = slot.lists.lock();
            if slot.generation.load(Ordering::Acquire) == generation {
                lists.forwarding.push((other, count));
                true
            } else {
                false
            }
        };

        // signal already dead: settle the target now, outside the lock
        if !installed {
            self.trip(other, count);
        }
    }
}

static SIGNAL_LIST: Lazy<SignalList> = Lazy::new(SignalList::new);

fn signal_list() -> &'static SignalList {
    &SIGNAL_LIST
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_signal_is_empty() {
        let sig = Signal::default();
        assert!(sig.is_empty());
    }

    #[test]
    fn test_default_signal_reports_as_finished() {
        let sig = Signal::default();
        assert!(sig.finished());
    }

    #[test]
    fn test_signal_with_count_is_valid() {
        let sig = Signal::create(1, "test");
        assert!(!sig.is_empty());
        sig.trip();
    }

    #[test]
    fn test_signal_reports_as_not_finished() {
        let sig = Signal::create(1, "test");
        assert!(!sig.finished());
        sig.trip();
    }

    #[test]
    fn test_signal_reports_as_finished_after_tripping() {
        let sig = Signal::create(1, "test");
        sig.trip();
        assert!(sig.finished());
    }

    #[test]
    fn test_count_two_not_finished_after_one_trip() {
        let sig = Signal::create(2, "test");
        sig.trip();
        assert!(!sig.finished());
        sig.trip();
    }

    #[test]
    fn test_count_two_finished_after_two_trips() {
        let sig = Signal::create(2, "test");
        sig.trip();
        sig.trip();
        assert!(sig.finished());
    }

    #[test]
    fn test_trip_count_equivalent_to_repeated_trips() {
        let sig = Signal::create(4, "test");
        sig.trip_count(3);
        assert!(!sig.finished());
        sig.trip_count(1);
        assert!(sig.finished());
    }

    #[test]
    fn test_callback_not_called_before_signalling() {
        let sig = Signal::create(1, "test");

        let called = Arc::new(AtomicU32::new(0));
        let c = called.clone();
        sig.register_completion_callback(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(called.load(Ordering::SeqCst), 0);
        sig.trip();
    }

    #[test]
    fn test_callback_called_after_signalling() {
        let sig = Signal::create(1, "test");

        let called = Arc::new(AtomicU32::new(0));
        let c = called.clone();
        sig.register_completion_callback(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        sig.trip();
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_on_finished_signal_runs_inline() {
        let sig = Signal::create(1, "test");
        sig.trip();

        let called = Arc::new(AtomicU32::new(0));
        let c = called.clone();
        sig.register_completion_callback(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_run_in_reverse_registration_order() {
        let sig = Signal::create(1, "test");

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let o = order.clone();
            sig.register_completion_callback(move || {
                o.lock().push(i);
            });
        }

        sig.trip();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn test_forwarding_trips_target() {
        let source = Signal::create(1, "source");
        let target = Signal::create(1, "target");

        source.register_completion_signal(target, 1);
        assert!(!target.finished());

        source.trip();
        assert!(source.finished());
        assert!(target.finished());
    }

    #[test]
    fn test_forwarding_from_finished_signal_settles_immediately() {
        let source = Signal::create(1, "source");
        source.trip();

        let target = Signal::create(1, "target");
        source.register_completion_signal(target, 1);
        assert!(target.finished());
    }

    #[test]
    fn test_merge_waits_for_all_inputs() {
        let s1 = Signal::create(1, "s1");
        let s2 = Signal::create(2, "s2");
        let merged = Signal::merge(&[s1, s2], 0);

        let called = Arc::new(AtomicU32::new(0));
        let c = called.clone();
        merged.register_completion_callback(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        s1.trip();
        assert_eq!(called.load(Ordering::SeqCst), 0);
        s2.trip();
        assert_eq!(called.load(Ordering::SeqCst), 0);
        s2.trip();
        assert_eq!(called.load(Ordering::SeqCst), 1);
        assert!(merged.finished());
    }

    #[test]
    fn test_merge_accounts_for_finished_inputs() {
        let s1 = Signal::create(1, "s1");
        s1.trip();

        let s2 = Signal::create(1, "s2");
        let merged = Signal::merge(&[s1, s2], 0);
        assert!(!merged.finished());

        s2.trip();
        assert!(merged.finished());
    }

    #[test]
    fn test_merge_with_extra_count() {
        let s1 = Signal::create(1, "s1");
        let merged = Signal::merge(&[s1], 1);

        s1.trip();
        assert!(!merged.finished());
        merged.trip();
        assert!(merged.finished());
    }

    #[test]
    fn test_merge_of_nothing_is_empty() {
        let merged = Signal::merge(&[], 0);
        assert!(merged.is_empty());
        assert!(merged.finished());
    }

    #[test]
    fn test_forwarding_chain_runs_depth_first() {
        let a = Signal::create(1, "a");
        let b = Signal::create(1, "b");
        let c = Signal::create(1, "c");

        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        b.register_completion_callback(move || o.lock().push("b"));
        let o = order.clone();
        c.register_completion_callback(move || o.lock().push("c"));

        a.register_completion_signal(b, 1);
        b.register_completion_signal(c, 1);

        a.trip();
        assert_eq!(*order.lock(), vec!["b", "c"]);
        assert!(b.finished());
        assert!(c.finished());
    }

    #[test]
    fn test_wait_spin_with_timeout_expires() {
        let sig = Signal::create(1, "test");
        assert!(!sig.wait_spin_with_timeout(5));
        sig.trip();
        assert!(sig.wait_spin_with_timeout(5));
    }

    #[test]
    fn test_wait_spin_across_threads() {
        let sig = Signal::create(1, "test");
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            sig.trip();
        });
        sig.wait_spin_infinite();
        handle.join().unwrap();
        assert!(sig.finished());
    }

    #[test]
    fn test_stale_handle_stays_finished_after_slot_reuse() {
        let old = Signal::create(1, "old");
        old.trip();
        assert!(old.finished());

        // exercise slot reuse; the stale handle must keep reporting finished
        let mut fresh = Vec::new();
        for _ in 0..64 {
            fresh.push(Signal::create(1, "fresh"));
        }
        assert!(old.finished());
        for sig in fresh {
            sig.trip();
        }
    }
}
