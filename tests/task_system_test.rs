// Task scheduler end-to-end behavior: instancing, concurrency caps, signal
// dependencies and yielding.

use ember_core::task::{ambient_context, Signal, TaskBuilder};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Spin for roughly `duration` without sleeping the thread.
fn spin_for(duration: Duration) {
    let end = Instant::now() + duration;
    while Instant::now() < end {
        std::hint::spin_loop();
    }
}

/// Run `instances` spinning task instances with the given concurrency cap
/// and verify the number of simultaneously running instances never exceeds
/// the cap.
fn check_concurrency_cap(instances: u32, concurrency: u32) {
    init_tracing();

    let simultaneous = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    let running = simultaneous.clone();
    let observed_peak = peak.clone();
    let signal = TaskBuilder::new("Spin")
        .instances(instances)
        .concurrency(concurrency)
        .run(move |_ctx| {
            let count = running.fetch_add(1, Ordering::SeqCst) + 1;
            observed_peak.fetch_max(count, Ordering::SeqCst);

            spin_for(Duration::from_millis(2));

            running.fetch_sub(1, Ordering::SeqCst);
        });

    signal.wait_spin_infinite();

    assert!(
        peak.load(Ordering::SeqCst) <= concurrency,
        "{} instances ran simultaneously with a cap of {}",
        peak.load(Ordering::SeqCst),
        concurrency
    );
}

#[test]
fn concurrency_one() {
    check_concurrency_cap(100, 1);
}

#[test]
fn concurrency_two() {
    check_concurrency_cap(200, 2);
}

#[test]
fn concurrency_four() {
    check_concurrency_cap(400, 4);
}

#[test]
fn concurrency_eight() {
    check_concurrency_cap(800, 8);
}

#[test]
fn concurrency_sixteen() {
    check_concurrency_cap(1600, 16);
}

//--

#[test]
fn every_instance_runs_exactly_once() {
    const INSTANCES: u32 = 512;

    let hits = Arc::new(Vec::from_iter((0..INSTANCES).map(|_| AtomicU32::new(0))));

    let slots = hits.clone();
    let signal = TaskBuilder::new("Count")
        .instances(INSTANCES)
        .run_indexed(move |_ctx, index| {
            slots[index as usize].fetch_add(1, Ordering::SeqCst);
        });

    signal.wait_spin_infinite();

    for (index, slot) in hits.iter().enumerate() {
        assert_eq!(slot.load(Ordering::SeqCst), 1, "instance {} hit count", index);
    }
}

#[test]
fn completion_signal_trips_after_last_instance() {
    let finished = Arc::new(AtomicU32::new(0));

    let counter = finished.clone();
    let signal = TaskBuilder::new("Work")
        .instances(64)
        .run(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    signal.wait_spin_infinite();
    assert_eq!(finished.load(Ordering::SeqCst), 64);
}

#[test]
fn task_waits_for_single_signal() {
    let gate = Signal::create(1, "gate");
    let ran = Arc::new(AtomicBool::new(false));

    let flag = ran.clone();
    let done = TaskBuilder::new("Gated")
        .wait_for(gate)
        .run(move |_ctx| {
            flag.store(true, Ordering::SeqCst);
        });

    // the task must not start while the gate is closed
    std::thread::sleep(Duration::from_millis(30));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!done.finished());

    gate.trip();
    done.wait_spin_infinite();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn task_waits_for_all_signals() {
    let first = Signal::create(1, "first");
    let second = Signal::create(1, "second");
    let ran = Arc::new(AtomicBool::new(false));

    let flag = ran.clone();
    let done = TaskBuilder::new("Gated")
        .wait_for_all(&[first, second])
        .run(move |_ctx| {
            flag.store(true, Ordering::SeqCst);
        });

    first.trip();
    std::thread::sleep(Duration::from_millis(30));
    assert!(!ran.load(Ordering::SeqCst));

    second.trip();
    done.wait_spin_infinite();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn task_notifies_extra_signals_on_completion() {
    let notified = Signal::create(1, "notified");

    let done = TaskBuilder::new("Notifier")
        .notify(notified)
        .run(move |_ctx| {});

    done.wait_spin_infinite();
    notified.wait_spin_infinite();
    assert!(notified.finished());
}

#[test]
fn task_chain_through_signals() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let first_log = order.clone();
    let first = TaskBuilder::new("First").run(move |_ctx| {
        first_log.lock().push(1);
    });

    let second_log = order.clone();
    let second = TaskBuilder::new("Second")
        .wait_for(first)
        .run(move |_ctx| {
            second_log.lock().push(2);
        });

    let third_log = order.clone();
    let third = TaskBuilder::new("Third")
        .wait_for(second)
        .run(move |_ctx| {
            third_log.lock().push(3);
        });

    third.wait_spin_infinite();
    assert_eq!(*order.lock(), vec![1, 2, 3]);
}

#[test]
fn yield_inside_task_resumes_after_trip() {
    let gate = Signal::create(1, "gate");
    let resumed = Arc::new(AtomicBool::new(false));

    let flag = resumed.clone();
    let done = TaskBuilder::new("Yielder").run(move |ctx| {
        gate.wait_with_yield(ctx);
        flag.store(true, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(30));
    assert!(!resumed.load(Ordering::SeqCst));

    gate.trip();
    done.wait_spin_infinite();
    assert!(resumed.load(Ordering::SeqCst));
}

#[test]
fn stolen_completion_signal_is_not_auto_tripped() {
    let stolen_slot = Arc::new(parking_lot::Mutex::new(None));
    let body_done = Arc::new(AtomicBool::new(false));

    let slot = stolen_slot.clone();
    let flag = body_done.clone();
    let done = TaskBuilder::new("Stealer").run(move |ctx| {
        // the task takes over responsibility for tripping its own signal
        *slot.lock() = Some(Signal::steal(ctx));
        flag.store(true, Ordering::SeqCst);
    });

    while !body_done.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(1));
    }
    std::thread::sleep(Duration::from_millis(30));
    assert!(!done.finished(), "scheduler auto-tripped a stolen signal");

    let stolen = stolen_slot.lock().take().unwrap();
    assert_eq!(stolen, done);

    stolen.trip();
    assert!(done.finished());
}

#[test]
fn background_scheduler_runs_tasks() {
    let ran = Arc::new(AtomicBool::new(false));

    let flag = ran.clone();
    let done = TaskBuilder::new("Background")
        .scheduler(ember_core::task::background_scheduler())
        .run(move |_ctx| {
            flag.store(true, Ordering::SeqCst);
        });

    done.wait_spin_infinite();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn ambient_context_waits_for_task() {
    let done = TaskBuilder::new("Plain").run(move |_ctx| {
        spin_for(Duration::from_millis(1));
    });

    let ctx = ambient_context();
    done.wait_with_yield(&ctx);
    assert!(done.finished());
}
