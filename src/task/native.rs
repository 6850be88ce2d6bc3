// # Native-Thread Scheduler
//
// Worker pool over a grouped priority queue. Workers pop task instances with
// a predicate that honors per-task concurrency caps: an instance blocked by
// its cap bumps a shared spin counter, and whichever worker later frees a
// slot releases that many semaphore permits so the blocked workers re-poll.
//
// Yielded tasks park their worker on a pooled auto-reset event; the worker
// does not pick up unrelated work until the event fires.

use crate::containers::{GroupQueue, PeekResult};
use crate::sync::{Event, EventType, Semaphore};
use crate::task::entry::{TaskContext, TaskEntry, TaskYielder};
use crate::task::scheduler::TaskScheduler;
use crate::task::signal::Signal;
use parking_lot::Mutex;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Worker poll interval while the queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Thread priority of a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPriority {
    Normal,
    BelowNormal,
}

// ============================================================================
// Event pool
// ============================================================================

/// Pool of reusable one-shot events for task yields.
pub(crate) struct EventPool {
    free: Mutex<Vec<Arc<Event>>>,
}

const MAX_POOLED_EVENTS: usize = 256;

impl EventPool {
    fn new() -> Self {
        let mut free = Vec::with_capacity(64);
        for _ in 0..64 {
            free.push(Arc::new(Event::new(EventType::AutomaticReset)));
        }
        Self {
            free: Mutex::new(free),
        }
    }

    fn alloc(&self) -> Arc<Event> {
        if let Some(event) = self.free.lock().pop() {
            return event;
        }
        Arc::new(Event::new(EventType::AutomaticReset))
    }

    fn free(&self, event: Arc<Event>) {
        let mut free = self.free.lock();
        if free.len() < MAX_POOLED_EVENTS {
            free.push(event);
        }
    }
}

// ============================================================================
// Task queue
// ============================================================================

/// The workload queue shared by all workers of one scheduler.
pub(crate) struct TaskQueue {
    group_counter: AtomicU64,
    spin_counter: AtomicU32,
    queue: Mutex<GroupQueue<Arc<TaskEntry>>>,
    semaphore: Semaphore,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            group_counter: AtomicU64::new(1),
            spin_counter: AtomicU32::new(0),
            queue: Mutex::new(GroupQueue::new()),
            semaphore: Semaphore::new(0),
        }
    }

    pub(crate) fn schedule_task(&self, entry: Arc<TaskEntry>) {
        // floating tasks get a fresh group so they queue behind older work
        if entry.group.load(Ordering::Relaxed) == 0 {
            let group = self.group_counter.fetch_add(1, Ordering::Relaxed);
            entry.group.store(group, Ordering::Relaxed);
        }

        let instances = entry.instances as usize;
        let order = entry.group.load(Ordering::Relaxed);
        tracing::trace!(task = entry.name, group = order, instances, "task scheduled");

        {
            let mut queue = self.queue.lock();
            queue.push(entry, order);
        }

        self.semaphore.release(instances);
    }

    fn pop_task(&self) -> Option<(Arc<TaskEntry>, u32)> {
        if let Some(work) = self.pop_task_locked() {
            return Some(work);
        }

        self.semaphore.acquire_timeout(IDLE_POLL);

        self.pop_task_locked()
    }

    fn pop_task_locked(&self) -> Option<(Arc<TaskEntry>, u32)> {
        let mut out = None;

        let mut queue = self.queue.lock();
        queue.peek(|entry| {
            fence(Ordering::Acquire);

            // task is at maximum concurrency; skip it and record the skip so
            // a finishing instance can wake us again
            if entry.active.load(Ordering::Relaxed) >= entry.concurrency {
                self.spin_counter.fetch_add(1, Ordering::Relaxed);
                return PeekResult::Continue;
            }

            let instance_index = entry.scheduled.fetch_add(1, Ordering::Relaxed);
            debug_assert!(instance_index < entry.instances);

            entry.active.fetch_add(1, Ordering::Relaxed);
            fence(Ordering::Release);

            out = Some((entry.clone(), instance_index));

            if instance_index == entry.instances - 1 {
                // last instance claimed; the entry leaves the queue
                PeekResult::Remove
            } else {
                PeekResult::Keep
            }
        });

        out
    }

    fn finish_task(&self, entry: &Arc<TaskEntry>) {
        // unblock workers that skipped this task while it sat at its cap
        let new_active = entry.active.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(new_active < entry.concurrency);

        let skipped = self.spin_counter.swap(0, Ordering::Relaxed);
        if skipped > 0 {
            self.semaphore.release(skipped as usize);
        }

        // NOTE: keep last; tripping the signal may schedule more work and the
        // entry may be dropped right after
        if entry.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug_assert_eq!(
                entry.scheduled.load(Ordering::Relaxed),
                entry.instances,
                "all instances must have been claimed"
            );

            let signal = entry.completion_signal();
            if !signal.is_empty() {
                signal.trip();
            }
        }
    }
}

// ============================================================================
// Worker threads
// ============================================================================

struct WorkerYielder {
    events: Arc<EventPool>,
}

impl TaskYielder for WorkerYielder {
    fn yield_and_wait(&self, signal: Signal) {
        let event = self.events.alloc();

        let trigger = event.clone();
        signal.register_completion_callback(move || {
            trigger.trigger();
        });

        event.wait(); // blocks this worker thread
        self.events.free(event);
    }
}

fn worker_main(
    queue: Arc<TaskQueue>,
    events: Arc<EventPool>,
    exit: Arc<AtomicBool>,
    name: String,
) {
    tracing::trace!(worker = %name, "worker thread started");

    let yielder = WorkerYielder { events };
    let started = Instant::now();
    let mut tasks_run = 0u64;
    let mut busy = Duration::ZERO;

    while !exit.load(Ordering::Relaxed) {
        if let Some((entry, instance_index)) = queue.pop_task() {
            let task_start = Instant::now();

            let mut ctx = TaskContext::new(
                entry.group.load(Ordering::Relaxed),
                entry.completion_signal(),
                &yielder,
            );

            // task bodies run to completion; a panic takes the whole process
            // down rather than leaving the completion signal untripped
            let body = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (entry.func)(&mut ctx, instance_index);
            }));
            if body.is_err() {
                tracing::error!(task = entry.name, "task body panicked, aborting");
                std::process::abort();
            }

            // write the signal slot back so a steal inside the body sticks
            entry.signal.store(ctx.completion_signal.raw(), Ordering::Release);

            queue.finish_task(&entry);

            busy += task_start.elapsed();
            tasks_run += 1;
        }
    }

    tracing::trace!(
        worker = %name,
        tasks = tasks_run,
        busy_ms = busy.as_millis() as u64,
        alive_ms = started.elapsed().as_millis() as u64,
        "worker thread finished"
    );
}

// ============================================================================
// Platform thread tuning
// ============================================================================

#[cfg(target_os = "linux")]
fn apply_thread_tuning(priority: ThreadPriority, affinity: Option<usize>) {
    if priority == ThreadPriority::BelowNormal {
        unsafe {
            let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
            libc::setpriority(libc::PRIO_PROCESS as _, tid, 10);
        }
    }

    if let Some(core) = affinity {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(core, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        }
    }
}

#[cfg(windows)]
fn apply_thread_tuning(priority: ThreadPriority, affinity: Option<usize>) {
    use windows_sys::Win32::System::Threading::{
        GetCurrentThread, SetThreadAffinityMask, SetThreadPriority,
        THREAD_PRIORITY_BELOW_NORMAL,
    };

    unsafe {
        if priority == ThreadPriority::BelowNormal {
            SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_BELOW_NORMAL);
        }
        if let Some(core) = affinity {
            SetThreadAffinityMask(GetCurrentThread(), 1usize << core);
        }
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
fn apply_thread_tuning(_priority: ThreadPriority, _affinity: Option<usize>) {}

// ============================================================================
// Scheduler
// ============================================================================

/// Scheduler backed by a pool of native worker threads.
pub struct NativeThreadScheduler {
    queue: Arc<TaskQueue>,
    exit: Arc<AtomicBool>,
    threads: Vec<std::thread::JoinHandle<()>>,
}

impl NativeThreadScheduler {
    pub fn new(num_threads: u32, priority: ThreadPriority, assign_affinity: bool) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let events = Arc::new(EventPool::new());
        let exit = Arc::new(AtomicBool::new(false));

        // cores 0 and 5 are left for the main and render threads
        const RESERVED_CORES: [usize; 2] = [0, 5];

        let affinities: Vec<Option<usize>> = if assign_affinity {
            let cores = num_cpus::get();
            let mut picked = Vec::new();
            for core in 0..cores {
                if picked.len() >= num_threads as usize {
                    break;
                }
                if !RESERVED_CORES.contains(&core) {
                    picked.push(Some(core));
                }
            }
            while picked.len() < num_threads as usize {
                picked.push(None);
            }
            picked
        } else {
            vec![None; num_threads as usize]
        };

        let prefix = match priority {
            ThreadPriority::Normal => "worker",
            ThreadPriority::BelowNormal => "background",
        };

        let mut threads = Vec::with_capacity(num_threads as usize);
        for (index, affinity) in affinities.into_iter().enumerate() {
            let name = format!("{}-{}", prefix, index);
            let thread_queue = queue.clone();
            let thread_events = events.clone();
            let thread_exit = exit.clone();
            let thread_name = name.clone();

            let handle = std::thread::Builder::new()
                .name(name)
                .stack_size(1 << 20)
                .spawn(move || {
                    apply_thread_tuning(priority, affinity);
                    worker_main(thread_queue, thread_events, thread_exit, thread_name);
                })
                .expect("failed to spawn task worker thread");

            threads.push(handle);
        }

        Self {
            queue,
            exit,
            threads,
        }
    }
}

impl TaskScheduler for NativeThreadScheduler {
    fn schedule_task(&self, entry: Arc<TaskEntry>) {
        self.queue.schedule_task(entry);
    }
}

impl Drop for NativeThreadScheduler {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::Relaxed);
        // wake every sleeper so exit is observed promptly
        self.queue.semaphore.release(self.threads.len().max(1) * 4);

        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
