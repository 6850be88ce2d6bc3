// # Task System Front-End
//
// The process owns two worker pools: the main scheduler (normal priority,
// optional core pinning, about half the hardware threads) and a background
// scheduler (below-normal priority, about a quarter). Both are process-wide
// singletons with explicit init/shutdown; first use without an explicit init
// configures them from the environment.

use crate::error::{CoreError, Result};
use crate::task::entry::TaskEntry;
use crate::task::native::{NativeThreadScheduler, ThreadPriority};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Something that can run task entries.
pub trait TaskScheduler: Send + Sync {
    /// Schedule a task entry for execution.
    fn schedule_task(&self, entry: Arc<TaskEntry>);
}

// ============================================================================
// Configuration
// ============================================================================

/// Task system configuration, normally read from the environment.
#[derive(Debug, Clone, Default)]
pub struct TaskSystemConfig {
    /// Main pool worker count; defaults to about half the hardware threads.
    pub main_threads: Option<u32>,

    /// Disable core pinning for the main pool.
    pub no_affinities: bool,

    /// Skip the background pool entirely; background work then runs on the
    /// main pool.
    pub no_background_scheduler: bool,

    /// Background pool worker count; defaults to about a quarter of the
    /// hardware threads.
    pub background_threads: Option<u32>,
}

impl TaskSystemConfig {
    /// Read `taskThreads`, `taskNoAffinities`, `taskNoBackgroundScheduler`
    /// and `taskBackgroundThreads` from the environment.
    pub fn from_env() -> Self {
        fn env_u32(name: &str) -> Option<u32> {
            std::env::var(name).ok()?.parse().ok()
        }
        fn env_bool(name: &str) -> bool {
            match std::env::var(name) {
                Ok(value) => {
                    let value = value.trim().to_ascii_lowercase();
                    value == "1" || value == "true" || value == "yes"
                }
                Err(_) => false,
            }
        }

        Self {
            main_threads: env_u32("taskThreads"),
            no_affinities: env_bool("taskNoAffinities"),
            no_background_scheduler: env_bool("taskNoBackgroundScheduler"),
            background_threads: env_u32("taskBackgroundThreads"),
        }
    }
}

// ============================================================================
// Process-wide state
// ============================================================================

struct TaskSystem {
    main: Arc<NativeThreadScheduler>,
    background: Option<Arc<NativeThreadScheduler>>,
    max_concurrency: u32,
}

enum SystemState {
    Uninitialized,
    Running(Arc<TaskSystem>),
    Closed,
}

static TASK_SYSTEM: Lazy<Mutex<SystemState>> = Lazy::new(|| Mutex::new(SystemState::Uninitialized));

fn start(config: &TaskSystemConfig) -> Arc<TaskSystem> {
    let cores = num_cpus::get() as u32;

    let main_threads = config.main_threads.unwrap_or(cores / 2).max(1);
    let use_affinities = !config.no_affinities;
    tracing::info!(
        threads = main_threads,
        affinities = use_affinities,
        "task main scheduler starting"
    );

    let main = Arc::new(NativeThreadScheduler::new(
        main_threads,
        ThreadPriority::Normal,
        use_affinities,
    ));

    let background = if config.no_background_scheduler {
        None
    } else {
        let background_threads = config.background_threads.unwrap_or(cores / 4).max(1);
        tracing::info!(threads = background_threads, "task background scheduler starting");
        Some(Arc::new(NativeThreadScheduler::new(
            background_threads,
            ThreadPriority::BelowNormal,
            false,
        )))
    };

    Arc::new(TaskSystem {
        main,
        background,
        max_concurrency: main_threads,
    })
}

fn system() -> Arc<TaskSystem> {
    let mut state = TASK_SYSTEM.lock();
    match &*state {
        SystemState::Running(system) => system.clone(),
        SystemState::Uninitialized => {
            let system = start(&TaskSystemConfig::from_env());
            *state = SystemState::Running(system.clone());
            system
        }
        SystemState::Closed => {
            panic!("task system used after shutdown");
        }
    }
}

/// Bring up the worker pools with an explicit configuration. Fails if the
/// system is already live (including lazily, through first use).
pub fn init_task_system(config: &TaskSystemConfig) -> Result<()> {
    let mut state = TASK_SYSTEM.lock();
    match &*state {
        SystemState::Uninitialized => {
            *state = SystemState::Running(start(config));
            Ok(())
        }
        SystemState::Running(_) => Err(CoreError::ContractViolation(
            "task system is already initialized".into(),
        )),
        SystemState::Closed => Err(CoreError::ContractViolation(
            "task system was already shut down".into(),
        )),
    }
}

/// Stop the worker pools. Scheduling after shutdown is a contract violation.
pub fn shutdown_task_system() {
    let system = {
        let mut state = TASK_SYSTEM.lock();
        match std::mem::replace(&mut *state, SystemState::Closed) {
            SystemState::Running(system) => Some(system),
            _ => None,
        }
    };

    if let Some(system) = system {
        tracing::info!("closing task system");
        let started = Instant::now();

        drop(system);

        let elapsed = started.elapsed();
        if elapsed.as_millis() > 100 {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                "task system closed slowly, some threads were dangling"
            );
        } else {
            tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "task system closed");
        }
    }
}

/// The main worker pool.
pub fn main_scheduler() -> Arc<dyn TaskScheduler> {
    system().main.clone()
}

/// The background worker pool, or the main one when the background pool was
/// disabled.
pub fn background_scheduler() -> Arc<dyn TaskScheduler> {
    let system = system();
    match &system.background {
        Some(background) => background.clone(),
        None => system.main.clone(),
    }
}

/// Worker count of the main pool; the effective upper bound for task
/// concurrency requests.
pub fn max_task_concurrency() -> u32 {
    system().max_concurrency
}
