// # Parallel-For Helpers
//
// Workload splitting with calling-thread participation: the caller runs a
// *main* sub-range inline while spawned task instances chew through the
// rest, then spin-waits for completion. Small workloads never touch the
// task system at all.

use crate::task::builder::TaskBuilder;
use crate::task::entry::TaskContext;
use crate::task::scheduler::max_task_concurrency;
use std::sync::Arc;

// ============================================================================
// Index range
// ============================================================================

/// Half-open index range `[first, first + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexRange {
    first: u64,
    count: u64,
}

impl IndexRange {
    pub const fn new(first: u64, count: u64) -> Self {
        Self { first, count }
    }

    #[inline]
    pub fn first(&self) -> u64 {
        self.first
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of blocks of `block_size` needed to cover the range.
    pub fn block_count(&self, block_size: u32) -> u64 {
        debug_assert!(block_size >= 1);
        self.count.div_ceil(block_size as u64)
    }

    /// The `index`-th block of `block_size` elements, clamped to the range.
    pub fn block_range(&self, block_size: u32, index: u64) -> IndexRange {
        let start = index * block_size as u64;
        debug_assert!(start < self.count);
        let count = (self.count - start).min(block_size as u64);
        IndexRange::new(self.first + start, count)
    }

    /// Iterate the indices of the range.
    pub fn iter(&self) -> std::ops::Range<u64> {
        self.first..(self.first + self.count)
    }
}

impl From<std::ops::Range<u64>> for IndexRange {
    fn from(range: std::ops::Range<u64>) -> Self {
        IndexRange::new(range.start, range.end.saturating_sub(range.start))
    }
}

// ============================================================================
// Workload splitting
// ============================================================================

/// Split `range` between the calling thread and spawned task instances.
/// Returns the main (inline) workload, the task workload and the task block
/// size. The two sub-ranges are disjoint and together cover the input.
pub(crate) fn calculate_for_workloads(
    range: IndexRange,
    block_size: u32,
    concurrency: u32,
) -> (IndexRange, IndexRange, u32) {
    let concurrency = concurrency.min(max_task_concurrency()).max(1);

    if range.size() <= block_size as u64 || concurrency == 1 {
        return (range, IndexRange::default(), 0);
    }

    let num_blocks = range.block_count(block_size);
    let blocks_per_worker = num_blocks / concurrency as u64;
    let remaining_blocks = num_blocks - blocks_per_worker * concurrency as u64;

    let main_blocks = blocks_per_worker + u64::from(remaining_blocks != 0);
    let main_elements = (main_blocks * block_size as u64).min(range.size());
    let main = IndexRange::new(range.first(), main_elements);

    if main_elements < range.size() {
        let tasks = IndexRange::new(range.first() + main_elements, range.size() - main_elements);
        (main, tasks, block_size)
    } else {
        (main, IndexRange::default(), 0)
    }
}

/// Element-wise split for `parallel_for_each`.
pub(crate) fn calculate_for_each_workloads(
    range: IndexRange,
    concurrency: u32,
) -> (IndexRange, IndexRange) {
    let concurrency = concurrency.min(max_task_concurrency()).max(1);

    if range.size() <= 1 || concurrency == 1 {
        return (range, IndexRange::default());
    }

    let per_worker = range.size() / concurrency as u64;
    let remaining = range.size() - per_worker * concurrency as u64;

    let main_elements = per_worker + u64::from(remaining != 0);
    let main = IndexRange::new(range.first(), main_elements);
    let tasks = IndexRange::new(range.first() + main_elements, range.size() - main_elements);
    (main, tasks)
}

// ============================================================================
// parallel_for / parallel_for_each
// ============================================================================

/// Run `body` over `range` in blocks of `block_size`, with at most
/// `concurrency` instances in flight. The caller thread always participates;
/// the call returns once the whole range has been processed.
pub fn parallel_for(
    range: IndexRange,
    block_size: u32,
    concurrency: u32,
    body: impl Fn(IndexRange) + Send + Sync + 'static,
) {
    parallel_for_inner(None, range, block_size, concurrency, Arc::new(body))
}

/// [`parallel_for`] inside an existing task context, so the spawned
/// instances share its dispatch group.
pub fn parallel_for_ctx(
    ctx: &TaskContext,
    range: IndexRange,
    block_size: u32,
    concurrency: u32,
    body: impl Fn(IndexRange) + Send + Sync + 'static,
) {
    parallel_for_inner(Some(ctx), range, block_size, concurrency, Arc::new(body))
}

fn parallel_for_inner(
    ctx: Option<&TaskContext>,
    range: IndexRange,
    block_size: u32,
    concurrency: u32,
    body: Arc<dyn Fn(IndexRange) + Send + Sync>,
) {
    debug_assert!(block_size >= 1, "block size can't be zero");
    let block_size = block_size.max(1);

    let (main, tasks, task_block) = calculate_for_workloads(range, block_size, concurrency);

    if tasks.is_empty() {
        if !main.is_empty() {
            body(main);
        }
        return;
    }

    let block_count = tasks.block_count(task_block) as u32;
    let builder = match ctx {
        Some(ctx) => TaskBuilder::in_context(ctx, "ParallelFor"),
        None => TaskBuilder::new("ParallelFor"),
    };
    let task_body = body.clone();
    let signal = builder
        .instances(block_count)
        .concurrency(concurrency)
        .run_indexed(move |_ctx, index| {
            task_body(tasks.block_range(task_block, index as u64));
        });

    if !main.is_empty() {
        body(main);
    }

    signal.wait_spin_infinite();
}

/// Run `body` once per index in `range` with at most `concurrency`
/// instances in flight; the caller thread always participates.
pub fn parallel_for_each(
    range: IndexRange,
    concurrency: u32,
    body: impl Fn(u64) + Send + Sync + 'static,
) {
    parallel_for_each_inner(None, range, concurrency, Arc::new(body))
}

/// [`parallel_for_each`] inside an existing task context.
pub fn parallel_for_each_ctx(
    ctx: &TaskContext,
    range: IndexRange,
    concurrency: u32,
    body: impl Fn(u64) + Send + Sync + 'static,
) {
    parallel_for_each_inner(Some(ctx), range, concurrency, Arc::new(body))
}

fn parallel_for_each_inner(
    ctx: Option<&TaskContext>,
    range: IndexRange,
    concurrency: u32,
    body: Arc<dyn Fn(u64) + Send + Sync>,
) {
    let (main, tasks) = calculate_for_each_workloads(range, concurrency);

    if tasks.is_empty() {
        for index in main.iter() {
            body(index);
        }
        return;
    }

    let first = tasks.first();
    let builder = match ctx {
        Some(ctx) => TaskBuilder::in_context(ctx, "ParallelForEach"),
        None => TaskBuilder::new("ParallelForEach"),
    };
    let task_body = body.clone();
    let signal = builder
        .instances(tasks.size() as u32)
        .concurrency(concurrency)
        .run_indexed(move |_ctx, index| {
            task_body(first + index as u64);
        });

    for index in main.iter() {
        body(index);
    }

    signal.wait_spin_infinite();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_math() {
        let range = IndexRange::new(0, 1000);
        assert_eq!(range.block_count(64), 16);
        assert_eq!(range.block_range(64, 0), IndexRange::new(0, 64));
        assert_eq!(range.block_range(64, 15), IndexRange::new(960, 40));
    }

    #[test]
    fn test_range_from_std_range() {
        let range: IndexRange = (10u64..30u64).into();
        assert_eq!(range.first(), 10);
        assert_eq!(range.size(), 20);
    }

    #[test]
    fn test_for_workloads_cover_input_disjointly() {
        for &(size, block, concurrency) in
            &[(1000u64, 64u32, 4u32), (10, 64, 4), (1024, 1, 8), (7, 2, 2)]
        {
            let range = IndexRange::new(100, size);
            let (main, tasks, task_block) = calculate_for_workloads(range, block, concurrency);

            assert_eq!(main.first(), range.first());
            assert_eq!(main.size() + tasks.size(), range.size());
            if !tasks.is_empty() {
                assert_eq!(tasks.first(), main.first() + main.size());
                assert!(task_block >= 1);
            }
        }
    }

    #[test]
    fn test_small_range_runs_inline_only() {
        let range = IndexRange::new(0, 10);
        let (main, tasks, _) = calculate_for_workloads(range, 64, 4);
        assert_eq!(main, range);
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_concurrency_one_runs_inline_only() {
        let range = IndexRange::new(0, 1000);
        let (main, tasks, _) = calculate_for_workloads(range, 64, 1);
        assert_eq!(main, range);
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_for_each_workloads_cover_input() {
        let range = IndexRange::new(5, 17);
        let (main, tasks) = calculate_for_each_workloads(range, 4);
        assert_eq!(main.first(), 5);
        assert_eq!(main.size() + tasks.size(), 17);
        if !tasks.is_empty() {
            assert_eq!(tasks.first(), main.first() + main.size());
        }
    }
}
