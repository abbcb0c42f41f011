//! # Parallel Processing Utilities
//!
//! This module provides the host-side worker pool used for CPU fallback work,
//! the unit of work it runs, and helpers for splitting data into chunks.
//!
//! ## Components
//!
//! - `WorkerPool`: A growable pool of OS threads with per-job completion tracking
//! - `WorkItem`: A function/argument pair submitted to the pool
//! - `MultiThreader`: Splits a range or a byte buffer across the pool

use std::any::Any;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

// Submodules
mod multi_threader;
mod thread_pool;

// Public exports
pub use multi_threader::MultiThreader;
pub use thread_pool::WorkerPool;

/// Identifier the pool assigns to a submitted job.
pub type JobId = i64;

/// Id carried by a work item that has not been submitted yet.
pub const UNASSIGNED_JOB: JobId = -1;

/// Index of a worker thread in the pool's thread table.
pub type WorkerId = usize;

/// Opaque argument passed through to a work function.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Function run by a worker.
pub type WorkFunction = Arc<dyn Fn(&UserData) + Send + Sync>;

/// A unit of work: a function and the argument it is called with.
///
/// The pool never looks inside the argument. Submitting clones the item into
/// the pool's queue; the caller's copy keeps `id == UNASSIGNED_JOB`.
#[derive(Clone)]
pub struct WorkItem {
    /// Job id, `UNASSIGNED_JOB` until submitted
    pub id: JobId,
    /// Taken off the pending queue by a worker
    pub assigned: bool,
    /// Function has returned
    pub executed: bool,
    function: WorkFunction,
    argument: UserData,
}

impl WorkItem {
    /// Creates a work item from a function and its argument.
    pub fn new(function: WorkFunction, argument: UserData) -> Self {
        Self {
            id: UNASSIGNED_JOB,
            assigned: false,
            executed: false,
            function,
            argument,
        }
    }

    /// Creates a work item from a closure that takes no argument.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(Arc::new(move |_: &UserData| f()), Arc::new(()))
    }

    /// Creates a work item whose function receives a typed argument.
    pub fn with_argument<T, F>(argument: T, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self::new(
            Arc::new(move |data: &UserData| {
                if let Some(value) = data.downcast_ref::<T>() {
                    f(value);
                }
            }),
            Arc::new(argument),
        )
    }

    /// Argument passed to the function.
    pub fn argument(&self) -> &UserData {
        &self.argument
    }

    /// Whether the item has not been submitted.
    pub fn is_unassigned(&self) -> bool {
        self.id == UNASSIGNED_JOB
    }

    pub(crate) fn execute(&self) {
        (self.function)(&self.argument)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("assigned", &self.assigned)
            .field("executed", &self.executed)
            .finish()
    }
}

/// What a worker thread is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, never checked for work yet
    JustAdded,
    /// Idle and eligible for the next submitted job
    Free,
    /// Bound to a job
    Running(JobId),
    /// Exited during shutdown
    Terminated,
}

/// Returned by `submit`; identifies the job to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    /// Id assigned to the job
    pub id: JobId,
    /// Worker the job was bound to at submission
    pub worker: WorkerId,
}

/// Statistics for parallel processing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParallelStats {
    /// Number of tasks executed
    pub tasks_executed: usize,
    /// Number of tasks queued
    pub tasks_queued: usize,
    /// Number of tasks completed
    pub tasks_completed: usize,
    /// Number of tasks failed
    pub tasks_failed: usize,
    /// Total processing time (ms)
    pub total_time_ms: f64,
    /// Average task time (ms)
    pub avg_task_time_ms: f64,
    /// Maximum task time (ms)
    pub max_task_time_ms: f64,
    /// Minimum task time (ms)
    pub min_task_time_ms: f64,
    /// Thread utilization (0.0-1.0)
    pub thread_utilization: f64,
}

impl ParallelStats {
    pub(crate) fn record(&mut self, elapsed: Duration, failed: bool) {
        let task_time_ms = elapsed.as_secs_f64() * 1000.0;
        self.tasks_executed += 1;
        if failed {
            self.tasks_failed += 1;
        } else {
            self.tasks_completed += 1;
        }
        self.total_time_ms += task_time_ms;

        if self.tasks_executed == 1 {
            self.avg_task_time_ms = task_time_ms;
            self.max_task_time_ms = task_time_ms;
            self.min_task_time_ms = task_time_ms;
        } else {
            self.avg_task_time_ms = self.total_time_ms / self.tasks_executed as f64;
            self.max_task_time_ms = self.max_task_time_ms.max(task_time_ms);
            self.min_task_time_ms = self.min_task_time_ms.min(task_time_ms);
        }
    }
}

/// Configuration for parallel processing.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Threads spawned when the pool is created (0 to grow on demand only)
    pub initial_threads: usize,
    /// Interval at which shutdown polls for pending work
    pub poll_interval: Duration,
    /// Drain deadline used when the pool is dropped
    pub shutdown_ceiling: Duration,
    /// Prefix for worker thread names
    pub thread_name_prefix: String,
    /// Number of chunks `MultiThreader` splits work into
    pub chunk_count: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            initial_threads: 0,
            poll_interval: Duration::from_millis(10),
            shutdown_ceiling: Duration::from_secs(2),
            thread_name_prefix: "coherex-worker".to_string(),
            chunk_count: num_cpus::get(),
        }
    }
}

/// Splits `range` into at most `chunk_count` contiguous, non-empty sub-ranges.
pub fn split_range(range: Range<usize>, chunk_count: usize) -> Vec<Range<usize>> {
    let len = range.end.saturating_sub(range.start);
    if len == 0 {
        return Vec::new();
    }
    let chunk_count = chunk_count.clamp(1, len);
    let chunk_size = len.div_ceil(chunk_count);

    (0..chunk_count)
        .map(|i| {
            let start = range.start + i * chunk_size;
            start..(start + chunk_size).min(range.end)
        })
        .filter(|r| !r.is_empty())
        .collect()
}

/// A utility for splitting data into chunks for parallel processing.
pub fn split_for_parallel(data: &[u8], chunk_count: usize) -> Vec<Vec<u8>> {
    split_range(0..data.len(), chunk_count)
        .into_iter()
        .map(|r| data[r].to_vec())
        .collect()
}

/// A utility for merging results from parallel processing.
pub fn merge_parallel_results(results: Vec<Vec<u8>>) -> Vec<u8> {
    let total_size: usize = results.iter().map(|r| r.len()).sum();
    let mut merged = Vec::with_capacity(total_size);

    for result in results {
        merged.extend_from_slice(&result);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_split_range_covers_input() {
        let chunks = split_range(3..20, 4);
        assert_eq!(chunks, vec![3..8, 8..13, 13..18, 18..20]);
        assert_eq!(split_range(0..3, 8).len(), 3);
        assert!(split_range(5..5, 4).is_empty());
        assert_eq!(split_range(0..10, 0), vec![0..10]);
    }

    #[test]
    fn test_split_and_merge() {
        let data: Vec<u8> = (0..100).collect();
        let chunks = split_for_parallel(&data, 7);
        assert!(chunks.len() <= 7);
        assert_eq!(merge_parallel_results(chunks), data);
    }

    #[test]
    fn test_work_item_argument_passthrough() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let item = WorkItem::with_argument(5usize, move |n: &usize| {
            counter.fetch_add(*n, Ordering::SeqCst);
        });
        assert!(item.is_unassigned());

        let copy = item.clone();
        copy.execute();
        item.execute();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert!(item.argument().downcast_ref::<usize>().is_some());
    }

    #[test]
    fn test_stats_record() {
        let mut stats = ParallelStats::default();
        stats.record(Duration::from_millis(4), false);
        stats.record(Duration::from_millis(2), true);
        assert_eq!(stats.tasks_executed, 2);
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.tasks_failed, 1);
        assert!(stats.max_task_time_ms >= stats.min_task_time_ms);
    }
}
