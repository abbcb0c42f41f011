//! Growable worker pool for host-side work.
//!
//! Threads are spawned on demand: a submission binds to a free worker when one
//! exists and spawns a new worker otherwise, so the thread count tracks peak
//! concurrent demand. Each submission gets a job id that can be waited on
//! independently of the worker that runs it.
//!
//! Shared state lives behind three locks (pending queue, active jobs, thread
//! table). No code path holds two of them at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex};

use super::{
    JobHandle, JobId, ParallelConfig, ParallelStats, WorkItem, WorkerId, WorkerState,
};
use crate::error::{Error, Result};

lazy_static! {
    static ref GLOBAL_POOL: Mutex<Option<Arc<WorkerPool>>> = Mutex::new(None);
}

/// A queued item and the worker it is reserved for.
struct PendingEntry {
    item: WorkItem,
    worker: WorkerId,
}

#[derive(Debug)]
enum JobFailure {
    Panicked(String),
    Abandoned,
}

#[derive(Default)]
struct ActiveJobs {
    ids: HashSet<JobId>,
    completed: usize,
    failed: HashMap<JobId, JobFailure>,
    stats: ParallelStats,
}

struct WorkerSlot {
    state: WorkerState,
    wakeup: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    queue: Mutex<VecDeque<PendingEntry>>,
    active: Mutex<ActiveJobs>,
    completion: Condvar,
    threads: Mutex<Vec<WorkerSlot>>,
    pending: AtomicUsize,
    next_id: AtomicI64,
    shutdown: AtomicBool,
    config: ParallelConfig,
}

impl Shared {
    fn take_reserved(&self, worker: WorkerId) -> Option<WorkItem> {
        let mut queue = self.queue.lock();
        let pos = queue.iter().position(|entry| entry.worker == worker)?;
        queue.remove(pos).map(|entry| {
            let mut item = entry.item;
            item.assigned = true;
            item
        })
    }

    fn set_state(&self, worker: WorkerId, state: WorkerState) {
        if let Some(slot) = self.threads.lock().get_mut(worker) {
            slot.state = state;
        }
    }

    fn complete(&self, id: JobId, elapsed: Duration, failure: Option<String>) {
        {
            let mut active = self.active.lock();
            if active.ids.remove(&id) {
                active.completed += 1;
                active.stats.record(elapsed, failure.is_some());
                if let Some(message) = failure {
                    active.failed.insert(id, JobFailure::Panicked(message));
                }
                // abandoned ids were already subtracted at shutdown
                self.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.completion.notify_all();
    }

    fn run_worker(self: Arc<Self>, worker: WorkerId, wakeup: Receiver<()>, first_job: Option<JobId>) {
        let mut expecting = first_job;
        tracing::trace!("Worker {} started", worker);

        loop {
            if let Some(mut item) = self.take_reserved(worker) {
                expecting = None;
                self.set_state(worker, WorkerState::Running(item.id));

                let started = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| item.execute()));
                item.executed = true;
                let failure = outcome.err().map(|payload| panic_message(payload.as_ref()));
                if let Some(message) = &failure {
                    tracing::error!("Job {} panicked on worker {}: {}", item.id, worker, message);
                }

                self.complete(item.id, started.elapsed(), failure);
                self.set_state(worker, WorkerState::Free);
                continue;
            }

            let exit = {
                let mut threads = self.threads.lock();
                let Some(slot) = threads.get_mut(worker) else {
                    break;
                };
                if slot.state == WorkerState::JustAdded && expecting.is_none() {
                    slot.state = WorkerState::Free;
                }
                if slot.state == WorkerState::Free && self.shutdown.load(Ordering::SeqCst) {
                    slot.state = WorkerState::Terminated;
                    true
                } else {
                    false
                }
            };
            if exit || wakeup.recv().is_err() {
                break;
            }
        }

        tracing::trace!("Worker {} exiting", worker);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Growable pool of OS worker threads.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Creates a pool, spawning `config.initial_threads` workers up front.
    pub fn new(config: ParallelConfig) -> Result<Self> {
        let initial = config.initial_threads;
        let pool = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                active: Mutex::new(ActiveJobs::default()),
                completion: Condvar::new(),
                threads: Mutex::new(Vec::new()),
                pending: AtomicUsize::new(0),
                next_id: AtomicI64::new(1),
                shutdown: AtomicBool::new(false),
                config,
            }),
        };
        if initial > 0 {
            pool.initialize_threads(initial)?;
        }
        Ok(pool)
    }

    /// Returns the process-wide pool, creating it with the default
    /// configuration on first use or after [`destroy_global`](Self::destroy_global).
    pub fn global() -> Result<Arc<Self>> {
        let mut global = GLOBAL_POOL.lock();
        if let Some(pool) = global.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(Self::new(ParallelConfig::default())?);
        *global = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Shuts down and forgets the process-wide pool. No-op when none exists.
    pub fn destroy_global(ceiling: Duration) -> Result<()> {
        let pool = GLOBAL_POOL.lock().take();
        match pool {
            Some(pool) => pool.destroy_pool(ceiling),
            None => Ok(()),
        }
    }

    /// Spawns `count` idle workers (at least one).
    pub fn initialize_threads(&self, count: usize) -> Result<()> {
        self.ensure_running()?;
        let mut threads = self.shared.threads.lock();
        for _ in 0..count.max(1) {
            let (_, slot) = self.spawn_worker(threads.len(), None)?;
            threads.push(slot);
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ThreadPoolShutdown(
                "Worker pool is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    fn spawn_worker(
        &self,
        worker: WorkerId,
        first_job: Option<JobId>,
    ) -> Result<(Sender<()>, WorkerSlot)> {
        let (wakeup, receiver) = unbounded();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.shared.config.thread_name_prefix, worker))
            .spawn(move || shared.run_worker(worker, receiver, first_job))
            .map_err(|e| Error::ThreadPool(format!("Failed to spawn worker thread: {}", e)))?;
        tracing::debug!("Spawned worker {}", worker);

        Ok((
            wakeup.clone(),
            WorkerSlot {
                state: WorkerState::JustAdded,
                wakeup,
                handle: Some(handle),
            },
        ))
    }

    /// Queues `item` and returns a handle to wait on.
    ///
    /// The item is bound to a free worker if one exists; otherwise a new worker
    /// is spawned for it.
    ///
    /// # Errors
    ///
    /// `ThreadPoolShutdown` once shutdown has begun, `ThreadPool` if a needed
    /// thread cannot be spawned.
    pub fn submit(&self, mut item: WorkItem) -> Result<JobHandle> {
        self.ensure_running()?;

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        item.id = id;
        item.assigned = false;
        item.executed = false;

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        {
            let mut active = self.shared.active.lock();
            active.ids.insert(id);
            active.stats.tasks_queued += 1;
        }

        let bound = {
            let mut threads = self.shared.threads.lock();
            match threads
                .iter()
                .position(|slot| slot.state == WorkerState::Free)
            {
                Some(worker) => {
                    let slot = &mut threads[worker];
                    slot.state = WorkerState::Running(id);
                    Ok((worker, slot.wakeup.clone()))
                }
                None => {
                    let worker = threads.len();
                    self.spawn_worker(worker, Some(id)).map(|(wakeup, slot)| {
                        threads.push(slot);
                        (worker, wakeup)
                    })
                }
            }
        };

        let (worker, wakeup) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.shared.active.lock().ids.remove(&id);
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.shared
            .queue
            .lock()
            .push_back(PendingEntry { item, worker });
        // a worker that already exited has dropped its receiver
        let _ = wakeup.send(());

        tracing::trace!("Job {} bound to worker {}", id, worker);
        Ok(JobHandle { id, worker })
    }

    /// Submits a closure as a work item.
    pub fn submit_fn<F>(&self, f: F) -> Result<JobHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.submit(WorkItem::from_fn(f))
    }

    /// Blocks until the job behind `handle` has finished.
    pub fn wait_for(&self, handle: &JobHandle) -> Result<()> {
        self.wait_for_job(handle.id)
    }

    /// Blocks until job `id` has finished.
    ///
    /// Returns immediately for a job that already finished.
    ///
    /// # Errors
    ///
    /// `UnknownJob` for an id this pool never issued, `JobPanicked` if the work
    /// function panicked, `JobAbandoned` if shutdown gave up on the job.
    pub fn wait_for_job(&self, id: JobId) -> Result<()> {
        if id < 1 || id >= self.shared.next_id.load(Ordering::SeqCst) {
            return Err(Error::UnknownJob(id));
        }

        let mut active = self.shared.active.lock();
        while active.ids.contains(&id) {
            self.shared.completion.wait(&mut active);
        }
        match active.failed.get(&id) {
            Some(JobFailure::Panicked(message)) => Err(Error::JobPanicked {
                id,
                message: message.clone(),
            }),
            Some(JobFailure::Abandoned) => Err(Error::JobAbandoned(id)),
            None => Ok(()),
        }
    }

    /// Waits for every handle, returning the first failure after all have finished.
    pub fn wait_for_all(&self, handles: &[JobHandle]) -> Result<()> {
        let mut first_error = None;
        for handle in handles {
            if let Err(e) = self.wait_for(handle) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Jobs finished so far, including ones whose function panicked.
    pub fn completed_count(&self) -> usize {
        self.shared.active.lock().completed
    }

    /// Jobs whose function panicked.
    pub fn failed_count(&self) -> usize {
        self.shared
            .active
            .lock()
            .failed
            .values()
            .filter(|f| matches!(f, JobFailure::Panicked(_)))
            .count()
    }

    /// Jobs submitted and not yet finished.
    pub fn pending_jobs(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Ids of jobs queued or running.
    pub fn active_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<_> = self.shared.active.lock().ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of tracked worker threads.
    pub fn thread_count(&self) -> usize {
        self.shared.threads.lock().len()
    }

    /// Snapshot of the thread table.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared.threads.lock().iter().map(|s| s.state).collect()
    }

    /// Whether shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Returns statistics for the pool.
    pub fn stats(&self) -> ParallelStats {
        let mut stats = self.shared.active.lock().stats.clone();
        let states = self.worker_states();
        if !states.is_empty() {
            let running = states
                .iter()
                .filter(|s| matches!(s, WorkerState::Running(_)))
                .count();
            stats.thread_utilization = running as f64 / states.len() as f64;
        }
        stats
    }

    /// Shuts the pool down, draining queued work for at most `ceiling`.
    ///
    /// New submissions are refused from the first instant. Pending work is
    /// polled every `poll_interval` until it reaches zero or the ceiling
    /// passes; workers are then woken and joined. Threads still busy at the
    /// deadline are detached, since a running thread cannot be stopped safely.
    /// Afterwards every table is empty and waiters on abandoned jobs get
    /// `JobAbandoned`.
    ///
    /// # Errors
    ///
    /// `ForcedShutdown` when the deadline left jobs unfinished or threads
    /// running.
    pub fn destroy_pool(&self, ceiling: Duration) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let interval = self.shared.config.poll_interval;
        let deadline = Instant::now() + ceiling;

        loop {
            if self.shared.pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(interval.min(deadline - now));
        }

        let handles: Vec<(WorkerId, JoinHandle<()>)> = {
            let mut threads = self.shared.threads.lock();
            threads
                .iter_mut()
                .enumerate()
                .filter_map(|(worker, slot)| {
                    let _ = slot.wakeup.send(());
                    slot.handle.take().map(|h| (worker, h))
                })
                .collect()
        };

        let join_deadline = deadline.max(Instant::now() + interval);
        let mut detached_threads = 0;
        for (worker, handle) in handles {
            while !handle.is_finished() && Instant::now() < join_deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::warn!("Worker {} exited abnormally", worker);
                }
            } else {
                tracing::warn!("Detaching worker {} still running at shutdown", worker);
                detached_threads += 1;
            }
        }

        let abandoned_jobs = {
            let mut active = self.shared.active.lock();
            let abandoned: Vec<JobId> = active.ids.drain().collect();
            for id in &abandoned {
                active.failed.insert(*id, JobFailure::Abandoned);
            }
            self.shared
                .pending
                .fetch_sub(abandoned.len(), Ordering::SeqCst);
            abandoned.len()
        };
        self.shared.completion.notify_all();
        self.shared.queue.lock().clear();
        self.shared.threads.lock().clear();

        if abandoned_jobs > 0 || detached_threads > 0 {
            tracing::warn!(
                "Worker pool forced down: {} job(s) abandoned, {} thread(s) detached",
                abandoned_jobs,
                detached_threads
            );
            return Err(Error::ForcedShutdown {
                abandoned_jobs,
                detached_threads,
            });
        }

        tracing::debug!("Worker pool shut down cleanly");
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            if let Err(e) = self.destroy_pool(self.shared.config.shutdown_ceiling) {
                tracing::warn!("Worker pool dropped: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.thread_count())
            .field("pending_jobs", &self.pending_jobs())
            .field("completed", &self.completed_count())
            .field("shutdown", &self.is_shutdown())
            .field("config", &self.shared.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> ParallelConfig {
        ParallelConfig {
            poll_interval: Duration::from_millis(5),
            ..ParallelConfig::default()
        }
    }

    #[test]
    fn test_completion_counting() {
        for k in [1usize, 2, 8, 64] {
            let pool = WorkerPool::new(test_config()).unwrap();
            let counter = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..k)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    pool.submit_fn(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
                })
                .collect();
            for handle in &handles {
                pool.wait_for(handle).unwrap();
            }

            assert_eq!(pool.completed_count(), k);
            assert_eq!(counter.load(Ordering::SeqCst), k);
            assert!(pool.thread_count() <= k);
            pool.destroy_pool(Duration::from_secs(1)).unwrap();
        }
    }

    #[test]
    fn test_four_jobs_spawn_at_most_four_threads() {
        let pool = WorkerPool::new(test_config()).unwrap();
        assert_eq!(pool.thread_count(), 0);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                pool.submit_fn(|| thread::sleep(Duration::from_millis(10)))
                    .unwrap()
            })
            .collect();
        assert!(pool.thread_count() >= 1 && pool.thread_count() <= 4);

        pool.wait_for_all(&handles).unwrap();
        assert_eq!(pool.completed_count(), 4);
        assert_eq!(pool.pending_jobs(), 0);
        assert!(pool.active_jobs().is_empty());
    }

    #[test]
    fn test_idle_shutdown_returns_promptly() {
        let pool = WorkerPool::new(ParallelConfig {
            initial_threads: 2,
            ..test_config()
        })
        .unwrap();
        let handle = pool.submit_fn(|| {}).unwrap();
        pool.wait_for(&handle).unwrap();

        let started = Instant::now();
        pool.destroy_pool(Duration::from_secs(1)).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));

        assert_eq!(pool.thread_count(), 0);
        assert_eq!(pool.pending_jobs(), 0);
        assert!(pool.active_jobs().is_empty());
        assert!(pool.worker_states().is_empty());
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let pool = WorkerPool::new(test_config()).unwrap();
        pool.destroy_pool(Duration::from_millis(50)).unwrap();
        assert!(matches!(
            pool.submit_fn(|| {}),
            Err(Error::ThreadPoolShutdown(_))
        ));
        // second teardown is harmless
        assert!(pool.destroy_pool(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn test_wait_semantics() {
        let pool = WorkerPool::new(test_config()).unwrap();
        assert!(matches!(pool.wait_for_job(0), Err(Error::UnknownJob(0))));
        assert!(matches!(pool.wait_for_job(1), Err(Error::UnknownJob(1))));

        let first = pool.submit_fn(|| {}).unwrap();
        assert_eq!(first.id, 1);
        pool.wait_for(&first).unwrap();
        // finished jobs can be waited on again
        pool.wait_for(&first).unwrap();

        // the same worker may run later jobs; waits stay keyed by id
        let second = pool.submit_fn(|| thread::sleep(Duration::from_millis(20))).unwrap();
        assert_eq!(second.id, 2);
        pool.wait_for(&second).unwrap();
        assert_eq!(pool.completed_count(), 2);
    }

    #[test]
    fn test_free_worker_is_reused() {
        let pool = WorkerPool::new(ParallelConfig {
            initial_threads: 1,
            ..test_config()
        })
        .unwrap();

        for _ in 0..10 {
            // a worker only takes new work once it has marked itself free
            let deadline = Instant::now() + Duration::from_secs(1);
            while pool.worker_states() != vec![WorkerState::Free] && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            let handle = pool.submit_fn(|| {}).unwrap();
            pool.wait_for(&handle).unwrap();
        }
        assert_eq!(pool.thread_count(), 1);
        assert_eq!(pool.completed_count(), 10);
    }

    #[test]
    fn test_panicking_job_is_recorded() {
        let pool = WorkerPool::new(test_config()).unwrap();
        let bad = pool.submit_fn(|| panic!("kernel fallback failed")).unwrap();
        let good = pool.submit_fn(|| {}).unwrap();

        match pool.wait_for(&bad) {
            Err(Error::JobPanicked { id, message }) => {
                assert_eq!(id, bad.id);
                assert!(message.contains("kernel fallback failed"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        pool.wait_for(&good).unwrap();
        assert_eq!(pool.completed_count(), 2);
        assert_eq!(pool.failed_count(), 1);
        assert_eq!(pool.stats().tasks_failed, 1);

        // the worker survives and takes more work
        let again = pool.submit_fn(|| {}).unwrap();
        pool.wait_for(&again).unwrap();
    }

    #[test]
    fn test_no_worker_bound_to_two_jobs() {
        let pool = Arc::new(WorkerPool::new(test_config()).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let observer = {
            let pool = Arc::clone(&pool);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    let running: Vec<JobId> = pool
                        .worker_states()
                        .into_iter()
                        .filter_map(|s| match s {
                            WorkerState::Running(id) => Some(id),
                            _ => None,
                        })
                        .collect();
                    let unique: HashSet<_> = running.iter().collect();
                    assert_eq!(unique.len(), running.len());
                    thread::yield_now();
                }
            })
        };

        let handles: Vec<_> = (0..200)
            .map(|i| {
                pool.submit_fn(move || {
                    if i % 7 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                })
                .unwrap()
            })
            .collect();
        pool.wait_for_all(&handles).unwrap();
        done.store(true, Ordering::SeqCst);
        observer.join().unwrap();

        assert_eq!(pool.completed_count(), 200);
    }

    #[test]
    fn test_forced_shutdown_reports_abandoned_work() {
        let pool = WorkerPool::new(test_config()).unwrap();
        let release = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&release);
        let stuck = pool
            .submit_fn(move || {
                while !gate.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();

        let started = Instant::now();
        let result = pool.destroy_pool(Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            result,
            Err(Error::ForcedShutdown {
                abandoned_jobs: 1,
                detached_threads: 1
            })
        ));
        assert!(matches!(pool.wait_for(&stuck), Err(Error::JobAbandoned(_))));
        assert_eq!(pool.thread_count(), 0);
        assert_eq!(pool.pending_jobs(), 0);
        assert!(pool.active_jobs().is_empty());

        // the detached worker finishing later must not touch the counters
        release.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(pool.pending_jobs(), 0);
        assert_eq!(pool.completed_count(), 0);
    }

    #[test]
    fn test_shutdown_drains_queued_work() {
        let pool = WorkerPool::new(test_config()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.submit_fn(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.destroy_pool(Duration::from_secs(2)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(pool.completed_count(), 8);
    }

    #[test]
    fn test_initialize_threads_minimum_one() {
        let pool = WorkerPool::new(test_config()).unwrap();
        pool.initialize_threads(0).unwrap();
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_global_pool_lifecycle() {
        let pool = WorkerPool::global().unwrap();
        let again = WorkerPool::global().unwrap();
        assert!(Arc::ptr_eq(&pool, &again));
        drop((pool, again));

        WorkerPool::destroy_global(Duration::from_secs(1)).unwrap();
        WorkerPool::destroy_global(Duration::from_secs(1)).unwrap();
    }
}
