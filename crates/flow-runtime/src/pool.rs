//! Shared worker pool.
//!
//! All node computation and all edge propagation run as tasks on a fixed
//! set of worker threads. Workers pop from a local queue first, then steal
//! from the shared injector and from each other. There is no task-level
//! cancellation; a task runs to completion and `wait` blocks until the
//! pool is idle.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::{Condvar, Mutex};

use flow_core::{flow_sched, panic_message};

type Task = Box<dyn FnOnce() + Send + 'static>;

const PARK_TIMEOUT: Duration = Duration::from_millis(50);

struct PoolShared {
    injector: Injector<Task>,
    stealers: Vec<Stealer<Task>>,

    /// Tasks queued or running. Incremented before a push so a cascading
    /// task that spawns further work never lets the count touch zero early.
    pending: AtomicUsize,
    shutdown: AtomicBool,

    idle_mutex: Mutex<()>,
    idle_signal: Condvar,

    sleep_mutex: Mutex<()>,
    work_signal: Condvar,
}

/// Fixed-size pool of worker threads executing submitted tasks.
pub struct TaskPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl TaskPool {
    /// Creates a pool with the given number of worker threads.
    pub fn new(workers: usize) -> Self {
        let worker_count = workers.max(1);

        let locals: Vec<Worker<Task>> = (0..worker_count).map(|_| Worker::new_fifo()).collect();
        let stealers = locals.iter().map(Worker::stealer).collect();

        let shared = Arc::new(PoolShared {
            injector: Injector::new(),
            stealers,
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            idle_mutex: Mutex::new(()),
            idle_signal: Condvar::new(),
            sleep_mutex: Mutex::new(()),
            work_signal: Condvar::new(),
        });

        let handles = locals
            .into_iter()
            .enumerate()
            .map(|(index, local)| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("flow-worker-{index}"))
                    .spawn(move || worker_loop(index, local, shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        flow_sched!(debug, workers = worker_count, "worker pool started");

        Self {
            shared,
            workers: Mutex::new(handles),
            worker_count,
        }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Enqueues a unit of work.
    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.injector.push(Box::new(task));
        self.shared.work_signal.notify_one();
    }

    /// Enqueues one task per index in `[first, last)`.
    pub fn add_sequence_task(
        &self,
        first: u64,
        last: u64,
        task: impl Fn(u64) + Send + Sync + 'static,
    ) {
        let task = Arc::new(task);
        for index in first..last {
            let task = Arc::clone(&task);
            self.add_task(move || task(index));
        }
    }

    /// Splits `[first, last)` into blocks and enqueues one task per block,
    /// invoking the callback once per index. Zero blocks means one block
    /// per worker.
    pub fn add_loop_task(
        &self,
        first: u64,
        last: u64,
        task: impl Fn(u64) + Send + Sync + 'static,
        num_blocks: usize,
    ) {
        let task = Arc::new(task);
        for (start, end) in split_blocks(first, last, self.block_count(num_blocks)) {
            let task = Arc::clone(&task);
            self.add_task(move || {
                for index in start..end {
                    task(index);
                }
            });
        }
    }

    /// Splits `[first, last)` into blocks and enqueues one task per block,
    /// invoking the callback once per `(start, end)` range. Zero blocks
    /// means one block per worker.
    pub fn add_blocks_task(
        &self,
        first: u64,
        last: u64,
        task: impl Fn(u64, u64) + Send + Sync + 'static,
        num_blocks: usize,
    ) {
        let task = Arc::new(task);
        for (start, end) in split_blocks(first, last, self.block_count(num_blocks)) {
            let task = Arc::clone(&task);
            self.add_task(move || task(start, end));
        }
    }

    /// Blocks until every queued task has finished.
    pub fn wait(&self) {
        let mut guard = self.shared.idle_mutex.lock();
        while self.shared.pending.load(Ordering::SeqCst) != 0 {
            self.shared.idle_signal.wait(&mut guard);
        }
    }

    fn block_count(&self, num_blocks: usize) -> usize {
        if num_blocks == 0 {
            self.worker_count
        } else {
            num_blocks
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.wait();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let _guard = self.shared.sleep_mutex.lock();
        }
        self.shared.work_signal.notify_all();

        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        flow_sched!(debug, "worker pool stopped");
    }
}

fn split_blocks(first: u64, last: u64, num_blocks: usize) -> Vec<(u64, u64)> {
    if last <= first {
        return Vec::new();
    }

    let total = last - first;
    let blocks = (num_blocks.max(1) as u64).min(total);
    let base = total / blocks;
    let remainder = total % blocks;

    let mut ranges = Vec::with_capacity(blocks as usize);
    let mut start = first;
    for block in 0..blocks {
        let size = base + u64::from(block < remainder);
        ranges.push((start, start + size));
        start += size;
    }
    ranges
}

fn worker_loop(index: usize, local: Worker<Task>, shared: Arc<PoolShared>) {
    flow_sched!(trace, worker = index, "worker started");

    loop {
        match find_task(&local, &shared) {
            Some(task) => run_task(task, &shared),
            None => {
                if shared.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let mut guard = shared.sleep_mutex.lock();
                if shared.injector.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
                    let _ = shared.work_signal.wait_for(&mut guard, PARK_TIMEOUT);
                }
            }
        }
    }

    flow_sched!(trace, worker = index, "worker stopped");
}

fn find_task(local: &Worker<Task>, shared: &PoolShared) -> Option<Task> {
    local.pop().or_else(|| {
        std::iter::repeat_with(|| {
            shared
                .injector
                .steal_batch_and_pop(local)
                .or_else(|| shared.stealers.iter().map(Stealer::steal).collect())
        })
        .find(|steal| !steal.is_retry())
        .and_then(Steal::success)
    })
}

fn run_task(task: Task, shared: &PoolShared) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        flow_sched!(
            error,
            message = %panic_message(payload.as_ref()),
            "task panicked"
        );
    }

    if shared.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        let _guard = shared.idle_mutex.lock();
        shared.idle_signal.notify_all();
    }
}
