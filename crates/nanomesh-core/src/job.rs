//! Job System
//!
//! Fixed-size worker pool consuming a shared task queue.
//! Features:
//! - One crossbeam channel feeding every worker
//! - Jobs declare a parallel chunk count; each chunk is an independent task
//! - Completion handles that can be polled or waited on
//! - Panics are contained to the job that raised them

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};

/// A unit of deferred work executed by the job system.
///
/// A job is split into `chunk_count` chunks; every chunk runs exactly once,
/// possibly on different workers at the same time.
pub trait Job: Send + Sync + 'static {
    /// Execute one chunk of the job
    fn execute(&self, chunk_index: u32, chunk_count: u32);

    /// Number of parallel chunks this job is split into
    fn chunk_count(&self) -> u32 {
        1
    }

    /// Get the job name for debugging
    fn name(&self) -> &str {
        "unnamed_job"
    }
}

/// Wrapper for closure-based jobs
struct ClosureJob<F: FnOnce() + Send + 'static> {
    func: Mutex<Option<F>>,
    name: &'static str,
}

impl<F: FnOnce() + Send + 'static> Job for ClosureJob<F> {
    fn execute(&self, _chunk_index: u32, _chunk_count: u32) {
        let func = self.func.lock().take();
        if let Some(func) = func {
            func();
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Shared completion state of a submitted job
#[derive(Debug)]
struct Completion {
    remaining: Mutex<u32>,
    done: Condvar,
}

impl Completion {
    fn new(chunks: u32) -> Self {
        Self {
            remaining: Mutex::new(chunks),
            done: Condvar::new(),
        }
    }

    fn finish_chunk(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.done.notify_all();
        }
    }
}

/// Handle to a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    completion: Arc<Completion>,
    id: u64,
}

impl JobHandle {
    /// Check if every chunk of the job has completed
    pub fn is_complete(&self) -> bool {
        *self.completion.remaining.lock() == 0
    }

    /// Block until the job has completed
    pub fn wait(&self) {
        let mut remaining = self.completion.remaining.lock();
        while *remaining > 0 {
            self.completion.done.wait(&mut remaining);
        }
    }

    /// Get the job ID
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// One chunk of a job as it travels through the queue
struct Task {
    job: Arc<dyn Job>,
    chunk_index: u32,
    chunk_count: u32,
    completion: Arc<Completion>,
}

/// Counts tasks in flight so callers can wait for the pool to drain
#[derive(Default)]
struct PendingTasks {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingTasks {
    fn add(&self, tasks: usize) {
        *self.count.lock() += tasks;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Fixed-size pool of worker threads
pub struct JobSystem {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<PendingTasks>,
    job_counter: AtomicU64,
    panicked: Arc<AtomicUsize>,
}

impl JobSystem {
    /// Create a new job system with the specified number of worker threads
    pub fn new(num_workers: usize) -> std::io::Result<Self> {
        let num_workers = num_workers.max(1);
        let (sender, receiver) = unbounded::<Task>();
        let pending = Arc::new(PendingTasks::default());
        let panicked = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let receiver = receiver.clone();
            let pending = pending.clone();
            let panicked = panicked.clone();
            let worker = thread::Builder::new()
                .name(format!("nanomesh-worker-{id}"))
                .spawn(move || worker_loop(receiver, pending, panicked))?;
            workers.push(worker);
        }

        log::debug!("job system started with {num_workers} workers");

        Ok(Self {
            sender: Some(sender),
            workers,
            pending,
            job_counter: AtomicU64::new(0),
            panicked,
        })
    }

    /// Create a job system sized to the rayon global pool
    pub fn with_default_workers() -> std::io::Result<Self> {
        Self::new(rayon::current_num_threads())
    }

    /// Get the number of worker threads
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Submit a job; every chunk is queued immediately
    pub fn submit<J: Job>(&self, job: J) -> JobHandle {
        self.submit_arc(Arc::new(job))
    }

    /// Submit a shared job
    pub fn submit_arc(&self, job: Arc<dyn Job>) -> JobHandle {
        let id = self.job_counter.fetch_add(1, Ordering::Relaxed);
        let chunk_count = job.chunk_count().max(1);
        let completion = Arc::new(Completion::new(chunk_count));

        if let Some(sender) = &self.sender {
            self.pending.add(chunk_count as usize);
            for chunk_index in 0..chunk_count {
                let task = Task {
                    job: job.clone(),
                    chunk_index,
                    chunk_count,
                    completion: completion.clone(),
                };
                if sender.send(task).is_err() {
                    // Workers are gone; nothing will ever run this chunk.
                    self.pending.finish();
                    completion.finish_chunk();
                }
            }
        }

        JobHandle { completion, id }
    }

    /// Submit a closure as a single-chunk job
    pub fn submit_fn<F>(&self, name: &'static str, func: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(ClosureJob {
            func: Mutex::new(Some(func)),
            name,
        })
    }

    /// Wait for all submitted jobs to complete
    pub fn wait_idle(&self) {
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.idle.wait(&mut count);
        }
    }

    /// Get the number of queued or running chunks
    pub fn pending_tasks(&self) -> usize {
        *self.pending.count.lock()
    }

    /// Number of chunks that panicked since the pool started
    pub fn panicked_tasks(&self) -> usize {
        self.panicked.load(Ordering::Relaxed)
    }
}

fn worker_loop(receiver: Receiver<Task>, pending: Arc<PendingTasks>, panicked: Arc<AtomicUsize>) {
    while let Ok(task) = receiver.recv() {
        let job = task.job.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            job.execute(task.chunk_index, task.chunk_count)
        }));
        if result.is_err() {
            panicked.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "job '{}' panicked in chunk {}/{}",
                task.job.name(),
                task.chunk_index,
                task.chunk_count
            );
        }
        task.completion.finish_chunk();
        pending.finish();
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        // Closing the channel lets every worker fall out of its loop.
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
