//! The job system: submission, dependency tracking, and completion
//! accounting over the worker pool and main-thread queue.

use crate::job::{JobCallback, JobContext, JobHandle, JobPriority, JobRecord, JobStatus, JobWork};
use crate::main_thread::MainThreadQueue;
use crate::pool::WorkerQueues;
use crate::signal::CompletionSignal;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JobError {
    #[error("unknown job handle {0}")]
    UnknownJob(u64),
}

#[derive(Debug, Clone, Copy)]
pub struct JobSystemConfig {
    /// Worker thread count; `0` selects `max(1, available_parallelism - 1)`.
    pub worker_threads: usize,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self { worker_threads: 0 }
    }
}

/// Parallel job scheduler with dependency tracking and a main-thread
/// affinity queue.
///
/// Construct with [`JobSystem::new`], submit through [`JobSystem::create_job`],
/// and have the host thread call [`JobSystem::process_main_thread_jobs`] once
/// per frame. Teardown is explicit via [`JobSystem::shutdown`] (also run on
/// drop).
pub struct JobSystem {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    jobs: RwLock<HashMap<JobHandle, Arc<JobRecord>>>,
    /// Reverse dependency map; the lock is held only across registration and
    /// the take-and-clear on completion.
    dependents: Mutex<HashMap<JobHandle, Vec<JobHandle>>>,
    next_handle: AtomicU64,
    queues: WorkerQueues,
    main_queue: MainThreadQueue,
}

impl JobSystem {
    pub fn new(config: JobSystemConfig) -> Self {
        let worker_count = if config.worker_threads == 0 {
            let hardware = thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
            hardware.saturating_sub(1).max(1)
        } else {
            config.worker_threads
        };

        log::info!("job system: starting {worker_count} worker threads");

        let inner = Arc::new(Inner {
            jobs: RwLock::new(HashMap::new()),
            dependents: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            queues: WorkerQueues::new(worker_count),
            main_queue: MainThreadQueue::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker_inner = inner.clone();
            let handle = thread::Builder::new()
                .name(format!("arbor-job-{worker_id}"))
                .spawn(move || worker_loop(worker_inner, worker_id))
                .expect("failed to spawn job worker thread");
            workers.push(handle);
        }

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    pub fn create_job(&self) -> JobBuilder<'_> {
        JobBuilder::new(self)
    }

    pub fn job_status(&self, handle: JobHandle) -> Option<JobStatus> {
        self.inner.job(handle).map(|record| record.status())
    }

    pub fn is_complete(&self, handle: JobHandle) -> bool {
        self.job_status(handle).is_some_and(|status| status.is_terminal())
    }

    /// Shareable completion signal for a submitted job.
    pub fn signal(&self, handle: JobHandle) -> Option<CompletionSignal> {
        self.inner.job(handle).map(|record| record.signal.clone())
    }

    /// Block until the job finishes; returns its success flag.
    ///
    /// Waiting on a main-thread job from the thread that drains the
    /// main-thread queue will deadlock; drain instead.
    pub fn wait(&self, handle: JobHandle) -> Result<bool, JobError> {
        let record = self.inner.job(handle).ok_or(JobError::UnknownJob(handle.raw()))?;
        Ok(record.signal.wait())
    }

    pub fn wait_all(&self, handles: &[JobHandle]) {
        for &handle in handles {
            if let Some(record) = self.inner.job(handle) {
                record.signal.wait();
            }
        }
    }

    /// Drain every queued main-thread job on the calling thread.
    pub fn process_main_thread_jobs(&self) -> usize {
        self.inner.drain_main_thread(usize::MAX)
    }

    /// Drain at most `max_jobs` main-thread jobs on the calling thread.
    pub fn process_main_thread_jobs_bounded(&self, max_jobs: usize) -> usize {
        self.inner.drain_main_thread(max_jobs)
    }

    /// Block until workers are idle and the main-thread queue is empty.
    ///
    /// Main-thread work is drained on the calling thread, so the barrier is
    /// safe to issue from the thread that owns the main-thread queue.
    pub fn barrier(&self) {
        self.inner.barrier();
    }

    pub fn worker_count(&self) -> usize {
        self.inner.queues.worker_count()
    }

    pub fn pending_job_count(&self) -> usize {
        self.inner.queues.pending_count() + self.inner.main_queue.pending_count()
    }

    /// Stop workers after their current job and drain the main-thread queue
    /// once. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.queues.begin_shutdown() {
            return;
        }
        log::info!("job system: shutting down");

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                log::error!("job system: worker thread panicked during shutdown");
            }
        }

        self.inner.drain_main_thread(usize::MAX);
        self.inner.jobs.write().clear();
        self.inner.dependents.lock().clear();

        log::info!("job system: shutdown complete");
    }

    fn submit(
        &self,
        name: String,
        work: Option<JobWork>,
        priority: JobPriority,
        context: JobContext,
        dependencies: SmallVec<[JobHandle; 4]>,
        on_complete: Option<JobCallback>,
    ) -> (JobHandle, CompletionSignal) {
        self.inner.submit(name, work, priority, context, dependencies, on_complete)
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn job(&self, handle: JobHandle) -> Option<Arc<JobRecord>> {
        self.jobs.read().get(&handle).cloned()
    }

    fn submit(
        &self,
        name: String,
        work: Option<JobWork>,
        priority: JobPriority,
        context: JobContext,
        dependencies: SmallVec<[JobHandle; 4]>,
        on_complete: Option<JobCallback>,
    ) -> (JobHandle, CompletionSignal) {
        if self.queues.is_shut_down() {
            log::warn!("job '{name}' submitted after shutdown; rejecting");
            let signal = CompletionSignal::new();
            signal.set(false);
            return (JobHandle::INVALID, signal);
        }

        let handle = JobHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(JobRecord::new(
            handle,
            name,
            work,
            priority,
            context,
            dependencies,
            on_complete,
        ));
        let signal = record.signal.clone();

        self.jobs.write().insert(handle, record.clone());

        for dependency in record.dependencies.clone() {
            let Some(dep_record) = self.job(dependency) else {
                continue;
            };
            // The status check happens under the dependents lock: a
            // concurrent completion either sees our registration when it
            // takes the list, or we observe its terminal status here.
            let mut map = self.dependents.lock();
            if dep_record.status().is_terminal() {
                continue;
            }
            map.entry(dependency).or_default().push(handle);
            record.unfinished.fetch_add(1, Ordering::AcqRel);
        }

        // Drop the submission guard; a zero count schedules immediately.
        self.release_dependency(&record);

        (handle, signal)
    }

    fn release_dependency(&self, record: &Arc<JobRecord>) {
        let remaining = record.unfinished.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            self.schedule(record.clone());
        }
    }

    fn schedule(&self, job: Arc<JobRecord>) {
        job.set_status(JobStatus::Ready);
        match job.context {
            JobContext::MainThread => self.main_queue.enqueue(job),
            JobContext::Worker => {
                let priority_front = job.priority >= JobPriority::High;
                self.queues.push_global(job, priority_front);
            }
        }
    }

    /// Run a job to completion on the current thread and release its
    /// dependents. Shared by workers and the main-thread drain.
    fn execute_job(&self, job: Arc<JobRecord>) {
        job.set_status(JobStatus::Running);

        let work = job.work.lock().take();
        let success = match work {
            Some(work) => match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(()) => true,
                Err(payload) => {
                    log::error!("job '{}' panicked: {}", job.name, panic_message(&payload));
                    false
                }
            },
            None => true,
        };

        job.set_status(if success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        });
        job.signal.set(success);

        if let Some(callback) = job.on_complete.lock().take() {
            let handle = job.handle;
            if panic::catch_unwind(AssertUnwindSafe(move || callback(handle, success))).is_err() {
                log::warn!("completion callback for job '{}' panicked", job.name);
            }
        }

        self.notify_job_complete(job.handle);
    }

    fn notify_job_complete(&self, completed: JobHandle) {
        let dependents = self.dependents.lock().remove(&completed).unwrap_or_default();
        for dependent in dependents {
            if let Some(record) = self.job(dependent) {
                self.release_dependency(&record);
            }
        }
    }

    fn drain_main_thread(&self, max_jobs: usize) -> usize {
        let batch = self.main_queue.pop_batch(max_jobs);
        let count = batch.len();
        for job in batch {
            self.execute_job(job);
        }
        count
    }

    fn barrier(&self) {
        loop {
            while self.queues.pending_count() > 0 || self.queues.active_count() > 0 {
                if self.queues.is_shut_down() {
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            if self.main_queue.has_pending() {
                self.drain_main_thread(usize::MAX);
                continue;
            }
            // Main-thread jobs may have submitted worker jobs; only exit once
            // both sides observe empty.
            if self.queues.pending_count() == 0 && self.queues.active_count() == 0 {
                break;
            }
        }
    }
}

fn worker_loop(inner: Arc<Inner>, worker_id: usize) {
    log::trace!("job worker {worker_id} started");
    loop {
        if inner.queues.is_shut_down() {
            break;
        }
        let job = inner
            .queues
            .next_job(worker_id)
            .or_else(|| inner.queues.park_for_work());
        let Some(job) = job else {
            continue;
        };
        inner.queues.begin_job();
        inner.execute_job(job);
        inner.queues.finish_job();
    }
    log::trace!("job worker {worker_id} exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Accumulates a job description and submits it once.
pub struct JobBuilder<'a> {
    system: &'a JobSystem,
    name: String,
    work: Option<JobWork>,
    priority: JobPriority,
    context: JobContext,
    dependencies: SmallVec<[JobHandle; 4]>,
    on_complete: Option<JobCallback>,
}

impl<'a> JobBuilder<'a> {
    fn new(system: &'a JobSystem) -> Self {
        Self {
            system,
            name: String::new(),
            work: None,
            priority: JobPriority::Normal,
            context: JobContext::Worker,
            dependencies: SmallVec::new(),
            on_complete: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn work(mut self, work: impl FnOnce() + Send + 'static) -> Self {
        self.work = Some(Box::new(work));
        self
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn context(mut self, context: JobContext) -> Self {
        self.context = context;
        self
    }

    /// Add a dependency; invalid handles are ignored.
    pub fn depends_on(mut self, dependency: JobHandle) -> Self {
        if dependency.is_valid() {
            self.dependencies.push(dependency);
        }
        self
    }

    pub fn depends_on_all(mut self, dependencies: &[JobHandle]) -> Self {
        for &dependency in dependencies {
            if dependency.is_valid() {
                self.dependencies.push(dependency);
            }
        }
        self
    }

    /// Runs on the executing thread after the completion signal resolves.
    /// Panics in the callback are swallowed.
    pub fn on_complete(mut self, callback: impl FnOnce(JobHandle, bool) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn submit(self) -> JobHandle {
        self.submit_with_signal().0
    }

    pub fn submit_with_signal(self) -> (JobHandle, CompletionSignal) {
        self.system.submit(
            self.name,
            self.work,
            self.priority,
            self.context,
            self.dependencies,
            self.on_complete,
        )
    }
}
