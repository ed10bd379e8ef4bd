//! Worker-side queues: per-worker deques, the shared global deque, and the
//! work-stealing lookup order.

use crate::job::JobRecord;
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Queue state shared by all worker threads.
///
/// Submissions land on the global deque (front for high priorities). Each
/// worker prefers its own deque, then the global deque, then steals from the
/// back of a random victim under try-lock.
pub(crate) struct WorkerQueues {
    local: Vec<Mutex<VecDeque<Arc<JobRecord>>>>,
    global: Mutex<VecDeque<Arc<JobRecord>>>,
    available: Condvar,
    pending: AtomicUsize,
    active: AtomicUsize,
    shutdown: AtomicBool,
}

impl WorkerQueues {
    pub fn new(worker_count: usize) -> Self {
        let mut local = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            local.push(Mutex::new(VecDeque::new()));
        }
        Self {
            local,
            global: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            pending: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.local.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Flag shutdown and wake parked workers. Returns `true` when shutdown
    /// had already begun.
    pub fn begin_shutdown(&self) -> bool {
        let already = self.shutdown.swap(true, Ordering::AcqRel);
        self.available.notify_all();
        already
    }

    /// Enqueue on the shared deque; `priority_front` biases urgent work to
    /// the front.
    pub fn push_global(&self, job: Arc<JobRecord>, priority_front: bool) {
        if self.is_shut_down() {
            log::warn!("job '{}' enqueued after shutdown; dropping", job.name);
            return;
        }
        self.pending.fetch_add(1, Ordering::Relaxed);
        {
            let mut global = self.global.lock();
            if priority_front {
                global.push_front(job);
            } else {
                global.push_back(job);
            }
        }
        self.available.notify_one();
    }

    /// Lookup order for a worker: own deque front, global front, then steal.
    pub fn next_job(&self, worker_id: usize) -> Option<Arc<JobRecord>> {
        if let Some(job) = self.local[worker_id].lock().pop_front() {
            return Some(job);
        }
        if let Some(job) = self.global.lock().pop_front() {
            return Some(job);
        }
        self.try_steal(worker_id)
    }

    /// Steal from the back of a uniformly random victim's deque.
    ///
    /// Contended victims are skipped via try-lock; up to `worker_count`
    /// attempts before giving up.
    fn try_steal(&self, thief_id: usize) -> Option<Arc<JobRecord>> {
        let count = self.local.len();
        if count <= 1 {
            return None;
        }
        let mut rng = rand::rng();
        for _ in 0..count {
            let victim_id = rng.random_range(0..count);
            if victim_id == thief_id {
                continue;
            }
            if let Some(mut victim) = self.local[victim_id].try_lock() {
                if let Some(job) = victim.pop_back() {
                    return Some(job);
                }
            }
        }
        None
    }

    /// Park until work is available or shutdown begins. May return `None`
    /// spuriously; callers loop.
    pub fn park_for_work(&self) -> Option<Arc<JobRecord>> {
        let mut global = self.global.lock();
        while global.is_empty() && !self.is_shut_down() {
            self.available.wait(&mut global);
        }
        if self.is_shut_down() {
            return None;
        }
        global.pop_front()
    }

    pub fn begin_job(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish_job(&self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}
