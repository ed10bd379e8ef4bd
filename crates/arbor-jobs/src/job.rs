//! Job metadata: handles, status words, and the scheduler-owned record.

use crate::signal::CompletionSignal;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

/// Opaque identity of a submitted job. `0` is reserved as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

impl JobHandle {
    pub const INVALID: JobHandle = JobHandle(0);

    pub(crate) fn from_raw(raw: u64) -> Self {
        JobHandle(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Scheduling preference. Higher priorities are pushed to the front of the
/// shared deque; work stealing may still reorder independent jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Which thread class a job may run on.
///
/// `MainThread` jobs run only when the host drains the main-thread queue;
/// they are the only way to touch GPU-owning state from the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobContext {
    #[default]
    Worker,
    MainThread,
}

/// Lifecycle of a job. Transitions are strictly left-to-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobStatus {
    Pending = 0,
    Ready = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn from_u8(value: u8) -> JobStatus {
        match value {
            0 => JobStatus::Pending,
            1 => JobStatus::Ready,
            2 => JobStatus::Running,
            3 => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

pub(crate) type JobWork = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type JobCallback = Box<dyn FnOnce(JobHandle, bool) + Send + 'static>;

/// Scheduler-owned record for one submitted job.
///
/// Status uses release stores and acquire loads so observers that see a
/// terminal status also see the work's side effects.
pub(crate) struct JobRecord {
    pub name: String,
    pub work: Mutex<Option<JobWork>>,
    pub priority: JobPriority,
    pub context: JobContext,
    pub dependencies: SmallVec<[JobHandle; 4]>,
    pub on_complete: Mutex<Option<JobCallback>>,
    pub handle: JobHandle,
    pub signal: CompletionSignal,
    status: AtomicU8,
    /// Count of unfinished dependencies plus a submission guard of one.
    /// The guard is released after dependency registration so concurrent
    /// completions cannot schedule the job early.
    pub unfinished: AtomicI32,
}

impl JobRecord {
    pub fn new(
        handle: JobHandle,
        name: String,
        work: Option<JobWork>,
        priority: JobPriority,
        context: JobContext,
        dependencies: SmallVec<[JobHandle; 4]>,
        on_complete: Option<JobCallback>,
    ) -> Self {
        Self {
            name,
            work: Mutex::new(work),
            priority,
            context,
            dependencies,
            on_complete: Mutex::new(on_complete),
            handle,
            signal: CompletionSignal::new(),
            status: AtomicU8::new(JobStatus::Pending as u8),
            unfinished: AtomicI32::new(1),
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: JobStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}
