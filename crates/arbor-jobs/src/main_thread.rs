//! FIFO queue for jobs pinned to the host's main thread.

use crate::job::JobRecord;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

/// Channel from any submitting thread to the host's drain loop. Execution
/// itself is driven by the scheduler so completion accounting matches
/// worker jobs.
pub(crate) struct MainThreadQueue {
    sender: Sender<Arc<JobRecord>>,
    receiver: Receiver<Arc<JobRecord>>,
}

impl MainThreadQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn enqueue(&self, job: Arc<JobRecord>) {
        if self.sender.send(job).is_err() {
            log::error!("main-thread queue disconnected; job dropped");
        }
    }

    /// Take up to `max` jobs off the front, preserving submission order.
    pub fn pop_batch(&self, max: usize) -> Vec<Arc<JobRecord>> {
        self.receiver.try_iter().take(max).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.receiver.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}
