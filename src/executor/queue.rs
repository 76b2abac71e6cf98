//! Host-pumped dispatch target
//!
//! This is the kind of target a frame loop or UI thread would provide: posted
//! jobs pile up in an unbounded FIFO, and the owning thread periodically runs
//! them with `run_pending()`. While pumping, the queue is the thread's current
//! dispatch context, so continuations registered by pumped callbacks come back
//! to the same queue.

use super::{context, DispatchTarget, Job};
use crossbeam_channel::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::warn;


/// In-order job queue, drained by its owner
pub struct QueueTarget {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
}
//
impl QueueTarget {
    /// Create a new, empty queue
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Arc::new(QueueTarget { sender, receiver })
    }

    /// Number of jobs waiting to be run
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Run the jobs which were queued when this call started
    ///
    /// Jobs posted while pumping are left for the next call, as a frame loop
    /// would. Returns the number of jobs which were run.
    ///
    pub fn run_pending(self: &Arc<Self>) -> usize {
        let target: Arc<dyn DispatchTarget> = self.clone();
        let _guard = context::enter(target);
        let mut executed = 0;
        for _ in 0..self.receiver.len() {
            match self.receiver.try_recv() {
                Ok(job) => {
                    job();
                    executed += 1;
                },
                Err(_) => break,
            }
        }
        executed
    }
}
//
impl DispatchTarget for QueueTarget {
    fn post(&self, job: Job) {
        if let Err(error) = self.sender.send(job) {
            warn!("dispatch queue is closed, running job inline");
            (error.into_inner())();
        }
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Jobs run in posting order, on demand
    #[test]
    fn fifo_order() {
        let queue = QueueTarget::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for index in 0..4 {
            let log = log.clone();
            queue.post(Box::new(move || log.lock().push(index)));
        }
        assert_eq!(queue.pending(), 4);
        assert!(log.lock().is_empty());

        assert_eq!(queue.run_pending(), 4);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
        assert_eq!(queue.pending(), 0);
    }

    /// Jobs posted while pumping wait for the next pump, and pumped jobs see
    /// the queue as their current context
    #[test]
    fn reentrant_posting() {
        let queue = QueueTarget::new();
        let inner_queue = queue.clone();
        queue.post(Box::new(move || {
            let me: Arc<dyn DispatchTarget> = inner_queue.clone();
            assert!(context::is_current(&me));
            inner_queue.post(Box::new(|| {}));
        }));
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.run_pending(), 1);
        assert!(context::current().is_none());
    }
}
