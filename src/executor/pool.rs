//! Background worker pool
//!
//! A small set of threads fed through a channel, suitable as the background
//! dispatch target for callbacks which have no context to go back to. Workers
//! do not enter any dispatch context, so continuations registered from a
//! worker run wherever their antecedent completes.

use super::{DispatchTarget, Job};
use crossbeam_channel::{self, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};


/// Fixed-size pool of background threads
pub struct WorkerPool {
    /// Job submission channel, dropped to shut the workers down
    sender: Option<Sender<Job>>,

    /// Worker threads, joined on drop
    workers: Vec<JoinHandle<()>>,
}
//
impl WorkerPool {
    /// Spawn a pool with the requested number of workers (at least one)
    pub fn new(threads: usize) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..threads.max(1))
            .map(|index| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("async-ops-worker-{}", index))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
            })
            .collect::<io::Result<Vec<_>>>()?;
        debug!(workers = workers.len(), "worker pool started");
        Ok(WorkerPool { sender: Some(sender), workers })
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}
//
impl DispatchTarget for WorkerPool {
    fn post(&self, job: Job) {
        match &self.sender {
            Some(sender) => {
                if let Err(error) = sender.send(job) {
                    warn!("worker pool is gone, running job inline");
                    (error.into_inner())();
                }
            },
            None => job(),
        }
    }
}
//
impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        let me = thread::current().id();
        for worker in self.workers.drain(..) {
            // The last handle to the pool may be released by one of its own
            // jobs, and a thread cannot join itself
            if worker.thread().id() != me {
                let _ = worker.join();
            }
        }
    }
}
