//! Polling-based asynchronous operation monitoring
//!
//! This module provides a way to monitor asynchronous operations through
//! polling. It provides maximal performance in scenarios where a client does
//! not need to synchronize with an asynchronous operation, but only to
//! periodically check its status, as is the case for example when updating
//! progress bars and status graphs in user interfaces.
//!
//! The monitored operation publishes snapshots of its status and progress
//! through a triple buffer whenever its progress changes or it completes, so
//! reading them never contends with the operation's own lock. Dropping the
//! monitor stops publication.

use crate::callbacks::{CallbackId, CompletionCallback, ProgressCallback};
use crate::client::AsyncOpClient;
use crate::error::AsyncOpError;
use crate::executor::Dispatch;
use crate::operation::{AsyncOp, AsyncOpValue};
use crate::status::AsyncOpStatus;
use parking_lot::Mutex;
use std::sync::Arc;
use triple_buffer::{Input, Output};


/// Point-in-time view of an operation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Snapshot {
    pub status: AsyncOpStatus,
    pub progress: f32,
}
//
impl Snapshot {
    fn of<T: AsyncOpValue>(op: &AsyncOp<T>) -> Self {
        Snapshot {
            status: op.status(),
            progress: op.progress().unwrap_or(1.0),
        }
    }
}


/// Client interface, used to poll the latest operation snapshot
pub struct AsyncOpMonitor {
    /// Snapshots will be read through this triple buffer
    output: Output<Snapshot>,

    /// Monitored operation, and the publishing callbacks registered on it
    op: Arc<dyn AsyncOpClient>,
    progress: CallbackId,
    completion: CallbackId,
}
//
impl AsyncOpMonitor {
    /// Access the latest published snapshot
    pub fn snapshot(&mut self) -> &Snapshot {
        self.output.read()
    }
}
//
impl Drop for AsyncOpMonitor {
    fn drop(&mut self) {
        self.op.remove_progress_callback(self.progress);
        self.op.remove_completion_callback(self.completion);
    }
}


type Publisher = Arc<Mutex<Input<Snapshot>>>;

fn publish<T: AsyncOpValue>(publisher: &Publisher, op: &AsyncOp<T>) {
    publisher.lock().write(Snapshot::of(op));
}


impl<T: AsyncOpValue> AsyncOp<T> {
    /// Start publishing snapshots of this operation for polling
    ///
    /// A status change is only published together with a progress update or
    /// with completion.
    ///
    pub fn monitor(&self) -> Result<AsyncOpMonitor, AsyncOpError> {
        let initial = Snapshot {
            status: self.status(),
            progress: self.progress()?,
        };
        let (input, output) = triple_buffer::triple_buffer(&initial);
        let publisher: Publisher = Arc::new(Mutex::new(input));

        let progress_publisher = publisher.clone();
        let progress = self.add_progress_callback(
            ProgressCallback::operation(move |op| publish(&progress_publisher, op)),
            Dispatch::Synchronous
        )?;
        let completion_publisher = publisher.clone();
        let completion = self.add_completion_callback(
            CompletionCallback::operation(move |op| publish(&completion_publisher, op)),
            Dispatch::Synchronous
        ).inspect_err(|_| { self.remove_progress_callback(progress); })?;

        // Catch up with whatever happened while registering
        publish(&publisher, self);
        Ok(AsyncOpMonitor {
            output,
            op: Arc::new(self.clone()),
            progress,
            completion,
        })
    }
}
