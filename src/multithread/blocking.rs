//! Blocking-based asynchronous operation monitoring
//!
//! This module provides a way to monitor asynchronous operations by blocking
//! until they complete. This synchronization mechanism is easy to use and
//! reason about, but should be used with care as the unpredictable
//! application delays that it introduces can be harmful to performance.
//!
//! Never block a thread which is expected to run the callbacks that would
//! complete the operation, such as the thread pumping a `QueueTarget` that
//! continuations were posted to. The same goes for blocking from within an
//! inline callback on an operation whose completion is queued behind it.

use crate::error::AsyncOpError;
use crate::operation::{AsyncOp, AsyncOpValue};
use std::time::{Duration, Instant};


impl<T: AsyncOpValue> AsyncOp<T> {
    /// Block until the operation completes
    pub fn wait(&self) {
        let mut state = self.core.state.lock();
        while !state.status.is_final() {
            self.core.completed.wait(&mut state);
        }
    }

    /// Block until the operation completes or a timeout elapses, telling
    /// whether it completed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.core.state.lock();
        while !state.status.is_final() {
            if self.core.completed.wait_until(&mut state, deadline).timed_out() {
                return state.status.is_final();
            }
        }
        true
    }

    /// Block until the operation completes, then fetch its result
    pub fn join(&self) -> Result<T, AsyncOpError> {
        self.wait();
        self.result()
    }
}
