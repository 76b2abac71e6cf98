//! Producer side of asynchronous operations
//!
//! Whoever performs the work behind an asynchronous operation (a worker
//! thread, an engine callback, a polling loop...) holds an
//! `AsyncCompletionSource`. It is the only handle which can complete the
//! operation, while clients only get the read-only `AsyncOp` view.
//!
//! Every way to complete an operation comes in two flavors. The `set_*`
//! methods report misuse (completing twice, completing a disposed operation)
//! as an error, while the `try_set_*` methods only report whether they
//! succeeded, which is what racing producers want.

use crate::config::AsyncOpOptions;
use crate::error::{AsyncOpError, OpError, ProducerDropped};
use crate::operation::{AsyncOp, AsyncOpValue, Settled};
use std::fmt;
use tracing::debug;


/// Producer interface, used to submit operation status updates
pub struct AsyncCompletionSource<T: AsyncOpValue> {
    op: AsyncOp<T>,
}
//
impl<T: AsyncOpValue> AsyncCompletionSource<T> {
    /// Create a new pending operation with default options
    pub fn new() -> Self {
        Self::with_options(AsyncOpOptions::default())
    }

    /// Create a new pending operation
    pub fn with_options(options: AsyncOpOptions) -> Self {
        AsyncCompletionSource { op: AsyncOp::with_options(options) }
    }

    /// Client view of the operation
    pub fn operation(&self) -> AsyncOp<T> {
        self.op.clone()
    }

    /// Move the operation from Created to Running
    pub fn set_running(&self) -> Result<(), AsyncOpError> {
        self.op.start().map(drop)
    }

    /// Move the operation from Created to Running, if it was created
    pub fn try_set_running(&self) -> bool {
        self.op.start().unwrap_or(false)
    }

    /// Report progress, in [0, 1]
    pub fn set_progress(&self, progress: f32) -> Result<(), AsyncOpError> {
        self.op.report_progress(progress)
    }

    pub fn try_set_progress(&self, progress: f32) -> bool {
        self.op.report_progress(progress).is_ok()
    }

    /// Complete the operation successfully
    pub fn set_result(&self, value: T) -> Result<(), AsyncOpError> {
        self.op.try_settle(Settled::Value(value), false)
    }

    pub fn try_set_result(&self, value: T) -> bool {
        self.set_result(value).is_ok()
    }

    /// Complete the operation successfully, on the path of whoever started it
    ///
    /// The operation is flagged as completed synchronously, and context-less
    /// callbacks run inline rather than being sent to the background target.
    ///
    pub fn set_result_synchronously(&self,
                                    value: T) -> Result<(), AsyncOpError> {
        self.op.try_settle(Settled::Value(value), true)
    }

    pub fn try_set_result_synchronously(&self, value: T) -> bool {
        self.set_result_synchronously(value).is_ok()
    }

    /// Fail the operation
    ///
    /// An error made only of cancellations cancels the operation instead. If
    /// the operation already faulted, the error is merged into its existing
    /// failure, but this still reports that the operation was completed.
    ///
    pub fn set_exception(&self, error: OpError) -> Result<(), AsyncOpError> {
        self.op.try_settle(Settled::failure(error), false)
    }

    pub fn try_set_exception(&self, error: OpError) -> bool {
        self.set_exception(error).is_ok()
    }

    /// Fail the operation with several errors at once
    pub fn set_exceptions<I>(&self, errors: I) -> Result<(), AsyncOpError>
        where I: IntoIterator<Item = OpError>
    {
        self.set_exception(OpError::aggregate(errors)?)
    }

    pub fn try_set_exceptions<I>(&self, errors: I) -> bool
        where I: IntoIterator<Item = OpError>
    {
        self.set_exceptions(errors).is_ok()
    }

    /// Cancel the operation
    pub fn set_canceled(&self) -> Result<(), AsyncOpError> {
        self.op.try_settle(Settled::Canceled(OpError::canceled()), false)
    }

    pub fn try_set_canceled(&self) -> bool {
        self.set_canceled().is_ok()
    }
}
//
impl<T: AsyncOpValue> Default for AsyncCompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}
//
impl<T: AsyncOpValue> Drop for AsyncCompletionSource<T> {
    /// If the producer goes away before the operation has reached its final
    /// status, notify the clients in order to prevent them from hanging
    fn drop(&mut self) {
        if !self.op.is_completed()
            && self.try_set_exception(OpError::new(ProducerDropped))
        {
            debug!(op = self.op.id(), "completion source dropped early");
        }
    }
}
//
impl<T: AsyncOpValue> fmt::Debug for AsyncCompletionSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AsyncCompletionSource").field("op", &self.op).finish()
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::AsyncOpStatus;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("first failure")]
    struct First;

    #[derive(Debug, Error)]
    #[error("second failure")]
    struct Second;

    /// Only the first completion wins, later ones report failure
    #[test]
    fn single_completion() {
        let source = AsyncCompletionSource::new();
        assert!(source.try_set_result(1u8));
        assert!(!source.try_set_result(2));
        assert!(!source.try_set_exception(OpError::new(First)));
        assert!(!source.try_set_canceled());
        assert!(!source.try_set_progress(0.5));
        assert!(!source.try_set_running());

        for error in [source.set_result(3).unwrap_err(),
                      source.set_canceled().unwrap_err(),
                      source.set_progress(0.1).unwrap_err(),
                      source.set_running().unwrap_err()] {
            assert!(error.is_invalid_state(), "{}", error);
        }
        assert_eq!(source.operation().result().unwrap(), 1);
    }

    /// Explicit start, then completion
    #[test]
    fn running() {
        let source = AsyncCompletionSource::<()>::new();
        source.set_running().unwrap();
        assert!(!source.try_set_running());
        assert_eq!(source.operation().status(), AsyncOpStatus::Running);
        source.set_canceled().unwrap();
        assert_eq!(source.operation().status(), AsyncOpStatus::Canceled);
    }

    /// Late failures are aggregated into the existing one
    #[test]
    fn failure_aggregation() {
        let source = AsyncCompletionSource::<u8>::new();
        source.set_exception(OpError::new(First)).unwrap();
        assert!(source.set_exception(OpError::new(Second))
                      .unwrap_err()
                      .is_invalid_state());

        let error = source.operation().exception().unwrap().unwrap();
        assert!(error.is_aggregate());
        assert!(error.find::<First>().is_some());
        assert!(error.find::<Second>().is_some());
        match source.operation().result() {
            Err(AsyncOpError::Unsuccessful { status, .. }) => {
                assert_eq!(status, AsyncOpStatus::Faulted)
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    /// Several failures can be reported at once, but not zero
    #[test]
    fn multiple_exceptions() {
        let source = AsyncCompletionSource::<u8>::new();
        assert!(!source.try_set_exceptions(Vec::new()));
        source.set_exceptions(vec![OpError::new(First), OpError::new(Second)])
              .unwrap();
        let error = source.operation().exception().unwrap().unwrap();
        assert_eq!(error.causes().len(), 2);
    }

    /// Cancellation errors cancel rather than fault
    #[test]
    fn cancellation_exception() {
        let source = AsyncCompletionSource::<u8>::new();
        source.set_exception(OpError::canceled()).unwrap();
        assert!(source.operation().is_canceled());
    }

    /// Dropping the producer early faults the operation
    #[test]
    fn producer_dropped() {
        let source = AsyncCompletionSource::<u8>::new();
        let op = source.operation();
        drop(source);
        assert!(op.is_faulted());
        let error = op.exception().unwrap().unwrap();
        assert!(error.find::<ProducerDropped>().is_some());
    }

    /// Synchronous completion is reflected in the operation flags
    #[test]
    fn synchronous_completion() {
        let source = AsyncCompletionSource::new();
        source.set_result_synchronously("done").unwrap();
        assert!(source.operation().completed_synchronously());
        assert!(!source.try_set_result_synchronously("again"));
    }
}
