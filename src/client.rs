//! Minimal asynchronous operation client interface
//!
//! Generally speaking, clients interact with an `AsyncOp<T>`, whose result
//! type they know. But there are places where operations of different result
//! types need to be handled uniformly: a continuation must be able to cancel
//! its antecedent and to follow its progress whatever that antecedent
//! produces. This trait is the type-erased view which makes that possible.
//!
//! Note that cancellation is cooperative. Canceling an operation moves it to
//! the Canceled status right away, and the producer learns about it when its
//! next attempt at completing the operation fails.

use crate::callbacks::CallbackId;
use crate::error::{AsyncOpError, OpError};
use crate::operation::{AsyncOp, AsyncOpValue};
use crate::status::AsyncOpStatus;


/// Features which all asynchronous operation clients are expected to share
pub trait AsyncOpClient: Send + Sync {
    /// Current status of the operation
    fn status(&self) -> AsyncOpStatus;

    /// Current progress of the operation, in [0, 1]
    fn progress(&self) -> Result<f32, AsyncOpError>;

    /// Failure of the operation, if it faulted or was canceled
    fn exception(&self) -> Result<Option<OpError>, AsyncOpError>;

    /// Truth that the operation reached a final status
    fn is_completed(&self) -> bool {
        self.status().is_final()
    }

    /// Request the cancellation of the operation
    fn cancel(&self);

    /// Unregister a completion callback which has not run yet
    fn remove_completion_callback(&self, id: CallbackId) -> bool;

    /// Unregister a progress callback
    fn remove_progress_callback(&self, id: CallbackId) -> bool;
}
//
impl<T: AsyncOpValue> AsyncOpClient for AsyncOp<T> {
    fn status(&self) -> AsyncOpStatus {
        AsyncOp::status(self)
    }

    fn progress(&self) -> Result<f32, AsyncOpError> {
        AsyncOp::progress(self)
    }

    fn exception(&self) -> Result<Option<OpError>, AsyncOpError> {
        AsyncOp::exception(self)
    }

    fn cancel(&self) {
        AsyncOp::cancel(self)
    }

    fn remove_completion_callback(&self, id: CallbackId) -> bool {
        AsyncOp::remove_completion_callback(self, id)
    }

    fn remove_progress_callback(&self, id: CallbackId) -> bool {
        AsyncOp::remove_progress_callback(self, id)
    }
}
