//! Awaiting asynchronous operations
//!
//! Operations can be awaited from async code. The resulting future registers
//! the polling task's waker as a completion callback, and resolves to the
//! operation's result.

use crate::callbacks::CallbackId;
use crate::error::AsyncOpError;
use crate::executor::Dispatch;
use crate::operation::{AsyncOp, AsyncOpValue};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};


/// Future resolving to the result of an operation
#[must_use = "futures do nothing unless polled"]
pub struct AsyncOpFuture<T: AsyncOpValue> {
    op: AsyncOp<T>,
    registration: Option<(CallbackId, Waker)>,
}
//
impl<T: AsyncOpValue> Future for AsyncOpFuture<T> {
    type Output = Result<T, AsyncOpError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.op.is_completed() {
            return Poll::Ready(this.op.result());
        }

        let stale = match &this.registration {
            Some((_, waker)) => !waker.will_wake(cx.waker()),
            None => true,
        };
        if stale {
            if let Some((id, _)) = this.registration.take() {
                this.op.remove_completion_callback(id);
            }
            let waker = cx.waker().clone();
            match this.op.add_completion_callback(waker.clone().into(),
                                                  Dispatch::Synchronous) {
                Ok(id) => this.registration = Some((id, waker)),
                Err(error) => return Poll::Ready(Err(error)),
            }
        }

        if this.op.is_completed() {
            Poll::Ready(this.op.result())
        } else {
            Poll::Pending
        }
    }
}
//
impl<T: AsyncOpValue> Drop for AsyncOpFuture<T> {
    fn drop(&mut self) {
        if let Some((id, _)) = self.registration.take() {
            self.op.remove_completion_callback(id);
        }
    }
}


impl<T: AsyncOpValue> IntoFuture for AsyncOp<T> {
    type Output = Result<T, AsyncOpError>;
    type IntoFuture = AsyncOpFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        AsyncOpFuture {
            op: self,
            registration: None,
        }
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpError;
    use crate::server::AsyncCompletionSource;
    use futures::FutureExt;
    use futures::executor::block_on;
    use std::thread;
    use std::time::Duration;

    /// Completed operations resolve on first poll
    #[test]
    fn completed() {
        assert_eq!(block_on(async { AsyncOp::from_result(5).await }).unwrap(), 5);
        let canceled = block_on(AsyncOp::<u8>::canceled().into_future());
        assert!(matches!(canceled, Err(AsyncOpError::Unsuccessful { .. })));
    }

    /// Awaiting tasks are woken by completion on another thread
    #[test]
    fn cross_thread() {
        let source = AsyncCompletionSource::<u32>::new();
        let op = source.operation().map(|v| v * 2);
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            source.set_result(21).unwrap();
        });
        assert_eq!(block_on(async move { op.await }).unwrap(), 42);
        producer.join().unwrap();
    }

    /// Pending operations do not resolve, and abandoning the future is fine
    #[test]
    fn abandoned() {
        let source = AsyncCompletionSource::<u32>::new();
        assert!(source.operation().into_future().now_or_never().is_none());
        source.set_result(1).unwrap();
        assert_eq!(source.operation().into_future().now_or_never().unwrap().unwrap(),
                   1);
    }

    /// Failures surface through the awaited result
    #[test]
    fn failure() {
        let source = AsyncCompletionSource::<u32>::new();
        let op = source.operation();
        source.set_exception(OpError::canceled()).unwrap();
        match block_on(op.into_future()) {
            Err(AsyncOpError::Unsuccessful { error, .. }) => assert!(error.is_canceled()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
