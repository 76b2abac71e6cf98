//! Continuations
//!
//! A continuation is a new operation whose outcome is computed from the
//! outcome of an antecedent operation, once that antecedent completes. This
//! is achieved by registering a completion callback on the antecedent, which
//! runs the continuation function and drives the new operation.
//!
//! Continuation functions may complete the new operation directly, or return
//! another operation, in which case the continuation completes when that one
//! does, and with the same outcome.
//!
//! Continuations keep a link to their antecedent (and to the operation they
//! chained to, if any), through which cancellation travels upstream.

use crate::callbacks::CompletionCallback;
use crate::error::{AsyncOpError, OpError};
use crate::executor::Dispatch;
use crate::operation::{AsyncOp, AsyncOpValue, ProgressMode, Settled};
use crate::status::AsyncOpStatus;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};


/// Settings of a continuation
#[derive(Clone, Debug)]
pub struct ContinuationOptions {
    /// Run the continuation if the antecedent ran to completion
    pub on_success: bool,

    /// Run the continuation if the antecedent faulted
    pub on_faulted: bool,

    /// Run the continuation if the antecedent was canceled
    pub on_canceled: bool,

    /// Where the continuation function should run
    pub dispatch: Dispatch,
}
//
impl ContinuationOptions {
    /// Only run after a successful antecedent
    pub fn only_on_success() -> Self {
        ContinuationOptions {
            on_faulted: false,
            on_canceled: false,
            ..Self::default()
        }
    }

    /// Only run after a faulted antecedent
    pub fn only_on_faulted() -> Self {
        ContinuationOptions {
            on_success: false,
            on_canceled: false,
            ..Self::default()
        }
    }

    /// Only run after a canceled antecedent
    pub fn only_on_canceled() -> Self {
        ContinuationOptions {
            on_success: false,
            on_faulted: false,
            ..Self::default()
        }
    }

    /// Change where the continuation function runs
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    fn allows(&self, status: AsyncOpStatus) -> bool {
        match status {
            AsyncOpStatus::RanToCompletion => self.on_success,
            AsyncOpStatus::Faulted => self.on_faulted,
            AsyncOpStatus::Canceled => self.on_canceled,
            AsyncOpStatus::Created | AsyncOpStatus::Running => false,
        }
    }
}
//
impl Default for ContinuationOptions {
    fn default() -> Self {
        ContinuationOptions {
            on_success: true,
            on_faulted: true,
            on_canceled: true,
            dispatch: Dispatch::CapturedContext,
        }
    }
}


/// What a continuation function asks its operation to do
pub(crate) enum Step<U> {
    /// Complete with this outcome
    Settle(Settled<U>),

    /// Complete like this other operation
    Await(AsyncOp<U>),
}


impl<T: AsyncOpValue> AsyncOp<T> {
    /// Transform the result of a successful operation
    ///
    /// Failures are forwarded without calling `f`. An error returned by `f`
    /// faults the continuation (or cancels it, if it is a cancellation).
    ///
    pub fn then<U, F>(&self, f: F) -> AsyncOp<U>
        where U: AsyncOpValue,
              F: FnOnce(T) -> Result<U, OpError> + Send + 'static
    {
        continue_from(self,
                      ContinuationOptions::default(),
                      ProgressMode::Sequential { chained: false },
                      move |antecedent| {
                          match antecedent_outcome(antecedent).forward() {
                              Ok(value) => Step::Settle(f(value).into()),
                              Err(failure) => Step::Settle(failure),
                          }
                      })
    }

    /// Chain another operation to a successful one
    pub fn then_async<U, F>(&self, f: F) -> AsyncOp<U>
        where U: AsyncOpValue,
              F: FnOnce(T) -> AsyncOp<U> + Send + 'static
    {
        continue_from(self,
                      ContinuationOptions::default(),
                      ProgressMode::Sequential { chained: true },
                      move |antecedent| {
                          match antecedent_outcome(antecedent).forward() {
                              Ok(value) => Step::Await(f(value)),
                              Err(failure) => Step::Settle(failure),
                          }
                      })
    }

    /// Infallible transformation of a successful result
    pub fn map<U, F>(&self, f: F) -> AsyncOp<U>
        where U: AsyncOpValue,
              F: FnOnce(T) -> U + Send + 'static
    {
        self.then(move |value| Ok(f(value)))
    }

    /// Replace the result of a successful operation, whatever it was
    pub fn rebind<U, F>(&self, f: F) -> AsyncOp<U>
        where U: AsyncOpValue,
              F: FnOnce() -> U + Send + 'static
    {
        self.map(move |_| f())
    }

    /// Handle failures which have a cause of type `E`
    ///
    /// Successes and other failures are forwarded without calling `handler`.
    ///
    pub fn catch<E, F>(&self, handler: F) -> AsyncOp<T>
        where E: Error + 'static,
              F: FnOnce(&E) -> Result<T, OpError> + Send + 'static
    {
        continue_from(self,
                      ContinuationOptions::default(),
                      ProgressMode::Sequential { chained: false },
                      move |antecedent| {
                          let outcome = antecedent_outcome(antecedent);
                          let handled = match &outcome {
                              Settled::Faulted(error) | Settled::Canceled(error) => {
                                  error.find::<E>().map(handler)
                              },
                              Settled::Value(_) => None,
                          };
                          match handled {
                              Some(result) => Step::Settle(result.into()),
                              None => Step::Settle(outcome),
                          }
                      })
    }

    /// Run `handler` whatever the outcome, then forward that outcome
    ///
    /// If `handler` panics, the continuation faults instead.
    ///
    pub fn finally<F>(&self, handler: F) -> AsyncOp<T>
        where F: FnOnce() + Send + 'static
    {
        continue_from(self,
                      ContinuationOptions::default(),
                      ProgressMode::Sequential { chained: false },
                      move |antecedent| {
                          handler();
                          Step::Settle(antecedent_outcome(antecedent))
                      })
    }

    /// Run an asynchronous cleanup whatever the outcome, then forward that
    /// outcome, unless the cleanup itself failed
    pub fn finally_async<F>(&self, handler: F) -> AsyncOp<T>
        where F: FnOnce() -> AsyncOp<()> + Send + 'static
    {
        continue_from(self,
                      ContinuationOptions::default(),
                      ProgressMode::Sequential { chained: true },
                      move |antecedent| {
                          let outcome = antecedent_outcome(antecedent);
                          Step::Await(handler().then(move |()| outcome.into_result()))
                      })
    }

    /// General continuation, which sees the completed antecedent
    ///
    /// If `options` rule out the antecedent's outcome, `f` is not called and
    /// the continuation is canceled.
    ///
    pub fn continue_with<U, F>(&self,
                               options: ContinuationOptions,
                               f: F) -> AsyncOp<U>
        where U: AsyncOpValue,
              F: FnOnce(&AsyncOp<T>) -> Result<U, OpError> + Send + 'static
    {
        continue_from(self,
                      options,
                      ProgressMode::Sequential { chained: false },
                      move |antecedent| Step::Settle(f(antecedent).into()))
    }

    /// General continuation, which sees the completed antecedent and chains
    /// another operation to it
    pub fn continue_with_async<U, F>(&self,
                                     options: ContinuationOptions,
                                     f: F) -> AsyncOp<U>
        where U: AsyncOpValue,
              F: FnOnce(&AsyncOp<T>) -> AsyncOp<U> + Send + 'static
    {
        continue_from(self,
                      options,
                      ProgressMode::Sequential { chained: true },
                      move |antecedent| Step::Await(f(antecedent)))
    }

    /// Apply what a continuation function decided
    fn drive(&self, step: Step<T>) {
        match step {
            Step::Settle(outcome) => {
                let _ = self.try_settle(outcome, false);
            },
            Step::Await(inner) => self.complete_like(inner),
        }
    }

    /// Complete with the outcome of another operation, once it completes
    fn complete_like(&self, inner: AsyncOp<T>) {
        let target = self.clone();
        let registered = inner.add_completion_callback(
            CompletionCallback::operation(move |inner| {
                target.copy_outcome(inner);
            }),
            Dispatch::Synchronous
        );
        match registered {
            Ok(id) => {
                if !self.add_link(&inner, Some(id)) {
                    // Canceled while the continuation function was running
                    inner.cancel();
                }
            },
            Err(error) => {
                let _ = self.try_settle(Settled::Faulted(error.into()), false);
            },
        }
    }
}


/// Outcome of an antecedent, as seen from one of its completion callbacks
fn antecedent_outcome<T: AsyncOpValue>(antecedent: &AsyncOp<T>) -> Settled<T> {
    antecedent.outcome().unwrap_or_else(|| {
        Settled::Faulted(OpError::new(AsyncOpError::InvalidState {
            status: antecedent.status(),
            action: "continue",
        }))
    })
}


/// Build a continuation operation around an antecedent
fn continue_from<T, U, F>(antecedent: &AsyncOp<T>,
                          options: ContinuationOptions,
                          progress_mode: ProgressMode,
                          step: F) -> AsyncOp<U>
    where T: AsyncOpValue,
          U: AsyncOpValue,
          F: FnOnce(&AsyncOp<T>) -> Step<U> + Send + 'static
{
    let continuation = AsyncOp::pending(antecedent.core.config.clone(),
                                        progress_mode);
    let target = continuation.clone();
    let dispatch = options.dispatch.clone();
    let registered = antecedent.add_completion_callback(
        CompletionCallback::operation(move |antecedent: &AsyncOp<T>| {
            if target.is_completed() {
                return;
            }
            if !options.allows(antecedent.status()) {
                let _ = target.try_settle(Settled::Canceled(OpError::canceled()),
                                          false);
                return;
            }
            let step = panic::catch_unwind(AssertUnwindSafe(|| step(antecedent)))
                .unwrap_or_else(|payload| {
                    Step::Settle(Settled::Faulted(OpError::from_panic(payload)))
                });
            target.drive(step);
        }),
        dispatch
    );
    match registered {
        Ok(id) => {
            continuation.add_antecedent_link(antecedent, Some(id));
        },
        Err(error) => {
            let _ = continuation.try_settle(Settled::Faulted(error.into()), true);
        },
    }
    continuation
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CallbackPanicked, Canceled};
    use crate::config::{AsyncOpOptions, DispatchConfig};
    use crate::executor::DispatchTarget;
    use crate::executor::queue::QueueTarget;
    use crate::server::AsyncCompletionSource;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("parse error")]
    struct ParseError;

    #[derive(Debug, Error)]
    #[error("network error")]
    struct NetworkError;

    /// Successful results flow through then/map/rebind
    #[test]
    fn then_chain() {
        let source = AsyncCompletionSource::<u32>::new();
        let doubled = source.operation().then(|v| Ok(v * 2));
        let text = doubled.map(|v| format!("<{}>", v));
        let unit = text.rebind(|| ());
        assert_eq!(doubled.status(), AsyncOpStatus::Created);

        source.set_result(21).unwrap();
        assert_eq!(doubled.result().unwrap(), 42);
        assert_eq!(text.result().unwrap(), "<42>");
        assert!(unit.is_completed_successfully());
    }

    /// Continuations of completed operations complete right away
    #[test]
    fn completed_antecedent() {
        let op = AsyncOp::from_result(1).then(|v| Ok(v + 1));
        assert_eq!(op.result().unwrap(), 2);
    }

    /// A failing then stage is caught exactly once downstream
    #[test]
    fn then_catch() {
        let source = AsyncCompletionSource::<u32>::new();
        let failing = source.operation().then(|_| -> Result<u32, OpError> {
            Err(OpError::new(ParseError))
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let c_calls = calls.clone();
        let recovered = failing.catch(move |_: &ParseError| {
            c_calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });

        source.set_result(5).unwrap();
        assert_eq!(failing.status(), AsyncOpStatus::Faulted);
        assert_eq!(recovered.status(), AsyncOpStatus::RanToCompletion);
        assert_eq!(recovered.result().unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Catch ignores successes and failures of other kinds
    #[test]
    fn catch_filtering() {
        let called = Arc::new(AtomicUsize::new(0));
        let c_called = called.clone();
        let success = AsyncOp::from_result(3).catch(move |_: &ParseError| {
            c_called.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });
        assert_eq!(success.result().unwrap(), 3);

        let c_called = called.clone();
        let other = AsyncOp::<u8>::from_exception(OpError::new(NetworkError))
            .catch(move |_: &ParseError| {
                c_called.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            });
        assert!(other.is_faulted());
        let error = other.exception().unwrap().unwrap();
        assert!(error.find::<NetworkError>().is_some());
        assert_eq!(called.load(Ordering::SeqCst), 0);

        let canceled = AsyncOp::<u8>::canceled().catch(|_: &Canceled| Ok(9));
        assert_eq!(canceled.result().unwrap(), 9);
    }

    /// Panics become failures of the continuation
    #[test]
    fn panicking_continuation() {
        let op = AsyncOp::from_result(1u8).then(|_| -> Result<u8, OpError> {
            panic!("continuation exploded")
        });
        assert!(op.is_faulted());
        let error = op.exception().unwrap().unwrap();
        assert_eq!(error.find::<CallbackPanicked>().unwrap().message,
                   "continuation exploded");
    }

    /// Failures and cancellations skip then stages, keeping their status
    #[test]
    fn failure_forwarding() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c_calls = calls.clone();
        let faulted = AsyncOp::<u8>::from_exception(OpError::new(NetworkError))
            .map(move |v| { c_calls.fetch_add(1, Ordering::SeqCst); v });
        assert!(faulted.is_faulted());

        let c_calls = calls.clone();
        let canceled = AsyncOp::<u8>::canceled()
            .map(move |v| { c_calls.fetch_add(1, Ordering::SeqCst); v });
        assert!(canceled.is_canceled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    /// Returning a cancellation error cancels the continuation
    #[test]
    fn explicit_cancellation() {
        let op = AsyncOp::from_result(1u8).then(|_| -> Result<u8, OpError> {
            Err(OpError::canceled())
        });
        assert!(op.is_canceled());
    }

    /// Finally runs in every case and forwards the antecedent's outcome
    #[test]
    fn finally_forwarding() {
        let runs = Arc::new(AtomicUsize::new(0));
        let c_runs = runs.clone();
        let ok = AsyncOp::from_result(4u8)
            .finally(move || { c_runs.fetch_add(1, Ordering::SeqCst); });
        assert_eq!(ok.result().unwrap(), 4);

        let c_runs = runs.clone();
        let failed = AsyncOp::<u8>::from_exception(OpError::new(ParseError))
            .finally(move || { c_runs.fetch_add(1, Ordering::SeqCst); });
        assert!(failed.exception().unwrap().unwrap().find::<ParseError>().is_some());

        let c_runs = runs.clone();
        let canceled = AsyncOp::<u8>::canceled()
            .finally(move || { c_runs.fetch_add(1, Ordering::SeqCst); });
        assert!(canceled.is_canceled());
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        let exploded = AsyncOp::from_result(4u8).finally(|| panic!("cleanup"));
        assert!(exploded.is_faulted());
    }

    /// Asynchronous cleanup delays completion, and its failure wins
    #[test]
    fn finally_async() {
        let cleanup = AsyncCompletionSource::<()>::new();
        let cleanup_op = cleanup.operation();
        let op = AsyncOp::from_result(7u8).finally_async(move || cleanup_op);
        assert!(!op.is_completed());
        cleanup.set_result(()).unwrap();
        assert_eq!(op.result().unwrap(), 7);

        let failing = AsyncOp::from_result(7u8).finally_async(|| {
            AsyncOp::from_exception(OpError::new(NetworkError))
        });
        let error = failing.exception().unwrap().unwrap();
        assert!(error.find::<NetworkError>().is_some());
    }

    /// Chained operations are awaited, and their outcome copied verbatim
    #[test]
    fn then_async() {
        let first = AsyncCompletionSource::<u32>::new();
        let second = Arc::new(Mutex::new(None));
        let c_second = second.clone();
        let chained = first.operation().then_async(move |v| {
            let source = AsyncCompletionSource::<String>::new();
            source.set_progress(0.5).unwrap();
            let op = source.operation();
            *c_second.lock() = Some((v, source));
            op
        });

        first.set_progress(0.5).unwrap();
        assert_eq!(chained.progress().unwrap(), 0.25);
        first.set_result(3).unwrap();
        assert!(!chained.is_completed());
        assert_eq!(chained.progress().unwrap(), 0.75);

        let (value, source) = second.lock().take().unwrap();
        source.set_result(format!("got {}", value)).unwrap();
        assert_eq!(chained.result().unwrap(), "got 3");
    }

    /// Synchronous continuations report their antecedent's progress, and
    /// forward its progress notifications
    #[test]
    fn progress_forwarding() {
        let source = AsyncCompletionSource::<u32>::new();
        let mapped = source.operation().map(|v| v + 1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let c_seen = seen.clone();
        mapped.on_progress(move |p| c_seen.lock().push(p)).unwrap();

        source.set_progress(0.4).unwrap();
        assert_eq!(mapped.progress().unwrap(), 0.4);
        source.set_result(1).unwrap();
        assert_eq!(mapped.progress().unwrap(), 1.0);
        assert_eq!(seen.lock().first(), Some(&0.4));
        assert_eq!(seen.lock().last(), Some(&1.0));
    }

    /// Canceling a continuation cancels its antecedent, without running the
    /// continuation function
    #[test]
    fn upstream_cancellation() {
        let source = AsyncCompletionSource::<u32>::new();
        let antecedent = source.operation();
        let called = Arc::new(AtomicUsize::new(0));
        let c_called = called.clone();
        let continuation = antecedent.catch(move |_: &Canceled| {
            c_called.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });

        continuation.cancel();
        assert_eq!(continuation.status(), AsyncOpStatus::Canceled);
        assert_eq!(antecedent.status(), AsyncOpStatus::Canceled);
        assert!(!source.try_set_result(1));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    /// Canceling a mapped continuation cancels its pending antecedent, and
    /// the mapping function never runs
    #[test]
    fn map_cancellation() {
        let source = AsyncCompletionSource::<u32>::new();
        let called = Arc::new(AtomicUsize::new(0));
        let c_called = called.clone();
        let mapped = source.operation().map(move |v| {
            c_called.fetch_add(1, Ordering::SeqCst);
            v * 2
        });
        let then = mapped.then(|v| Ok(v + 1));

        then.cancel();
        assert!(then.is_canceled());
        assert!(mapped.is_canceled());
        assert!(source.operation().is_canceled());
        assert!(!source.try_set_result(1));
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert_eq!(source.operation().callback_counts(), (0, 0));
    }

    /// Completing the root of a very long chain completes its tip
    #[test]
    fn long_chain_completion() {
        let source = AsyncCompletionSource::<u64>::new();
        let mut op = source.operation();
        for _ in 0..100_000 {
            op = op.map(|v| v + 1);
        }
        source.set_result(0).unwrap();
        assert_eq!(op.result().unwrap(), 100_000);
    }

    /// Dropping the producer of a very long chain faults its tip
    #[test]
    fn long_chain_abandonment() {
        let source = AsyncCompletionSource::<u64>::new();
        let mut op = source.operation();
        for _ in 0..100_000 {
            op = op.then(|v| Ok(v + 1));
        }
        drop(source);
        assert!(op.is_faulted());
        assert!(op.exception().unwrap().unwrap()
                  .find::<crate::error::ProducerDropped>().is_some());
    }

    /// Progress reported at the root of a long chain reaches its tip
    #[test]
    fn long_chain_progress() {
        let source = AsyncCompletionSource::<u64>::new();
        let mut op = source.operation();
        for _ in 0..10_000 {
            op = op.map(|v| v + 1);
        }
        source.set_progress(0.5).unwrap();
        assert_eq!(op.progress().unwrap(), 0.5);
        source.set_result(0).unwrap();
        assert_eq!(op.result().unwrap(), 10_000);
    }

    /// Canceling a continuation cancels the operation it chained to
    #[test]
    fn chained_cancellation() {
        let inner = AsyncCompletionSource::<u32>::new();
        let inner_op = inner.operation();
        let continuation = AsyncOp::from_result(())
            .then_async(move |()| inner_op);
        assert!(!continuation.is_completed());
        continuation.cancel();
        assert!(continuation.is_canceled());
        assert!(inner.operation().is_canceled());
    }

    /// Filtered-out continuations are canceled without running
    #[test]
    fn continuation_options() {
        let skipped = AsyncOp::from_result(1u8).continue_with(
            ContinuationOptions::only_on_faulted(),
            |_| -> Result<u8, OpError> { panic!("should not run") }
        );
        assert!(skipped.is_canceled());

        let ran = AsyncOp::<u8>::from_exception(OpError::new(ParseError))
            .continue_with(ContinuationOptions::only_on_faulted(),
                           |antecedent| Ok(antecedent.is_faulted()));
        assert!(ran.result().unwrap());

        let chained = AsyncOp::<u8>::canceled().continue_with_async(
            ContinuationOptions::only_on_canceled(),
            |_| AsyncOp::from_result("recovered")
        );
        assert_eq!(chained.result().unwrap(), "recovered");
    }

    /// Continuations of disposed operations fail instead of hanging
    #[test]
    fn disposed_antecedent() {
        let op = AsyncOp::from_result(1u8);
        op.dispose().unwrap();
        let continuation = op.map(|v| v);
        let error = continuation.exception().unwrap().unwrap();
        assert!(matches!(error.find::<AsyncOpError>(),
                         Some(AsyncOpError::Disposed)));
    }

    /// Continuations inherit the dispatch configuration of their antecedent
    #[test]
    fn default_and_background_targets() {
        let default_target = QueueTarget::new();
        let background = QueueTarget::new();
        let config = DispatchConfig::default()
            .with_default_target(default_target.clone())
            .with_background(background.clone());
        let source = AsyncCompletionSource::<u32>::with_options(
            AsyncOpOptions::default().with_dispatch(config)
        );

        let posted = source.operation().continue_with(
            ContinuationOptions::default().with_dispatch(Dispatch::DefaultContext),
            |antecedent| antecedent.result().map_err(OpError::from)
        );
        let contextless = source.operation().map(|v| v + 1);
        let chained = contextless.map(|v| v * 10);

        thread::spawn(move || source.set_result(1).unwrap()).join().unwrap();
        assert!(!posted.is_completed());
        assert!(!contextless.is_completed());

        assert_eq!(default_target.run_pending(), 1);
        assert_eq!(posted.result().unwrap(), 1);
        assert_eq!(background.run_pending(), 1);
        assert_eq!(contextless.result().unwrap(), 2);
        // Back on the registering thread, so this one ran inline
        assert_eq!(chained.result().unwrap(), 20);
        assert_eq!(background.pending(), 0);
    }

    /// Continuations registered from a context run back on that context
    #[test]
    fn captured_context() {
        let ui = QueueTarget::new();
        let ui_target: Arc<dyn DispatchTarget> = ui.clone();
        let source = AsyncCompletionSource::<u32>::new();

        let ran_on = Arc::new(Mutex::new(None));
        let c_ran_on = ran_on.clone();
        let continuation = {
            let _guard = crate::executor::context::enter(ui_target);
            source.operation().map(move |v| {
                *c_ran_on.lock() = Some(thread::current().id());
                v
            })
        };

        thread::spawn(move || source.set_result(1).unwrap()).join().unwrap();
        assert!(!continuation.is_completed());
        assert_eq!(ui.run_pending(), 1);
        assert_eq!(continuation.result().unwrap(), 1);
        assert_eq!(*ran_on.lock(), Some(thread::current().id()));
    }
}
