//! The asynchronous operation state machine
//!
//! An `AsyncOp<T>` is a cheap, clonable handle to the shared state of one
//! asynchronous operation: its status, progress, outcome and callbacks. All of
//! this state is guarded by a single lock per operation, and callbacks are
//! always invoked after that lock has been released, so that they may freely
//! query the operation or register further callbacks.
//!
//! Consumers only get read access through this handle. Producers complete the
//! operation through an `AsyncCompletionSource` (see the `server` module), and
//! continuations and combinators drive their own operations through the
//! crate-private methods defined here.

use crate::callbacks::{CallbackId, CallbackRegistry, CompletionCallback,
                       Entry, ProgressCallback};
use crate::cancel::SignalRegistration;
use crate::client::AsyncOpClient;
use crate::config::{AsyncOpOptions, DispatchConfig, UserState};
use crate::error::{AsyncOpError, OpError};
use crate::executor::{self, Dispatch};
use crate::status::AsyncOpStatus;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};


/// Highest progress value reported by an operation which is not completed yet
pub const MAX_PENDING_PROGRESS: f32 = 1.0 - f32::EPSILON;


/// Trait bounds which every operation result type should honor
pub trait AsyncOpValue: Clone + Send + 'static {}
//
impl<T: Clone + Send + 'static> AsyncOpValue for T {}


/// Final outcome of an operation
#[derive(Clone, Debug)]
pub(crate) enum Settled<T> {
    Value(T),
    Faulted(OpError),
    Canceled(OpError),
}
//
impl<T> Settled<T> {
    /// Classify a failure, cancellations being told apart from faults
    pub(crate) fn failure(error: OpError) -> Self {
        if error.is_canceled() {
            Settled::Canceled(error)
        } else {
            Settled::Faulted(error)
        }
    }

    pub(crate) fn status(&self) -> AsyncOpStatus {
        match *self {
            Settled::Value(_) => AsyncOpStatus::RanToCompletion,
            Settled::Faulted(_) => AsyncOpStatus::Faulted,
            Settled::Canceled(_) => AsyncOpStatus::Canceled,
        }
    }

    /// Split a success from a failure, retyping the latter
    pub(crate) fn forward<U>(self) -> Result<T, Settled<U>> {
        match self {
            Settled::Value(value) => Ok(value),
            Settled::Faulted(error) => Err(Settled::Faulted(error)),
            Settled::Canceled(error) => Err(Settled::Canceled(error)),
        }
    }

    pub(crate) fn into_result(self) -> Result<T, OpError> {
        match self {
            Settled::Value(value) => Ok(value),
            Settled::Faulted(error) | Settled::Canceled(error) => Err(error),
        }
    }

    fn action(&self) -> &'static str {
        match *self {
            Settled::Value(_) => "set the result",
            Settled::Faulted(_) => "set an exception",
            Settled::Canceled(_) => "cancel",
        }
    }
}
//
impl<T> From<Result<T, OpError>> for Settled<T> {
    fn from(result: Result<T, OpError>) -> Self {
        match result {
            Ok(value) => Settled::Value(value),
            Err(error) => Settled::failure(error),
        }
    }
}


/// How a pending operation computes its progress
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ProgressMode {
    /// Progress is whatever the producer last reported
    Reported,

    /// Continuation: follows its antecedent, then the operation it chained to
    Sequential { chained: bool },

    /// Mean of the linked operations' progress
    Mean,

    /// Maximum of the linked operations' progress
    Max,
}


/// Reference from an operation to one it depends on
///
/// Links are followed to compute derived progress and to propagate
/// cancellation. They are released when the operation completes, and the
/// callbacks which the operation registered on the linked one go with them.
///
pub(crate) struct Link {
    op: Arc<dyn AsyncOpClient>,
    completion: Option<CallbackId>,
    progress: Option<CallbackId>,
}
//
impl Link {
    /// Unregister our callbacks from the linked operation, if still there
    fn detach(&self) {
        if let Some(id) = self.completion {
            self.op.remove_completion_callback(id);
        }
        if let Some(id) = self.progress {
            self.op.remove_progress_callback(id);
        }
    }

    /// Detach from the linked operation, then cancel it
    fn cancel(self) {
        self.detach();
        self.op.cancel();
    }
}


/// Mutable state of an operation (mutex-protected)
pub(crate) struct State<T> {
    pub(crate) status: AsyncOpStatus,
    progress: f32,
    outcome: Option<Settled<T>>,
    callbacks: CallbackRegistry<T>,
    completed_synchronously: bool,
    disposed: bool,
    progress_mode: ProgressMode,
    links: SmallVec<[Link; 2]>,
    signal_registration: Option<SignalRegistration>,
}


/// State shared by every handle to an operation
pub(crate) struct Core<T> {
    /// Identifier used in diagnostics
    id: u64,

    /// Current operation state
    pub(crate) state: Mutex<State<T>>,

    /// Condition variable notified when the operation completes
    pub(crate) completed: Condvar,

    /// Dispatch configuration, inherited by continuations
    pub(crate) config: DispatchConfig,

    /// Client data attached at creation
    user_state: Option<UserState>,
}


static NEXT_ID: AtomicU64 = AtomicU64::new(1);


/// Asynchronous operation
pub struct AsyncOp<T> {
    pub(crate) core: Arc<Core<T>>,
}
//
impl<T> Clone for AsyncOp<T> {
    fn clone(&self) -> Self {
        AsyncOp { core: self.core.clone() }
    }
}
//
impl<T> AsyncOp<T> {
    /// Identifier used in diagnostics
    pub(crate) fn id(&self) -> u64 {
        self.core.id
    }
}
//
impl<T: AsyncOpValue> AsyncOp<T> {
    // === CONSTRUCTION ===

    fn from_parts(config: DispatchConfig,
                  user_state: Option<UserState>,
                  status: AsyncOpStatus,
                  outcome: Option<Settled<T>>,
                  progress_mode: ProgressMode) -> Self {
        let completed = outcome.is_some();
        AsyncOp {
            core: Arc::new(Core {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(State {
                    status,
                    progress: if completed { 1.0 } else { 0.0 },
                    outcome,
                    callbacks: CallbackRegistry::new(),
                    completed_synchronously: completed,
                    disposed: false,
                    progress_mode,
                    links: SmallVec::new(),
                    signal_registration: None,
                }),
                completed: Condvar::new(),
                config,
                user_state,
            }),
        }
    }

    /// Create a pending operation, used by continuations and combinators
    pub(crate) fn pending(config: DispatchConfig,
                          progress_mode: ProgressMode) -> Self {
        Self::from_parts(config, None, AsyncOpStatus::Created, None,
                         progress_mode)
    }

    /// Create an operation which is already completed
    pub(crate) fn settled(config: DispatchConfig,
                          user_state: Option<UserState>,
                          outcome: Settled<T>) -> Self {
        let status = outcome.status();
        Self::from_parts(config, user_state, status, Some(outcome),
                         ProgressMode::Reported)
    }

    /// Create a pending operation as requested by a producer
    pub(crate) fn with_options(options: AsyncOpOptions) -> Self {
        let AsyncOpOptions { dispatch, cancellation, user_state } = options;
        let signal = match cancellation {
            Some(signal) if signal.is_triggered() => {
                return Self::settled(dispatch, user_state,
                                     Settled::Canceled(OpError::canceled()));
            },
            signal => signal,
        };

        let op = Self::from_parts(dispatch, user_state, AsyncOpStatus::Created,
                                  None, ProgressMode::Reported);
        if let Some(signal) = signal {
            let weak = Arc::downgrade(&op.core);
            let registration = signal.on_triggered(Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    AsyncOp { core }.cancel();
                }
            }));
            let mut state = op.core.state.lock();
            if state.status.is_final() {
                drop(state);
                drop(registration);
            } else {
                state.signal_registration = Some(registration);
            }
        }
        op
    }

    /// Operation which ran to completion with a known result
    pub fn from_result(value: T) -> Self {
        Self::settled(DispatchConfig::default(), None, Settled::Value(value))
    }

    /// Operation which failed with a known error
    ///
    /// An error made only of cancellations yields a canceled operation.
    ///
    pub fn from_exception(error: OpError) -> Self {
        Self::settled(DispatchConfig::default(), None, Settled::failure(error))
    }

    /// Operation which was canceled before it could start
    pub fn canceled() -> Self {
        Self::settled(DispatchConfig::default(), None,
                      Settled::Canceled(OpError::canceled()))
    }


    // === STATUS AND OUTCOME ===

    /// Current status of the operation (available even after disposal)
    pub fn status(&self) -> AsyncOpStatus {
        self.core.state.lock().status
    }

    /// Truth that the operation reached a final status
    pub fn is_completed(&self) -> bool {
        self.status().is_final()
    }

    pub fn is_completed_successfully(&self) -> bool {
        self.status() == AsyncOpStatus::RanToCompletion
    }

    pub fn is_faulted(&self) -> bool {
        self.status() == AsyncOpStatus::Faulted
    }

    pub fn is_canceled(&self) -> bool {
        self.status() == AsyncOpStatus::Canceled
    }

    /// Truth that the operation was completed before anyone could observe it
    /// running
    pub fn completed_synchronously(&self) -> bool {
        self.core.state.lock().completed_synchronously
    }

    pub fn is_disposed(&self) -> bool {
        self.core.state.lock().disposed
    }

    /// Client data attached at creation (available even after disposal)
    pub fn user_state(&self) -> Option<&UserState> {
        self.core.user_state.as_ref()
    }

    /// Result of an operation which ran to completion
    pub fn result(&self) -> Result<T, AsyncOpError> {
        let state = self.core.state.lock();
        if state.disposed {
            return Err(AsyncOpError::Disposed);
        }
        match &state.outcome {
            Some(Settled::Value(value)) => Ok(value.clone()),
            Some(Settled::Faulted(error)) | Some(Settled::Canceled(error)) => {
                Err(AsyncOpError::Unsuccessful {
                    status: state.status,
                    error: error.clone(),
                })
            },
            None => Err(AsyncOpError::InvalidState {
                status: state.status,
                action: "read the result",
            }),
        }
    }

    /// Failure of a faulted or canceled operation, if any
    pub fn exception(&self) -> Result<Option<OpError>, AsyncOpError> {
        let state = self.core.state.lock();
        if state.disposed {
            return Err(AsyncOpError::Disposed);
        }
        Ok(match &state.outcome {
            Some(Settled::Faulted(error)) | Some(Settled::Canceled(error)) => {
                Some(error.clone())
            },
            _ => None,
        })
    }

    /// Current progress, in [0, 1]
    ///
    /// Operations which follow other operations keep their progress up to
    /// date as the linked operations report theirs, so this never walks a
    /// chain of operations.
    ///
    pub fn progress(&self) -> Result<f32, AsyncOpError> {
        let state = self.core.state.lock();
        if state.disposed {
            return Err(AsyncOpError::Disposed);
        }
        if state.status.is_final() {
            return Ok(1.0);
        }
        Ok(state.progress)
    }

    /// Outcome of a completed operation, ignoring disposal
    pub(crate) fn outcome(&self) -> Option<Settled<T>> {
        self.core.state.lock().outcome.clone()
    }


    // === CALLBACKS ===

    /// Have a callback invoked when the operation completes
    ///
    /// If the operation is already completed, the callback is invoked right
    /// away, subject to the dispatch rules.
    ///
    pub fn add_completion_callback(
        &self,
        callback: CompletionCallback<T>,
        dispatch: Dispatch
    ) -> Result<CallbackId, AsyncOpError> {
        let target = dispatch.resolve();
        let mut state = self.core.state.lock();
        if state.disposed {
            return Err(AsyncOpError::Disposed);
        }
        if !state.status.is_final() {
            return Ok(state.callbacks.add_completion(callback, target));
        }
        let id = state.callbacks.next_id();
        drop(state);
        Entry::new(id, callback, target).invoke(self, true);
        Ok(id)
    }

    /// Like `add_completion_callback`, but only reports success
    pub fn try_add_completion_callback(&self,
                                       callback: CompletionCallback<T>,
                                       dispatch: Dispatch) -> bool {
        self.add_completion_callback(callback, dispatch).is_ok()
    }

    /// Run `f` on completion, from the registering thread's context
    pub fn on_completed<F>(&self, f: F) -> Result<CallbackId, AsyncOpError>
        where F: FnOnce(&AsyncOp<T>) + Send + 'static
    {
        self.add_completion_callback(CompletionCallback::operation(f),
                                     Dispatch::CapturedContext)
    }

    /// Unregister a completion callback which has not run yet
    pub fn remove_completion_callback(&self, id: CallbackId) -> bool {
        self.core.state.lock().callbacks.remove(id)
    }

    /// Have a callback invoked whenever the operation's progress changes
    ///
    /// If the operation is already completed, the callback is invoked right
    /// away with the final progress.
    ///
    pub fn add_progress_callback(
        &self,
        callback: ProgressCallback<T>,
        dispatch: Dispatch
    ) -> Result<CallbackId, AsyncOpError> {
        let target = dispatch.resolve();
        let mut state = self.core.state.lock();
        if state.disposed {
            return Err(AsyncOpError::Disposed);
        }
        if !state.status.is_final() {
            return Ok(state.callbacks.add_progress(callback, target));
        }
        let id = state.callbacks.next_id();
        drop(state);
        Entry::new(id, callback, target).invoke(self, 1.0, true);
        Ok(id)
    }

    /// Run `f` with the new progress value, from the registering thread's
    /// context
    pub fn on_progress<F>(&self, f: F) -> Result<CallbackId, AsyncOpError>
        where F: Fn(f32) + Send + Sync + 'static
    {
        self.add_progress_callback(ProgressCallback::value(f),
                                   Dispatch::CapturedContext)
    }

    pub fn remove_progress_callback(&self, id: CallbackId) -> bool {
        self.core.state.lock().callbacks.remove(id)
    }


    // === CANCELLATION AND DISPOSAL ===

    /// Cancel the operation and everything it is waiting on
    ///
    /// The operation is canceled first, then cancellation is propagated to
    /// its antecedents, chained operations or children. Like inline callbacks,
    /// propagation is queued behind the running inline job, if any.
    ///
    pub fn cancel(&self) {
        if let Ok(links) = self.complete(Settled::Canceled(OpError::canceled()),
                                         false) {
            if !links.is_empty() {
                debug!(op = self.id(), links = links.len(),
                       "propagating cancellation");
            }
            for link in links {
                executor::run_inline(Box::new(move || link.cancel()));
            }
        }
    }

    /// Release the operation's resources
    ///
    /// Only completed operations can be disposed of. Afterwards, their status
    /// remains readable but their outcome and progress are not.
    ///
    pub fn dispose(&self) -> Result<(), AsyncOpError> {
        let (registration, links) = {
            let mut state = self.core.state.lock();
            if state.disposed {
                return Ok(());
            }
            if !state.status.is_final() {
                return Err(AsyncOpError::InvalidState {
                    status: state.status,
                    action: "dispose",
                });
            }
            state.disposed = true;
            (state.signal_registration.take(), mem::take(&mut state.links))
        };
        drop(registration);
        drop(links);
        trace!(op = self.id(), "operation disposed");
        Ok(())
    }


    // === PRODUCER SIDE ===

    /// Attempt to reach a final status
    ///
    /// On success, returns the links which the operation held. Completed
    /// operations, disposed or not, reject the attempt as an invalid state
    /// transition. A failure recorded on an already faulted operation is
    /// merged into its error unless it was disposed.
    ///
    fn complete(&self,
                outcome: Settled<T>,
                synchronous: bool) -> Result<SmallVec<[Link; 2]>, AsyncOpError> {
        let (callbacks, links, registration, status) = {
            let mut state = self.core.state.lock();
            // Disposed operations are final too
            if state.status.is_final() {
                if let (false, Some(Settled::Faulted(recorded)), Settled::Faulted(late)) =
                    (state.disposed, state.outcome.as_mut(), &outcome)
                {
                    recorded.merge(late);
                }
                return Err(AsyncOpError::InvalidState {
                    status: state.status,
                    action: outcome.action(),
                });
            }
            let status = outcome.status();
            debug_assert!(state.status.can_transition_to(status));
            state.status = status;
            state.progress = 1.0;
            state.outcome = Some(outcome);
            state.completed_synchronously = synchronous;
            (state.callbacks.drain(),
             mem::take(&mut state.links),
             state.signal_registration.take(),
             status)
        };
        self.core.completed.notify_all();
        drop(registration);
        trace!(op = self.id(), %status, "operation completed");
        callbacks.invoke_all(self, synchronous);
        Ok(links)
    }

    /// Drive the operation to a final outcome, detaching from its links
    pub(crate) fn try_settle(&self,
                             outcome: Settled<T>,
                             synchronous: bool) -> Result<(), AsyncOpError> {
        for link in self.complete(outcome, synchronous)? {
            link.detach();
        }
        Ok(())
    }

    /// Copy the outcome of a completed operation onto this one
    pub(crate) fn copy_outcome(&self, source: &AsyncOp<T>) -> bool {
        match source.outcome() {
            Some(outcome) => self.try_settle(outcome, false).is_ok(),
            None => false,
        }
    }

    /// Move from Created to Running
    pub(crate) fn start(&self) -> Result<bool, AsyncOpError> {
        let mut state = self.core.state.lock();
        match state.status {
            AsyncOpStatus::Created => {
                state.status = AsyncOpStatus::Running;
                Ok(true)
            },
            AsyncOpStatus::Running => Ok(false),
            status => Err(AsyncOpError::InvalidState {
                status,
                action: "start",
            }),
        }
    }

    /// Record the producer's progress and notify progress callbacks
    pub(crate) fn report_progress(&self,
                                  progress: f32) -> Result<(), AsyncOpError> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(AsyncOpError::InvalidArgument(
                "progress must be within [0, 1]"
            ));
        }
        let progress = progress.min(MAX_PENDING_PROGRESS);
        let batch = {
            let mut state = self.core.state.lock();
            if state.status.is_final() {
                return Err(AsyncOpError::InvalidState {
                    status: state.status,
                    action: "set progress",
                });
            }
            if state.status == AsyncOpStatus::Created {
                state.status = AsyncOpStatus::Running;
            }
            if state.progress == progress {
                return Ok(());
            }
            state.progress = progress;
            state.callbacks.progress_batch()
        };
        trace!(op = self.id(), progress, "progress updated");
        batch.invoke_progress_only(self, progress);
        Ok(())
    }

    /// Recompute derived progress, notifying progress callbacks on change
    pub(crate) fn raise_progress_changed(&self) {
        let (mode, links) = {
            let state = self.core.state.lock();
            if state.disposed || state.status.is_final()
               || state.progress_mode == ProgressMode::Reported {
                return;
            }
            let links = state.links
                             .iter()
                             .map(|link| link.op.clone())
                             .collect::<SmallVec<[_; 4]>>();
            (state.progress_mode, links)
        };
        let progress = derived_progress(mode, &links).clamp(0.0, MAX_PENDING_PROGRESS);
        let batch = {
            let mut state = self.core.state.lock();
            if state.status.is_final() || state.progress == progress {
                return;
            }
            state.progress = progress;
            state.callbacks.progress_batch()
        };
        if !batch.is_empty() {
            batch.invoke_progress_only(self, progress);
        }
    }

    /// Link this operation to one it depends on, and follow its progress
    ///
    /// `completion` is the callback this operation registered on `source`, if
    /// any. It is removed with the progress subscription when this operation
    /// completes. Returns false, detaching from `source`, if this operation
    /// already completed.
    ///
    pub(crate) fn add_link<S: AsyncOpValue>(&self,
                                            source: &AsyncOp<S>,
                                            completion: Option<CallbackId>) -> bool {
        self.insert_link(source, completion, false)
    }

    /// Link a continuation to its antecedent
    ///
    /// The antecedent always comes first in the links, even if the
    /// continuation function already chained another operation.
    ///
    pub(crate) fn add_antecedent_link<S: AsyncOpValue>(
        &self,
        antecedent: &AsyncOp<S>,
        completion: Option<CallbackId>
    ) -> bool {
        self.insert_link(antecedent, completion, true)
    }

    fn insert_link<S: AsyncOpValue>(&self,
                                    source: &AsyncOp<S>,
                                    completion: Option<CallbackId>,
                                    first: bool) -> bool {
        let target = self.clone();
        let progress = source.add_progress_callback(
            ProgressCallback::operation(move |_| target.raise_progress_changed()),
            Dispatch::Synchronous
        ).ok();
        let link = Link { op: Arc::new(source.clone()), completion, progress };

        let mut state = self.core.state.lock();
        if state.status.is_final() {
            drop(state);
            link.detach();
            return false;
        }
        if first {
            state.links.insert(0, link);
        } else {
            state.links.push(link);
        }
        drop(state);
        self.raise_progress_changed();
        true
    }

    /// Number of registered (completion, progress) callbacks
    #[cfg(test)]
    pub(crate) fn callback_counts(&self) -> (usize, usize) {
        self.core.state.lock().callbacks.len()
    }
}
//
impl<T: AsyncOpValue> fmt::Debug for AsyncOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("AsyncOp")
         .field("id", &self.core.id)
         .field("status", &state.status)
         .field("progress", &state.progress)
         .field("disposed", &state.disposed)
         .finish()
    }
}


/// Progress of a pending operation which follows other operations
fn derived_progress(mode: ProgressMode, links: &[Arc<dyn AsyncOpClient>]) -> f32 {
    let progress = |op: &Arc<dyn AsyncOpClient>| op.progress().unwrap_or(1.0);
    match mode {
        ProgressMode::Reported => 0.0,
        ProgressMode::Sequential { chained } => match links {
            [] => 0.0,
            [antecedent] if chained => progress(antecedent) / 2.0,
            [antecedent] => progress(antecedent),
            [_, inner, ..] => 0.5 + progress(inner) / 2.0,
        },
        ProgressMode::Mean => {
            if links.is_empty() {
                0.0
            } else {
                links.iter().map(progress).sum::<f32>() / links.len() as f32
            }
        },
        ProgressMode::Max => links.iter().map(progress).fold(0.0, f32::max),
    }
}
