//! Completion and progress callback registry
//!
//! Every operation owns a registry of callbacks to be invoked when its
//! progress changes and when it completes. Most operations only ever get a
//! couple of continuations and at most one progress listener, so the registry
//! stores that many inline and only spills to the heap beyond.

use crate::executor::{self, CallbackTarget};
use crate::operation::{AsyncOp, AsyncOpValue};
use smallvec::SmallVec;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::Waker;
use std::thread::{self, ThreadId};
use tracing::error;


/// Handle to a registered callback, used to unregister it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);


/// Shapes of callbacks which can be notified of an operation's completion
pub enum CompletionCallback<T> {
    /// Plain action, which does not look at the operation
    Action(Box<dyn FnOnce() + Send>),

    /// Action receiving the completed operation
    Operation(Box<dyn FnOnce(&AsyncOp<T>) + Send>),

    /// Task waker, woken on completion
    Waker(Waker),
}
//
impl<T> CompletionCallback<T> {
    pub fn action<F: FnOnce() + Send + 'static>(f: F) -> Self {
        CompletionCallback::Action(Box::new(f))
    }

    pub fn operation<F>(f: F) -> Self
        where F: FnOnce(&AsyncOp<T>) + Send + 'static
    {
        CompletionCallback::Operation(Box::new(f))
    }

    /// Run the callback, containing any panic it may raise
    fn invoke(self, op: &AsyncOp<T>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || match self {
            CompletionCallback::Action(f) => f(),
            CompletionCallback::Operation(f) => f(op),
            CompletionCallback::Waker(waker) => waker.wake(),
        }));
        if outcome.is_err() {
            error!(op = op.id(), "completion callback panicked");
        }
    }
}
//
impl<T> From<Waker> for CompletionCallback<T> {
    fn from(waker: Waker) -> Self {
        CompletionCallback::Waker(waker)
    }
}
//
impl<T> fmt::Debug for CompletionCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CompletionCallback::Action(_) => f.write_str("Action(..)"),
            CompletionCallback::Operation(_) => f.write_str("Operation(..)"),
            CompletionCallback::Waker(_) => f.write_str("Waker(..)"),
        }
    }
}


/// Shapes of callbacks which can be notified of an operation's progress
pub enum ProgressCallback<T> {
    /// Reporter receiving the new progress value
    Value(Arc<dyn Fn(f32) + Send + Sync>),

    /// Action receiving the operation whose progress changed
    Operation(Arc<dyn Fn(&AsyncOp<T>) + Send + Sync>),
}
//
impl<T> ProgressCallback<T> {
    pub fn value<F: Fn(f32) + Send + Sync + 'static>(f: F) -> Self {
        ProgressCallback::Value(Arc::new(f))
    }

    pub fn operation<F>(f: F) -> Self
        where F: Fn(&AsyncOp<T>) + Send + Sync + 'static
    {
        ProgressCallback::Operation(Arc::new(f))
    }

    fn invoke(&self, op: &AsyncOp<T>, progress: f32) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match self {
            ProgressCallback::Value(f) => f(progress),
            ProgressCallback::Operation(f) => f(op),
        }));
        if outcome.is_err() {
            error!(op = op.id(), "progress callback panicked");
        }
    }
}
//
impl<T> Clone for ProgressCallback<T> {
    fn clone(&self) -> Self {
        match self {
            ProgressCallback::Value(f) => ProgressCallback::Value(f.clone()),
            ProgressCallback::Operation(f) =>
                ProgressCallback::Operation(f.clone()),
        }
    }
}


/// Registered callback, along with where it should run
pub(crate) struct Entry<C> {
    id: CallbackId,
    callback: C,
    target: CallbackTarget,
    registered_on: ThreadId,
}
//
impl<C> Entry<C> {
    pub(crate) fn new(id: CallbackId, callback: C, target: CallbackTarget) -> Self {
        Entry {
            id,
            callback,
            target,
            registered_on: thread::current().id(),
        }
    }
}
//
impl<T: AsyncOpValue> Entry<CompletionCallback<T>> {
    /// Run or post the callback, as decided by the dispatch rules
    pub(crate) fn invoke(self, op: &AsyncOp<T>, synchronous: bool) {
        let Entry { callback, target, registered_on, .. } = self;
        let config = op.core.config.clone();
        let op = op.clone();
        executor::dispatch(&config, &target, registered_on, synchronous,
                           Box::new(move || callback.invoke(&op)));
    }
}
//
impl<T: AsyncOpValue> Entry<ProgressCallback<T>> {
    pub(crate) fn invoke(&self,
                         op: &AsyncOp<T>,
                         progress: f32,
                         synchronous: bool) {
        let callback = self.callback.clone();
        let config = op.core.config.clone();
        let op = op.clone();
        executor::dispatch(&config, &self.target, self.registered_on,
                           synchronous,
                           Box::new(move || callback.invoke(&op, progress)));
    }
}
//
impl<C: Clone> Clone for Entry<C> {
    fn clone(&self) -> Self {
        Entry {
            id: self.id,
            callback: self.callback.clone(),
            target: self.target.clone(),
            registered_on: self.registered_on,
        }
    }
}


type CompletionList<T> = SmallVec<[Entry<CompletionCallback<T>>; 3]>;
type ProgressList<T> = SmallVec<[Entry<ProgressCallback<T>>; 1]>;


/// Callbacks of a single operation, in registration order
pub(crate) struct CallbackRegistry<T> {
    next_id: u64,
    completion: CompletionList<T>,
    progress: ProgressList<T>,
}
//
impl<T: AsyncOpValue> CallbackRegistry<T> {
    pub(crate) fn new() -> Self {
        CallbackRegistry {
            next_id: 0,
            completion: SmallVec::new(),
            progress: SmallVec::new(),
        }
    }

    /// Allocate an identifier, also for callbacks which are invoked directly
    pub(crate) fn next_id(&mut self) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn add_completion(&mut self,
                                 callback: CompletionCallback<T>,
                                 target: CallbackTarget) -> CallbackId {
        let id = self.next_id();
        self.completion.push(Entry::new(id, callback, target));
        id
    }

    pub(crate) fn add_progress(&mut self,
                               callback: ProgressCallback<T>,
                               target: CallbackTarget) -> CallbackId {
        let id = self.next_id();
        self.progress.push(Entry::new(id, callback, target));
        id
    }

    /// Unregister a callback, reporting whether it was still registered
    pub(crate) fn remove(&mut self, id: CallbackId) -> bool {
        if let Some(pos) = self.completion.iter().position(|e| e.id == id) {
            self.completion.remove(pos);
            return true;
        }
        if let Some(pos) = self.progress.iter().position(|e| e.id == id) {
            self.progress.remove(pos);
            return true;
        }
        false
    }

    /// Take every callback out, for invocation on completion
    pub(crate) fn drain(&mut self) -> PendingCallbacks<T> {
        PendingCallbacks {
            completion: mem::take(&mut self.completion),
            progress: mem::take(&mut self.progress),
        }
    }

    /// Copy the progress callbacks out, for invocation on progress updates
    pub(crate) fn progress_batch(&self) -> ProgressBatch<T> {
        ProgressBatch(self.progress.clone())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> (usize, usize) {
        (self.completion.len(), self.progress.len())
    }
}


/// Callbacks taken out of a completed operation's registry
pub(crate) struct PendingCallbacks<T> {
    completion: CompletionList<T>,
    progress: ProgressList<T>,
}
//
impl<T: AsyncOpValue> PendingCallbacks<T> {
    /// Report final progress, then completion, in registration order
    pub(crate) fn invoke_all(self, op: &AsyncOp<T>, synchronous: bool) {
        for entry in &self.progress {
            entry.invoke(op, 1.0, synchronous);
        }
        for entry in self.completion {
            entry.invoke(op, synchronous);
        }
    }
}


/// Progress callbacks copied out of a running operation's registry
pub(crate) struct ProgressBatch<T>(ProgressList<T>);
//
impl<T: AsyncOpValue> ProgressBatch<T> {
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn invoke_progress_only(&self, op: &AsyncOp<T>, progress: f32) {
        for entry in &self.0 {
            entry.invoke(op, progress, false);
        }
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Dispatch;
    use parking_lot::Mutex;

    fn logging_callback(log: &Arc<Mutex<Vec<String>>>,
                        name: &str) -> CompletionCallback<u32> {
        let log = log.clone();
        let name = name.to_owned();
        CompletionCallback::operation(move |op: &AsyncOp<u32>| {
            log.lock().push(format!("{}:{}", name, op.result().unwrap()));
        })
    }

    /// Identifiers are unique and removal only works once
    #[test]
    fn removal() {
        let mut registry = CallbackRegistry::<u32>::new();
        let first = registry.add_completion(CompletionCallback::action(|| {}),
                                            Dispatch::Synchronous.resolve());
        let second = registry.add_progress(ProgressCallback::value(|_| {}),
                                           Dispatch::Synchronous.resolve());
        assert_ne!(first, second);
        assert_eq!(registry.len(), (1, 1));

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert!(registry.remove(second));
        assert_eq!(registry.len(), (0, 0));
    }

    /// Callbacks beyond the inline capacity are kept, in order
    #[test]
    fn overflow_and_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::<u32>::new();
        for index in 0..5 {
            registry.add_completion(logging_callback(&log, &index.to_string()),
                                    Dispatch::Synchronous.resolve());
        }
        let progress_log = log.clone();
        registry.add_progress(
            ProgressCallback::value(move |p| {
                progress_log.lock().push(format!("progress:{}", p))
            }),
            Dispatch::Synchronous.resolve()
        );

        let pending = registry.drain();
        assert_eq!(registry.len(), (0, 0));
        pending.invoke_all(&AsyncOp::from_result(7), false);
        assert_eq!(*log.lock(),
                   vec!["progress:1", "0:7", "1:7", "2:7", "3:7", "4:7"]);
    }

    /// Panicking callbacks do not prevent the next ones from running
    #[test]
    fn panic_containment() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::<u32>::new();
        registry.add_completion(CompletionCallback::action(|| panic!("oops")),
                                Dispatch::Synchronous.resolve());
        registry.add_completion(logging_callback(&log, "after"),
                                Dispatch::Synchronous.resolve());
        registry.drain().invoke_all(&AsyncOp::from_result(1), false);
        assert_eq!(*log.lock(), vec!["after:1"]);
    }
}
