//! Asynchronous callback executors
//!
//! Whenever callback-based asynchronous notifications are used, one important
//! design issue is to decide how the callback functions should be executed.
//!
//! A traditional answer to this problem has been to run callbacks directly on
//! the thread which completed the operation, as part of the status update
//! process. While this approach, also known as inline callback execution,
//! works and has minimal scheduling overhead, it also runs client code on
//! whichever thread the producer happens to live on, which is a problem for
//! clients whose state may only be touched from one specific thread (think UI
//! or game engine main loops).
//!
//! For this reason, each callback remembers where it should run. This is
//! expressed through dispatch targets, which are places where work can be
//! posted for later execution, and through the notion of a thread's current
//! dispatch context, which callbacks capture at registration time.
//!
//! Inline execution is trampolined: a job which runs inline while another
//! inline job is already running on the same thread is queued, and runs once
//! the outer job returns. Completing a long chain of operations thus takes a
//! bounded amount of stack.

pub mod context;
pub mod inline;
pub mod pool;
pub mod queue;

use crate::config::DispatchConfig;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::trace;


/// Unit of work posted to a dispatch target
pub type Job = Box<dyn FnOnce() + Send + 'static>;


/// Place where callbacks can be posted for later execution
///
/// Host code (a frame pump, a UI thread, a thread pool...) implements this to
/// receive callbacks and run them, in posting order, on its own terms.
///
pub trait DispatchTarget: Send + Sync {
    /// Schedule a job for execution
    fn post(&self, job: Job);
}


/// Where a callback should run, as requested at registration time
#[derive(Clone, Default)]
pub enum Dispatch {
    /// Capture the registering thread's current dispatch context, if any
    #[default]
    CapturedContext,

    /// Always run inline, on whichever thread completes the operation
    Synchronous,

    /// Always post to the configured default dispatch target
    DefaultContext,

    /// Run on a specific dispatch target
    Target(Arc<dyn DispatchTarget>),
}
//
impl Dispatch {
    /// Resolve this request on the registering thread
    pub(crate) fn resolve(self) -> CallbackTarget {
        match self {
            Dispatch::CapturedContext => match context::current() {
                Some(target) => CallbackTarget::Context(target),
                None => CallbackTarget::NoContext,
            },
            Dispatch::Synchronous => CallbackTarget::Synchronous,
            Dispatch::DefaultContext => CallbackTarget::DefaultContext,
            Dispatch::Target(target) => CallbackTarget::Context(target),
        }
    }
}
//
impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Dispatch::CapturedContext => f.write_str("CapturedContext"),
            Dispatch::Synchronous => f.write_str("Synchronous"),
            Dispatch::DefaultContext => f.write_str("DefaultContext"),
            Dispatch::Target(_) => f.write_str("Target(..)"),
        }
    }
}


thread_local! {
    /// Inline jobs waiting for the running one, while a drain is in progress
    static INLINE_JOBS: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Ends the current thread's inline drain, even if a job panicked
struct DrainGuard;
//
impl Drop for DrainGuard {
    fn drop(&mut self) {
        let leftover = INLINE_JOBS.with(|jobs| jobs.borrow_mut().take());
        drop(leftover);
    }
}


/// Run a job inline on the current thread
///
/// If the current thread is already running inline jobs, the job is queued
/// behind them instead of nesting on the stack. Either way, it has run by the
/// time the outermost inline job returns.
///
pub(crate) fn run_inline(job: Job) {
    let job = INLINE_JOBS.with(|jobs| match jobs.borrow_mut().as_mut() {
        Some(queued) => {
            queued.push_back(job);
            None
        },
        None => Some(job),
    });
    let Some(job) = job else { return };

    INLINE_JOBS.with(|jobs| *jobs.borrow_mut() = Some(VecDeque::new()));
    let _drain = DrainGuard;
    job();
    while let Some(job) = INLINE_JOBS.with(|jobs| {
        jobs.borrow_mut().as_mut().and_then(VecDeque::pop_front)
    }) {
        job();
    }
}


/// Resolved dispatch target of a registered callback
#[derive(Clone)]
pub(crate) enum CallbackTarget {
    Synchronous,
    DefaultContext,
    Context(Arc<dyn DispatchTarget>),
    NoContext,
}


/// Truth that two handles designate the same dispatch target
pub fn same_target(a: &Arc<dyn DispatchTarget>,
                   b: &Arc<dyn DispatchTarget>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}


/// Run or post a callback job according to its resolved target
///
/// - Synchronous callbacks always run inline.
/// - Default-context callbacks are always posted to the default target.
/// - Callbacks with a context run inline when the current thread is in that
///   context, and are posted to it otherwise.
/// - Callbacks without a context run inline on the thread which registered
///   them, or when the completion was flagged synchronous. Anywhere else, they
///   are handed over to the background target rather than running client code
///   on an unexpected thread.
///
pub(crate) fn dispatch(config: &DispatchConfig,
                       target: &CallbackTarget,
                       registered_on: ThreadId,
                       synchronous: bool,
                       job: Job) {
    match target {
        CallbackTarget::Synchronous => run_inline(job),
        CallbackTarget::DefaultContext => {
            trace!("posting callback to the default dispatch target");
            config.default_target().post(job);
        },
        CallbackTarget::Context(target) => {
            if context::is_current(target) {
                run_inline(job);
            } else {
                trace!("posting callback to its captured context");
                target.post(job);
            }
        },
        CallbackTarget::NoContext => {
            if synchronous || thread::current().id() == registered_on {
                run_inline(job);
            } else {
                trace!("handing callback over to the background target");
                config.background().post(job);
            }
        },
    }
}
