//! Per-thread current dispatch context
//!
//! A thread which owns a dispatch target (e.g. a frame loop pumping a
//! `QueueTarget`) enters it as its current context. Callbacks registered from
//! that thread then capture it, and will be brought back to it when the
//! operation completes elsewhere.

use super::{same_target, DispatchTarget};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;


thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn DispatchTarget>>> =
        const { RefCell::new(None) };
}


/// Current dispatch context of the calling thread
pub fn current() -> Option<Arc<dyn DispatchTarget>> {
    CURRENT.with(|current| current.borrow().clone())
}


/// Make `target` the calling thread's current context until the guard drops
pub fn enter(target: Arc<dyn DispatchTarget>) -> ContextGuard {
    let previous = CURRENT.with(|current| current.replace(Some(target)));
    ContextGuard { previous, _not_send: PhantomData }
}


/// Truth that `target` is the calling thread's current context
pub(crate) fn is_current(target: &Arc<dyn DispatchTarget>) -> bool {
    CURRENT.with(|current| {
        current.borrow().as_ref().map_or(false, |cur| same_target(cur, target))
    })
}


/// Restores the previous dispatch context when dropped
#[must_use = "the context is left as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<Arc<dyn DispatchTarget>>,

    /// Guards must be dropped on the thread which created them
    _not_send: PhantomData<*const ()>,
}
//
impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::inline::InlineTarget;
    use std::thread;

    /// Contexts nest and get restored in reverse order
    #[test]
    fn nesting() {
        assert!(current().is_none());
        let outer: Arc<dyn DispatchTarget> = Arc::new(InlineTarget::new());
        let inner: Arc<dyn DispatchTarget> = Arc::new(InlineTarget::new());
        {
            let _outer_guard = enter(outer.clone());
            assert!(is_current(&outer));
            {
                let _inner_guard = enter(inner.clone());
                assert!(is_current(&inner));
                assert!(!is_current(&outer));
            }
            assert!(is_current(&outer));
        }
        assert!(current().is_none());
    }

    /// Contexts are per-thread
    #[test]
    fn thread_locality() {
        let target: Arc<dyn DispatchTarget> = Arc::new(InlineTarget::new());
        let _guard = enter(target);
        let seen_elsewhere = thread::spawn(|| current().is_some())
            .join().unwrap();
        assert!(!seen_elsewhere);
    }
}
