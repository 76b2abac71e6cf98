//! Cancellation signals
//!
//! Operations can be linked to an external cancellation signal at creation
//! time. The signal is owned by host code: it may be wired to a "cancel"
//! button, a deadline timer, the shutdown of a subsystem... All the operation
//! machinery needs is to check whether it was triggered, and to be told when
//! it is.

use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};


/// Read-only view of a one-shot cancellation signal
pub trait CancellationSignal: Send + Sync {
    /// Truth that cancellation was requested
    fn is_triggered(&self) -> bool;

    /// Have a callback invoked once the signal is triggered
    ///
    /// If the signal was already triggered, the callback is invoked right away
    /// on the calling thread. Dropping the returned registration unsubscribes
    /// the callback if it has not run yet.
    ///
    fn on_triggered(&self,
                    callback: Box<dyn FnOnce() + Send>) -> SignalRegistration;
}


/// Subscription to a cancellation signal, released on drop
#[must_use = "dropping a registration unsubscribes its callback"]
pub struct SignalRegistration {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}
//
impl SignalRegistration {
    /// Build a registration which runs `unregister` when dropped
    pub fn new<F: FnOnce() + Send + 'static>(unregister: F) -> Self {
        SignalRegistration { unregister: Some(Box::new(unregister)) }
    }

    /// Registration which has nothing to release
    pub fn empty() -> Self {
        SignalRegistration { unregister: None }
    }
}
//
impl Drop for SignalRegistration {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}
//
impl fmt::Debug for SignalRegistration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SignalRegistration")
         .field("active", &self.unregister.is_some())
         .finish()
    }
}


/// Host-side handle used to trigger cancellation
#[derive(Clone, Default)]
pub struct CancellationSource {
    shared: Arc<SignalState>,
}
//
impl CancellationSource {
    /// Create a new, untriggered cancellation source
    pub fn new() -> Self {
        Self::default()
    }

    /// Token which can be handed out to operations
    pub fn token(&self) -> CancellationToken {
        CancellationToken { shared: self.shared.clone() }
    }

    /// Trigger the signal, running every subscribed callback exactly once
    pub fn cancel(&self) {
        let hooks = {
            let mut hooks = self.shared.hooks.lock();
            if self.shared.triggered.swap(true, Ordering::AcqRel) {
                return;
            }
            mem::take(&mut hooks.entries)
        };
        for (_, hook) in hooks {
            hook();
        }
    }

    /// Truth that cancellation was requested
    pub fn is_cancellation_requested(&self) -> bool {
        self.shared.triggered.load(Ordering::Acquire)
    }
}


/// Operation-side view of a `CancellationSource`
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<SignalState>,
}
//
impl CancellationSignal for CancellationToken {
    fn is_triggered(&self) -> bool {
        self.shared.triggered.load(Ordering::Acquire)
    }

    fn on_triggered(&self,
                    callback: Box<dyn FnOnce() + Send>) -> SignalRegistration {
        {
            let mut hooks = self.shared.hooks.lock();
            if !self.shared.triggered.load(Ordering::Acquire) {
                let key = hooks.next_key;
                hooks.next_key += 1;
                hooks.entries.push((key, callback));
                return self.registration(key);
            }
        }
        callback();
        SignalRegistration::empty()
    }
}
//
impl CancellationToken {
    fn registration(&self, key: u64) -> SignalRegistration {
        let shared: Weak<SignalState> = Arc::downgrade(&self.shared);
        SignalRegistration::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.hooks.lock().entries.retain(|(k, _)| *k != key);
            }
        })
    }
}


/// State shared between a cancellation source and its tokens
#[derive(Default)]
struct SignalState {
    /// Set once, when the source is canceled
    triggered: AtomicBool,

    /// Callbacks waiting for the signal (mutex-protected)
    hooks: Mutex<Hooks>,
}
//
#[derive(Default)]
struct Hooks {
    next_key: u64,
    entries: Vec<(u64, Box<dyn FnOnce() + Send>)>,
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_hook(counter: &Arc<AtomicUsize>) -> Box<dyn FnOnce() + Send> {
        let counter = counter.clone();
        Box::new(move || { counter.fetch_add(1, Ordering::Relaxed); })
    }

    /// Hooks run exactly once, when the source is canceled
    #[test]
    fn trigger() {
        let source = CancellationSource::new();
        let token = source.token();
        let counter = Arc::new(AtomicUsize::new(0));
        let _registration = token.on_triggered(counter_hook(&counter));
        assert!(!token.is_triggered());
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        source.cancel();
        source.cancel();
        assert!(token.is_triggered());
        assert!(source.is_cancellation_requested());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    /// Subscribing to a triggered signal runs the hook immediately
    #[test]
    fn late_subscription() {
        let source = CancellationSource::new();
        source.cancel();
        let counter = Arc::new(AtomicUsize::new(0));
        let _registration = source.token().on_triggered(counter_hook(&counter));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    /// Dropping a registration unsubscribes its hook
    #[test]
    fn unsubscription() {
        let source = CancellationSource::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let registration = source.token().on_triggered(counter_hook(&counter));
        drop(registration);
        assert!(source.shared.hooks.lock().entries.is_empty());
        source.cancel();
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
