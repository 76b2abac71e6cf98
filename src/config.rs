//! Configuration of asynchronous operations
//!
//! There is no process-wide state in this crate. Where callbacks go when they
//! ask for the "default" context, or when they have nowhere else to go, is
//! decided by a `DispatchConfig` handed to operations at creation time, and
//! inherited by every continuation and combinator built on top of them.

use crate::cancel::CancellationSignal;
use crate::executor::DispatchTarget;
use crate::executor::inline::InlineTarget;
use std::any::Any;
use std::fmt;
use std::sync::Arc;


/// Opaque client data attached to an operation
pub type UserState = Arc<dyn Any + Send + Sync>;


/// Dispatch targets used when a callback does not bring its own
#[derive(Clone)]
pub struct DispatchConfig {
    /// Target of callbacks registered with `Dispatch::DefaultContext`
    default_target: Arc<dyn DispatchTarget>,

    /// Target of context-less callbacks completed on a foreign thread
    background: Arc<dyn DispatchTarget>,
}
//
impl DispatchConfig {
    /// Build a configuration from explicit targets
    pub fn new(default_target: Arc<dyn DispatchTarget>,
               background: Arc<dyn DispatchTarget>) -> Self {
        DispatchConfig { default_target, background }
    }

    /// Replace the default target
    pub fn with_default_target(mut self,
                               target: Arc<dyn DispatchTarget>) -> Self {
        self.default_target = target;
        self
    }

    /// Replace the background target
    pub fn with_background(mut self, target: Arc<dyn DispatchTarget>) -> Self {
        self.background = target;
        self
    }

    pub fn default_target(&self) -> &Arc<dyn DispatchTarget> {
        &self.default_target
    }

    pub fn background(&self) -> &Arc<dyn DispatchTarget> {
        &self.background
    }
}
//
impl Default for DispatchConfig {
    /// Fully inline configuration, which makes execution deterministic
    fn default() -> Self {
        let inline: Arc<dyn DispatchTarget> = Arc::new(InlineTarget::new());
        DispatchConfig {
            default_target: inline.clone(),
            background: inline,
        }
    }
}
//
impl fmt::Debug for DispatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DispatchConfig").finish_non_exhaustive()
    }
}


/// Creation-time settings of an asynchronous operation
#[derive(Clone, Default)]
pub struct AsyncOpOptions {
    /// Dispatch configuration, inherited by continuations
    pub dispatch: DispatchConfig,

    /// External signal which cancels the operation when triggered
    pub cancellation: Option<Arc<dyn CancellationSignal>>,

    /// Client data returned verbatim by `AsyncOp::user_state()`
    pub user_state: Option<UserState>,
}
//
impl AsyncOpOptions {
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_cancellation<S>(mut self, signal: S) -> Self
        where S: CancellationSignal + 'static
    {
        self.cancellation = Some(Arc::new(signal));
        self
    }

    pub fn with_user_state<U: Any + Send + Sync>(mut self, state: U) -> Self {
        self.user_state = Some(Arc::new(state));
        self
    }
}
//
impl fmt::Debug for AsyncOpOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AsyncOpOptions")
         .field("dispatch", &self.dispatch)
         .field("cancellable", &self.cancellation.is_some())
         .field("has_user_state", &self.user_state.is_some())
         .finish()
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationSource;
    use crate::executor::same_target;
    use crate::executor::queue::QueueTarget;

    /// Builder methods replace exactly what they name
    #[test]
    fn builders() {
        let queue: Arc<dyn DispatchTarget> = QueueTarget::new();
        let config = DispatchConfig::default()
            .with_default_target(queue.clone());
        assert!(same_target(config.default_target(), &queue));
        assert!(!same_target(config.background(), &queue));

        let options = AsyncOpOptions::default()
            .with_dispatch(config)
            .with_cancellation(CancellationSource::new().token())
            .with_user_state(42u32);
        assert!(options.cancellation.is_some());
        let state = options.user_state.as_ref().unwrap();
        assert_eq!(state.downcast_ref::<u32>(), Some(&42));
    }
}
