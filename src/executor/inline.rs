//! Inline dispatch target, implementing synchronous callback execution
//!
//! This dispatch target follows the traditional pattern of directly executing
//! callbacks on the thread which posts them. It has minimal overhead and
//! makes execution fully deterministic, which is why it is the default for
//! both the default and the background targets of `DispatchConfig`.
//! Jobs posted from within another inline job are queued behind it.

use super::{run_inline, DispatchTarget, Job};


/// DispatchTarget implementation suitable for inline callback execution
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineTarget {}
//
impl InlineTarget {
    /// Create a new inline dispatch target
    pub fn new() -> Self {
        InlineTarget {}
    }
}
//
impl DispatchTarget for InlineTarget {
    fn post(&self, job: Job) {
        run_inline(job);
    }
}
