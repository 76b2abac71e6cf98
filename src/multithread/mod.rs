//! Multithreaded asynchronous operation monitoring
//!
//! Completion callbacks are the most general way to react to an operation's
//! progress and completion, but they are not always the most convenient one.
//! This submodule provides other monitoring facilities, for clients which live
//! on a thread of their own:
//!
//! - Polling is suitable when a client is only interested in periodically
//!   checking the operation status and does not want to synchronize with status
//!   updates. One possible use case is refreshing UI controls.
//! - Blocking allows a client to wait for completion. Although easy to use
//!   and reason about, this synchronization method should be used sparingly as
//!   it can have a strong averse effect on application performance.
//! - Futures let async code await an operation's result.

pub mod blocking;
pub mod future;
pub mod polling;
