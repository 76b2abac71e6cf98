//! Asynchronous operations
//!
//! Picture yourself in a situation where: you want to delegate work to another
//! hardware or software entity, such as a coroutine, a thread pool, a GPU, an
//! IO device, or a game engine's frame loop. You know that the work is going
//! to take some time, and you have other things to do meanwhile, so you would
//! rather not wait for its completion. But you would like a way to monitor the
//! progress of this work, know when it's done, manage errors, and chain more
//! work after it...
//!
//! This crate provides a single operation type for this, `AsyncOp<T>`, along
//! with the means to compose it, without bringing a thread pool or a reactor
//! of its own:
//!
//! - Producers drive an operation through an `AsyncCompletionSource`, which
//!   reports progress and completes the operation exactly once, with either a
//!   result, a failure or a cancellation.
//! - Consumers query the operation, register completion and progress
//!   callbacks, or build continuations (`then`, `catch`, `finally`...) and
//!   aggregates (`when_all`, `when_any`) on top of it. Cancellation of a
//!   derived operation travels back to whatever it is waiting on.
//! - Callbacks run where their registrant asked for: inline, on the thread's
//!   current dispatch context, or on a `DispatchTarget` supplied by the host
//!   application.
//!
//! Clients living on a thread of their own may also block on, poll, or await
//! operations, see the `multithread` module.

pub mod callbacks;
pub mod cancel;
pub mod client;
pub mod combinators;
pub mod config;
pub mod continuation;
pub mod error;
pub mod executor;
pub mod multithread;
pub mod operation;
pub mod server;
pub mod status;

pub use crate::callbacks::{CallbackId, CompletionCallback, ProgressCallback};
pub use crate::cancel::{CancellationSignal, CancellationSource, CancellationToken};
pub use crate::client::AsyncOpClient;
pub use crate::combinators::{when_all, when_any};
pub use crate::config::{AsyncOpOptions, DispatchConfig};
pub use crate::continuation::ContinuationOptions;
pub use crate::error::{AsyncOpError, OpError};
pub use crate::executor::{Dispatch, DispatchTarget};
pub use crate::multithread::future::AsyncOpFuture;
pub use crate::multithread::polling::{AsyncOpMonitor, Snapshot};
pub use crate::operation::{AsyncOp, AsyncOpValue};
pub use crate::server::AsyncCompletionSource;
pub use crate::status::AsyncOpStatus;
