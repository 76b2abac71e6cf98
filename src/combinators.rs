//! Aggregate operations
//!
//! These operations complete as a function of a fixed set of child
//! operations. They subscribe to their children through regular completion
//! callbacks, which run immediately for children that already completed, so
//! building an aggregate over completed operations needs no special casing.

use crate::callbacks::CompletionCallback;
use crate::error::{AsyncOpError, OpError};
use crate::executor::Dispatch;
use crate::operation::{AsyncOp, AsyncOpValue, ProgressMode, Settled};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};


/// Operation which completes once every child operation has completed
///
/// If every child ran to completion, the aggregate yields their results in
/// input order. Otherwise it fails with the union of the children's errors,
/// and is canceled rather than faulted if all of these are cancellations.
/// An empty input yields an empty result right away.
///
pub fn when_all<T, I>(ops: I) -> Result<AsyncOp<Vec<T>>, AsyncOpError>
    where T: AsyncOpValue,
          I: IntoIterator<Item = AsyncOp<T>>
{
    let children = collect_children(ops)?;
    let config = match children.first() {
        Some(first) => first.core.config.clone(),
        None => return Ok(AsyncOp::from_result(Vec::new())),
    };

    let all = AsyncOp::pending(config, ProgressMode::Mean);
    let children = Arc::new(children);
    let remaining = Arc::new(AtomicUsize::new(children.len()));
    let construction = Arc::new(Construction::new());
    for child in children.iter() {
        let target = all.clone();
        let siblings = children.clone();
        let remaining = remaining.clone();
        let construction = construction.clone();
        let registered = child.add_completion_callback(
            CompletionCallback::action(move || {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let synchronous = construction.is_ongoing_here();
                    let _ = target.try_settle(combine_all(&siblings), synchronous);
                }
            }),
            Dispatch::Synchronous
        );
        match registered {
            Ok(id) => {
                if !all.add_link(child, Some(id)) {
                    break;
                }
            },
            Err(error) => {
                let _ = all.try_settle(Settled::Faulted(error.into()), true);
                break;
            },
        }
    }
    construction.finish();
    Ok(all)
}


/// Operation which completes like the first child operation to complete
///
/// If several children are already completed, the first of them in input
/// order wins. The other children are left running, unless the aggregate is
/// canceled, in which case they are canceled as well.
///
pub fn when_any<T, I>(ops: I) -> Result<AsyncOp<T>, AsyncOpError>
    where T: AsyncOpValue,
          I: IntoIterator<Item = AsyncOp<T>>
{
    let children = collect_children(ops)?;
    let first = children.first().ok_or(
        AsyncOpError::InvalidArgument("when_any needs at least one operation")
    )?;

    let any = AsyncOp::pending(first.core.config.clone(), ProgressMode::Max);
    if let Some(outcome) = children.iter().find_map(AsyncOp::outcome) {
        any.try_settle(outcome, true)?;
        return Ok(any);
    }

    for child in &children {
        let target = any.clone();
        let registered = child.add_completion_callback(
            CompletionCallback::operation(move |child: &AsyncOp<T>| {
                target.copy_outcome(child);
            }),
            Dispatch::Synchronous
        );
        match registered {
            Ok(id) => {
                if !any.add_link(child, Some(id)) {
                    break;
                }
            },
            Err(error) => {
                let _ = any.try_settle(Settled::Faulted(error.into()), true);
                break;
            },
        }
    }
    Ok(any)
}


/// Tracks whether an aggregate is still being built, and by which thread
///
/// Children completing on the building thread while it registers callbacks
/// complete the aggregate synchronously. Children completing on any other
/// thread never do, even while the aggregate is being built.
///
struct Construction {
    building: AtomicBool,
    builder: ThreadId,
}
//
impl Construction {
    fn new() -> Self {
        Construction {
            building: AtomicBool::new(true),
            builder: thread::current().id(),
        }
    }

    fn finish(&self) {
        self.building.store(false, Ordering::Release);
    }

    fn is_ongoing_here(&self) -> bool {
        thread::current().id() == self.builder
            && self.building.load(Ordering::Acquire)
    }
}


/// Collect the children of an aggregate, rejecting disposed ones
fn collect_children<T, I>(ops: I) -> Result<Vec<AsyncOp<T>>, AsyncOpError>
    where T: AsyncOpValue,
          I: IntoIterator<Item = AsyncOp<T>>
{
    let children: Vec<_> = ops.into_iter().collect();
    if children.iter().any(AsyncOp::is_disposed) {
        return Err(AsyncOpError::InvalidArgument(
            "cannot aggregate disposed operations"
        ));
    }
    Ok(children)
}


/// Outcome of a `when_all` whose children all completed
fn combine_all<T: AsyncOpValue>(children: &[AsyncOp<T>]) -> Settled<Vec<T>> {
    let mut values = Vec::with_capacity(children.len());
    let mut failure: Option<OpError> = None;
    for child in children {
        let error = match child.outcome() {
            Some(Settled::Value(value)) => {
                values.push(value);
                continue;
            },
            Some(Settled::Faulted(error)) | Some(Settled::Canceled(error)) => error,
            None => OpError::new(AsyncOpError::InvalidState {
                status: child.status(),
                action: "aggregate",
            }),
        };
        failure = Some(match failure.take() {
            Some(mut combined) => {
                combined.merge(&error);
                combined
            },
            None => error,
        });
    }
    match failure {
        Some(error) => Settled::failure(error),
        None => Settled::Value(values),
    }
}
