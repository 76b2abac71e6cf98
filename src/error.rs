//! Errors of the asynchronous operation machinery
//!
//! Two kinds of errors live here. `AsyncOpError` is what the API returns when
//! it is misused (writing to a completed operation, reading the result of a
//! running one...). `OpError` is the failure an operation itself ended up
//! with, which may aggregate several underlying causes.

use crate::status::AsyncOpStatus;
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;


/// Errors reported by the asynchronous operation API
#[derive(Clone, Debug, Error)]
pub enum AsyncOpError {
    /// The operation is not in a status which allows the requested action
    #[error("cannot {action}: operation is {status}")]
    InvalidState {
        status: AsyncOpStatus,
        action: &'static str,
    },

    /// The result was requested, but the operation did not run to completion
    #[error("operation is {status}: {error}")]
    Unsuccessful {
        status: AsyncOpStatus,
        error: OpError,
    },

    /// An argument was outside of its allowed domain
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation was disposed of and only its status can be queried
    #[error("operation has been disposed")]
    Disposed,
}
//
impl AsyncOpError {
    /// Truth that this error stems from the operation being in the wrong
    /// status for the requested action
    pub fn is_invalid_state(&self) -> bool {
        matches!(self,
                 AsyncOpError::InvalidState { .. } |
                 AsyncOpError::Unsuccessful { .. })
    }
}


/// Cause of an operation which was canceled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Error)]
#[error("operation was canceled")]
pub struct Canceled;


/// Cause of an operation whose completion source went away before completing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Error)]
#[error("completion source dropped before the operation completed")]
pub struct ProducerDropped;


/// Cause of an operation whose continuation function panicked
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("callback panicked: {message}")]
pub struct CallbackPanicked {
    pub message: String,
}
//
impl CallbackPanicked {
    /// Extract a human-readable message from a panic payload
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => "<non-string panic payload>".to_owned(),
            },
        };
        CallbackPanicked { message }
    }
}


/// One underlying cause of an operation failure
pub type Cause = Arc<dyn Error + Send + Sync + 'static>;


/// Failure of an asynchronous operation
///
/// An operation failure always carries at least one cause. It carries several
/// of them when it was produced by an aggregate operation, or when failures
/// were recorded more than once on the same operation.
///
#[derive(Clone, Debug)]
pub struct OpError {
    causes: Vec<Cause>,
}
//
impl OpError {
    /// Wrap a single error
    pub fn new<E: Error + Send + Sync + 'static>(error: E) -> Self {
        Self::from_cause(Arc::new(error))
    }

    /// Wrap an already shared error
    pub fn from_cause(cause: Cause) -> Self {
        OpError { causes: vec![cause] }
    }

    /// Failure of a canceled operation
    pub fn canceled() -> Self {
        Self::new(Canceled)
    }

    /// Combine several failures into one, keeping every cause
    pub fn aggregate<I>(errors: I) -> Result<Self, AsyncOpError>
        where I: IntoIterator<Item = OpError>
    {
        let mut errors = errors.into_iter();
        let mut combined = errors.next().ok_or(
            AsyncOpError::InvalidArgument("cannot aggregate an empty error list")
        )?;
        for error in errors {
            combined.merge(&error);
        }
        Ok(combined)
    }

    /// Underlying causes, in the order they were recorded
    pub fn causes(&self) -> &[Cause] {
        &self.causes
    }

    /// Truth that this failure has more than one cause
    pub fn is_aggregate(&self) -> bool {
        self.causes.len() > 1
    }

    /// Truth that every cause of this failure is a cancellation
    pub fn is_canceled(&self) -> bool {
        self.causes.iter().all(|cause| cause.downcast_ref::<Canceled>().is_some())
    }

    /// Find the first cause of a certain type
    pub fn find<E: Error + 'static>(&self) -> Option<&E> {
        self.causes.iter().find_map(|cause| cause.downcast_ref::<E>())
    }

    /// Add the causes of another failure which are not already known
    pub(crate) fn merge(&mut self, other: &OpError) {
        for cause in &other.causes {
            if !self.causes.iter().any(|known| Arc::ptr_eq(known, cause)) {
                self.causes.push(cause.clone());
            }
        }
    }

    /// Turn a caught panic into an operation failure
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(CallbackPanicked::from_payload(payload))
    }
}
//
impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.causes.as_slice() {
            [single] => write!(f, "{}", single),
            causes => {
                write!(f, "{} errors occurred", causes.len())?;
                for (index, cause) in causes.iter().enumerate() {
                    let separator = if index == 0 { ": " } else { "; " };
                    write!(f, "{}{}", separator, cause)?;
                }
                Ok(())
            }
        }
    }
}
//
impl Error for OpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.causes.first().map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}
//
impl From<AsyncOpError> for OpError {
    fn from(error: AsyncOpError) -> Self {
        OpError::new(error)
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskOnFire;

    /// Single-cause failures display like their cause
    #[test]
    fn single_cause() {
        let error = OpError::new(DiskOnFire);
        assert!(!error.is_aggregate());
        assert!(!error.is_canceled());
        assert_eq!(error.to_string(), "disk on fire");
        assert!(error.find::<DiskOnFire>().is_some());
        assert!(error.find::<Canceled>().is_none());
    }

    /// Aggregation keeps every cause exactly once
    #[test]
    fn aggregation() {
        let fire = OpError::new(DiskOnFire);
        let canceled = OpError::canceled();
        let combined = OpError::aggregate(
            vec![fire.clone(), canceled.clone(), fire.clone()]
        ).unwrap();
        assert!(combined.is_aggregate());
        assert_eq!(combined.causes().len(), 2);
        assert!(!combined.is_canceled());
        assert_eq!(combined.to_string(),
                   "2 errors occurred: disk on fire; operation was canceled");
    }

    /// Empty aggregates are rejected
    #[test]
    fn empty_aggregate() {
        match OpError::aggregate(Vec::new()) {
            Err(AsyncOpError::InvalidArgument(_)) => {},
            other => panic!("unexpected aggregation result {:?}", other),
        }
    }

    /// Only pure cancellations count as canceled
    #[test]
    fn cancellation() {
        let mut error = OpError::canceled();
        assert!(error.is_canceled());
        error.merge(&OpError::canceled());
        assert!(error.is_canceled());
        error.merge(&OpError::new(DiskOnFire));
        assert!(!error.is_canceled());
    }

    /// Panic payloads of both string flavors are decoded
    #[test]
    fn panic_payloads() {
        let owned = CallbackPanicked::from_payload(Box::new("boom".to_string()));
        assert_eq!(owned.message, "boom");
        let borrowed = CallbackPanicked::from_payload(Box::new("bang"));
        assert_eq!(borrowed.message, "bang");
        let other = CallbackPanicked::from_payload(Box::new(42));
        assert_eq!(other.message, "<non-string panic payload>");
    }

    /// API errors classify themselves
    #[test]
    fn invalid_state_family() {
        let invalid = AsyncOpError::InvalidState {
            status: AsyncOpStatus::Faulted,
            action: "set the result",
        };
        assert!(invalid.is_invalid_state());
        assert!(!AsyncOpError::Disposed.is_invalid_state());
        assert_eq!(invalid.to_string(),
                   "cannot set the result: operation is faulted");
    }
}
