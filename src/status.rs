//! Facilities to represent the status of asynchronous operations
//!
//! The model is the following: any asynchronous operation is a state machine
//! which starts in the Created state, is hopefully picked up by a producer and
//! moves to the Running state in this process, and finally ends up in one of
//! three final states: RanToCompletion, Faulted or Canceled.

use std::fmt;


/// Representation of an asynchronous operation's status
///
/// Here are the possible state transitions:
///
/// - Created -> Running / RanToCompletion / Faulted / Canceled
/// - Running -> RanToCompletion / Faulted / Canceled
///
/// Once the asynchronous operation is in either of the RanToCompletion,
/// Faulted or Canceled state, its status won't change anymore.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AsyncOpStatus {
    /// The operation has been created, but no producer has picked it up yet
    Created,

    /// The producer is working on the operation
    Running,

    /// The producer has successfully completed the operation
    RanToCompletion,

    /// The producer has failed to complete the operation
    Faulted,

    /// The operation was canceled before the producer was done
    Canceled,
}
//
impl AsyncOpStatus {
    /// Check if this status is final (i.e. won't change anymore)
    pub fn is_final(self) -> bool {
        is_final(self)
    }

    /// Check if the state machine allows moving from this status to `next`
    pub fn can_transition_to(self, next: AsyncOpStatus) -> bool {
        use self::AsyncOpStatus::*;
        match (self, next) {
            (Created, Running) => true,
            (Created, _) | (Running, _) => next.is_final(),
            (RanToCompletion, _) | (Faulted, _) | (Canceled, _) => false,
        }
    }
}
//
impl fmt::Display for AsyncOpStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            AsyncOpStatus::Created => "created",
            AsyncOpStatus::Running => "running",
            AsyncOpStatus::RanToCompletion => "completed",
            AsyncOpStatus::Faulted => "faulted",
            AsyncOpStatus::Canceled => "canceled",
        };
        f.write_str(name)
    }
}


/// Check if an operation status is final (i.e. won't change anymore)
pub fn is_final(s: AsyncOpStatus) -> bool {
    use self::AsyncOpStatus::*;
    match s {
        Created | Running => false,
        RanToCompletion | Faulted | Canceled => true,
    }
}
