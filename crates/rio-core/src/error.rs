//! Hand-rolled error types for the primitives in this crate.
//!
//! No `thiserror`/`anyhow` here, matching the rest of the workspace: each
//! error is a plain enum with a manual `Display`/`Error` impl so the crate
//! has no proc-macro dependency at its lowest layer.

use core::fmt;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// A channel's sender half has been dropped; no further values will arrive.
    ChannelClosed,
    /// `try_send` found the channel full.
    ChannelFull,
    /// `try_recv` found the channel empty.
    ChannelEmpty,
    /// A cooperative `StopToken` observed a cancellation request.
    Cancelled,
    /// A `Semaphore::release` would have pushed the counter past its configured max.
    SemaphoreOverflow,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::ChannelClosed => write!(f, "channel closed"),
            CoreError::ChannelFull => write!(f, "channel full"),
            CoreError::ChannelEmpty => write!(f, "channel empty"),
            CoreError::Cancelled => write!(f, "operation cancelled"),
            CoreError::SemaphoreOverflow => write!(f, "semaphore release would overflow"),
        }
    }
}

impl std::error::Error for CoreError {}

/// Error returned by a fallible, non-blocking send: carries the value back
/// to the caller so it isn't silently dropped.
pub enum TrySendError<T> {
    Full(T),
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(v) | TrySendError::Closed(v) => v,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "TrySendError::Full(..)"),
            TrySendError::Closed(_) => write!(f, "TrySendError::Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "channel full"),
            TrySendError::Closed(_) => write!(f, "channel closed"),
        }
    }
}

impl<T> std::error::Error for TrySendError<T> {}

/// Error returned by a fallible, non-blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "channel empty"),
            TryRecvError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for TryRecvError {}
