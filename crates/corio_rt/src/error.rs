// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use thiserror::Error;

/// A specialized `Result` type for Corio Runtime operations
/// that return a Corio Runtime [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the Corio Runtime.
///
/// This is an umbrella type for all kinds of errors that can be returned by the Corio Runtime,
/// including programming errors (e.g. invalid arguments), cooperative cancellation, and errors
/// from the environment (e.g. file not found, connection lost).
///
/// Specific enum variants may provide additional detail to help react to specific conditions.
/// Future versions may add additional enum variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller of some API made a mistake (e.g. supplied invalid arguments or called an
    /// operation out of sequence).
    #[error("{0}")]
    Programming(String),

    /// The future or task was cancelled, either explicitly or by a timeout scope that has not
    /// yet rewritten the cancellation to [`Error::TimedOut`].
    ///
    /// This is a normal, expected outcome and is never logged at future destruction.
    #[error("operation was cancelled{}", .0.as_ref().map_or_else(String::new, |reason| format!(": {reason}")))]
    Cancelled(Option<String>),

    /// A [`TimeoutScope`][crate::TimeoutScope] expired before its body completed.
    ///
    /// This never propagates beyond the scope boundary as a raw [`Error::Cancelled`].
    #[error("operation timed out")]
    TimedOut,

    /// An operation that requires a future or task to still be pending was attempted on one that
    /// has already completed (e.g. calling `set_result` twice).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A task's coroutine step yielded a value the task driver does not understand. The
    /// cooperative await contract (spec §4.4) was broken.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// We are re-packaging an error from the Rust standard library I/O logic
    /// without adding further details in the Corio Runtime layer.
    #[error(transparent)]
    StdIo(#[from] std::io::Error),

    /// We are re-packaging an error we obtained from some downstream mechanism
    /// without adding further details in the Corio Runtime layer.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Returns whether this error represents cooperative cancellation (as opposed to a timeout,
    /// which is a distinct outcome once it has crossed a [`TimeoutScope`][crate::TimeoutScope]
    /// boundary).
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns whether this error represents a timeout.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}
