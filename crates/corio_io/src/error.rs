// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use thiserror::Error;

/// Any I/O error that may arise from either the low-level readiness polling provided by the
/// `corio_io` crate or from higher-level transport types that use it.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An API contract was violated, e.g. wrapping an unsupported file descriptor kind as a
    /// pipe transport (spec §4.6: "Only pipes, sockets, and character devices are accepted").
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// The operation was canceled due to a signal indicating that it is no longer relevant.
    #[error("operation canceled")]
    Canceled,

    /// We are forwarding an error received from the standard library's I/O APIs.
    #[error(transparent)]
    StdIo(#[from] std::io::Error),

    /// We are forwarding an error of unknown type from an unspecified source.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A specialized `Result` for use with I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents the Corio I/O subsystem error as a standard I/O error.
/// This is often used when interoperating with other libraries that expect standard I/O errors.
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::StdIo(error) => error,
            _ => Self::other(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Error: Send, Sync);
    }

    #[test]
    fn inspect_stdio_error() {
        let e = Error::StdIo(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "hey what did you do",
        ));

        match e {
            Error::StdIo(e) => {
                assert_eq!(e.kind(), ErrorKind::AlreadyExists);
                assert_eq!(e.to_string(), "hey what did you do");
            }
            _ => panic!("unexpected error variant"),
        }
    }

    #[test]
    fn into_stdio_error() {
        let e = Error::ContractViolation("hey what did you do".to_string());

        let io_error: std::io::Error = e.into();
        assert_eq!(io_error.kind(), ErrorKind::Other);

        let e = Error::StdIo(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "hey what did you do",
        ));

        let io_error: std::io::Error = e.into();
        assert_eq!(io_error.kind(), ErrorKind::AlreadyExists);
    }
}
