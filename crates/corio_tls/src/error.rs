// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use thiserror::Error;

/// Errors arising from the SSL wrapper transport (spec §4.6 "SSL wrapper"; spec §7 "TLS
/// errors").
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The TLS handshake or a later record failed to process.
    #[error("tls error: {0}")]
    Tls(#[from] futures_rustls::rustls::Error),

    /// The inner transport reported an I/O error while carrying TLS records.
    #[error(transparent)]
    StdIo(#[from] std::io::Error),

    /// The inner transport closed (cleanly or not) before the handshake finished.
    #[error("inner transport closed before the handshake completed")]
    HandshakeAborted,

    /// A write or close was attempted on an already-closed or closing transport.
    #[error("contract violation: {0}")]
    ContractViolation(String),
}

/// A specialized `Result` for use with TLS operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for corio_io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::StdIo(error) => Self::StdIo(error),
            other => Self::StdIo(std::io::Error::other(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Error: Send, Sync);
    }
}
