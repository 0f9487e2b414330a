//! Error types for message assembly.

use std::io;

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error while rendering or reading a file-backed part.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address header value matched none of the accepted shapes.
    #[error("Invalid email address: {0:?}")]
    InvalidAddress(String),

    /// A header required to build the message was never set.
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    /// Raw header line that is not `Name: value`.
    #[error("Invalid header line: {0:?}")]
    InvalidHeader(String),

    /// DKIM key material or signing failure.
    #[error("DKIM error: {0}")]
    Dkim(String),

    /// Signing strategy name not recognised.
    #[error("Unknown DKIM signing strategy: {0}")]
    UnknownSignStrategy(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl Error {
    /// Returns true for errors caused by the message description itself
    /// rather than by the sink or a file read.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress(_)
                | Self::MissingHeader(_)
                | Self::InvalidHeader(_)
                | Self::Dkim(_)
                | Self::UnknownSignStrategy(_)
        )
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => Self::other(other),
        }
    }
}
