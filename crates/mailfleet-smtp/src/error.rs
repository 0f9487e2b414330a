//! Error types for SMTP operations.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host name not usable as a TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(String),

    /// Server rejected a command. Displays the peer's reply verbatim.
    #[error("{code} {message}")]
    Smtp {
        /// Reply code (e.g., 550).
        code: u16,
        /// Reply text from the server.
        message: String,
    },

    /// Reply did not fit the command just sent.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Malformed reply line.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid envelope address.
    #[error("Invalid envelope address: {0}")]
    InvalidAddress(String),

    /// STARTTLS requested but not advertised.
    #[error("Server does not support STARTTLS")]
    StartTlsNotSupported,

    /// AUTH requested but the mechanism is not advertised.
    #[error("Server does not support AUTH {0}")]
    AuthNotSupported(&'static str),

    /// A connect, read or write exceeded its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    /// SOCKS5 proxy negotiation failed.
    #[error("SOCKS5 proxy error: {0}")]
    Socks(String),

    /// Peer closed the connection mid-reply.
    #[error("Connection closed by server")]
    ConnectionClosed,
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::Smtp {
            code,
            message: message.into(),
        }
    }

    /// Returns the server reply code, if this error carries one.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Smtp { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Smtp { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if a later attempt may succeed: 4xx replies and
    /// network-level failures.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Smtp { code, .. } => *code >= 400 && *code < 500,
            Self::Io(_) | Self::Timeout(_) | Self::ConnectionClosed | Self::Socks(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_error_display_is_verbatim() {
        let err = Error::smtp_error(550, "5.1.1 no such user");
        assert_eq!(err.to_string(), "550 5.1.1 no such user");
        assert_eq!(err.code(), Some(550));
    }

    #[test]
    fn test_classification() {
        assert!(Error::smtp_error(554, "rejected").is_permanent());
        assert!(!Error::smtp_error(554, "rejected").is_transient());
        assert!(Error::smtp_error(451, "try later").is_transient());
        assert!(Error::Timeout("read").is_transient());
        assert!(Error::ConnectionClosed.is_transient());
        assert!(!Error::InvalidDnsName("bad name".into()).is_transient());
        assert_eq!(Error::Timeout("read").code(), None);
    }
}
