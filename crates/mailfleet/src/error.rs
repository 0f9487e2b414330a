//! Error types for delivery.

use std::net::IpAddr;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Delivery error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Route configuration rejected before any network activity.
    #[error("Invalid route configuration: {0}")]
    Config(String),

    /// Message description rejected while building.
    #[error(transparent)]
    Message(#[from] mailfleet_mime::Error),

    /// MX lookup failed or yielded no usable host.
    #[error("421 {0}")]
    Resolution(String),

    /// No HELO name configured and the reverse lookup found none.
    #[error("No HELO name: reverse lookup of {0} returned nothing")]
    NoHeloName(IpAddr),

    /// Dial or SMTP session failure, carrying the peer's reply verbatim.
    #[error(transparent)]
    Smtp(#[from] mailfleet_smtp::Error),

    /// Rendering the message into the DATA stream failed.
    #[error("Render failed: {0}")]
    Render(mailfleet_mime::Error),

    /// `send` called before `start`.
    #[error("Delivery pipeline not started")]
    PipelineNotStarted,

    /// `send` called after `stop`.
    #[error("421 delivery pipeline stopped")]
    PipelineStopped,
}

impl Error {
    /// Returns true if submitting the same message again may succeed.
    ///
    /// Resolution failures and a stopped pipeline are transient; SMTP errors
    /// follow the peer's reply code; configuration and render errors are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Resolution(_) | Self::NoHeloName(_) | Self::PipelineStopped => true,
            Self::Smtp(err) => err.is_transient(),
            Self::Config(_) | Self::Message(_) | Self::Render(_) | Self::PipelineNotStarted => {
                false
            }
        }
    }

    /// Returns the SMTP reply code, if the peer sent one.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Smtp(err) => err.code(),
            _ => None,
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
    fn test_display_prefixes() {
        assert_eq!(
            Error::Resolution("no MX for y.tld".into()).to_string(),
            "421 no MX for y.tld"
        );
        assert_eq!(
            Error::PipelineStopped.to_string(),
            "421 delivery pipeline stopped"
        );
    }

    #[test]
    fn test_smtp_error_verbatim() {
        let err = Error::from(mailfleet_smtp::Error::smtp_error(550, "5.1.1 no such user"));
        assert_eq!(err.to_string(), "550 5.1.1 no such user");
        assert_eq!(err.code(), Some(550));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classification() {
        assert!(Error::Resolution("x".into()).is_transient());
        assert!(Error::PipelineStopped.is_transient());
        assert!(Error::from(mailfleet_smtp::Error::smtp_error(451, "later")).is_transient());
        assert!(Error::from(mailfleet_smtp::Error::ConnectionClosed).is_transient());
        assert!(!Error::Config("stream must be positive".into()).is_transient());
        assert!(!Error::PipelineNotStarted.is_transient());
        assert!(!Error::Render(mailfleet_mime::Error::MissingHeader("From")).is_transient());
    }
}
