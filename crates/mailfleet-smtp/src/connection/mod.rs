//! SMTP connection management with type-state pattern.

mod client;
mod dot;
pub mod socks;
mod stream;

pub use client::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, SmtpConnection,
};
pub use dot::DotStuffer;
pub use socks::ProxyUrl;
pub use stream::{DEFAULT_TIMEOUT, SmtpStream, Transport, connect};

use crate::types::{AuthMechanism, Extension};
use std::collections::HashSet;

/// Server capabilities from EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Checks if an AUTH mechanism is advertised.
    #[must_use]
    pub fn supports_auth(&self, mechanism: AuthMechanism) -> bool {
        self.extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Auth(mechs) if mechs.contains(&mechanism)))
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
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

    fn info(lines: &[&str]) -> ServerInfo {
        ServerInfo {
            hostname: "mx.y.tld".to_string(),
            extensions: lines.iter().map(|l| Extension::parse(l)).collect(),
        }
    }

    #[test]
    fn test_capabilities() {
        let info = info(&["STARTTLS", "AUTH LOGIN PLAIN", "SIZE 1024"]);
        assert!(info.supports_starttls());
        assert!(info.supports_auth(AuthMechanism::Plain));
        assert_eq!(info.max_message_size(), Some(1024));
    }

    #[test]
    fn test_no_capabilities() {
        let info = info(&[]);
        assert!(!info.supports_starttls());
        assert!(!info.supports_auth(AuthMechanism::Plain));
        assert_eq!(info.max_message_size(), None);
    }
}
