//! Envelope address type.

use crate::error::{Error, Result};

/// Mailbox used in `MAIL FROM` and `RCPT TO` paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new envelope address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address has no single `@` separating two
    /// non-empty parts, or contains characters that would break the path.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part after `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    fn validate(addr: &str) -> Result<()> {
        let invalid = |why: &str| Err(Error::InvalidAddress(format!("{addr:?}: {why}")));

        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>'))
        {
            return invalid("contains whitespace, control characters or angle brackets");
        }

        match addr.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                if domain.contains('@') {
                    invalid("more than one @")
                } else {
                    Ok(())
                }
            }
            Some(_) => invalid("empty local part or domain"),
            None => invalid("missing @"),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
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
    fn test_valid_address() {
        let addr = Address::new("a@x.tld").unwrap();
        assert_eq!(addr.as_str(), "a@x.tld");
        assert_eq!(addr.domain(), "x.tld");
        assert_eq!(addr.to_string(), "a@x.tld");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "ax.tld", "@x.tld", "a@", "a@b@x.tld", "a b@x.tld", "a@x.tld>", "a@x.tld\r\nRSET"] {
            assert!(
                matches!(Address::new(bad), Err(Error::InvalidAddress(_))),
                "{bad:?} accepted"
            );
        }
    }
}
