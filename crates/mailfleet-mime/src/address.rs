//! Mailbox address parsing.

use crate::encoding::{encode_rfc2047_words, is_header_safe};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Characters that force a display name into a quoted string.
const SPECIALS: &[char] = &['(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '.', '"'];

/// A parsed mailbox: optional display name plus a lowercased address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Display name, empty when absent.
    pub name: String,
    /// Local part, lowercased.
    pub local: String,
    /// Domain part, lowercased without a trailing dot.
    pub domain: String,
}

impl Address {
    /// Parses a free-form header value.
    ///
    /// Accepted shapes are `Name <user@domain.tld>`, `<user@domain.tld>` and
    /// bare `user@domain.tld`. The last domain label must be 2 to 8
    /// characters long.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the value matches none of them.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(input.to_string());
        let trimmed = input.trim();

        let (name, spec) = match trimmed.strip_suffix('>') {
            Some(head) => {
                let open = head.rfind('<').ok_or_else(invalid)?;
                (unquote(head[..open].trim()), &head[open + 1..])
            }
            None => (String::new(), trimmed),
        };

        let (local, domain) = spec.trim().rsplit_once('@').ok_or_else(invalid)?;
        let local = local.trim();
        let domain = domain.trim().trim_end_matches('.');

        if !valid_local(local) || !valid_domain(domain) {
            return Err(invalid());
        }

        Ok(Self {
            name,
            local: local.to_lowercase(),
            domain: domain.to_lowercase(),
        })
    }

    /// Returns `local@domain`.
    #[must_use]
    pub fn email(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    /// Returns the domain used for MX resolution.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Renders the header form: `Name <local@domain>` or `<local@domain>`.
    ///
    /// Non-ASCII names become RFC 2047 words; names with specials are quoted.
    #[must_use]
    pub fn to_header(&self) -> String {
        if self.name.is_empty() {
            return format!("<{}>", self.email());
        }
        let name = if !is_header_safe(&self.name) {
            encode_rfc2047_words(&self.name).join(" ")
        } else if self.name.contains(SPECIALS) {
            format!("\"{}\"", self.name.replace('\\', "\\\\").replace('"', "\\\""))
        } else {
            self.name.clone()
        };
        format!("{name} <{}>", self.email())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header())
    }
}

fn unquote(name: &str) -> String {
    name.strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .map_or_else(|| name.to_string(), |n| n.replace("\\\"", "\"").replace("\\\\", "\\"))
}

fn valid_local(local: &str) -> bool {
    !local.is_empty()
        && !local
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '@' | '[' | ']'))
}

fn valid_domain(domain: &str) -> bool {
    if domain.is_empty()
        || domain
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '@' | '[' | ']'))
    {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && (2..=8).contains(&tld.chars().count())
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

    mod parse_tests {
        use super::*;

        #[test]
        fn name_and_angle_address() {
            let addr = Address::parse("My Name <user@sub.Domain.TLD.>").unwrap();
            assert_eq!(addr.name, "My Name");
            assert_eq!(addr.local, "user");
            assert_eq!(addr.domain, "sub.domain.tld");
        }

        #[test]
        fn surrounding_whitespace() {
            let addr = Address::parse(" My name   <  my+email@domain.tld  > ").unwrap();
            assert_eq!(addr.name, "My name");
            assert_eq!(addr.email(), "my+email@domain.tld");
        }

        #[test]
        fn angle_address_only() {
            let addr = Address::parse("  < My+Email@doMain.tld  >  ").unwrap();
            assert_eq!(addr.name, "");
            assert_eq!(addr.local, "my+email");
            assert_eq!(addr.domain, "domain.tld");
        }

        #[test]
        fn bare_address() {
            let addr = Address::parse("User@Example.COM").unwrap();
            assert_eq!(addr.name, "");
            assert_eq!(addr.email(), "user@example.com");
            assert_eq!(addr.domain(), "example.com");
        }

        #[test]
        fn quoted_display_name() {
            let addr = Address::parse("\"Doe, John\" <john@example.com>").unwrap();
            assert_eq!(addr.name, "Doe, John");
        }

        #[test]
        fn single_char_tld_rejected() {
            assert!(matches!(
                Address::parse("user@domain.t"),
                Err(Error::InvalidAddress(_))
            ));
        }

        #[test]
        fn missing_at_rejected() {
            assert!(Address::parse("<user[at]domain.tld>").is_err());
        }

        #[test]
        fn long_tld_rejected() {
            assert!(Address::parse("user@domain.abcdefghi").is_err());
        }

        #[test]
        fn other_malformed_inputs() {
            for input in ["", "   ", "@domain.tld", "user@", "user@tld", "a b@domain.tld", "Name <user@domain.tld"] {
                assert!(Address::parse(input).is_err(), "accepted {input:?}");
            }
        }

        #[test]
        fn from_str() {
            let addr: Address = "bob@y.tld".parse().unwrap();
            assert_eq!(addr.email(), "bob@y.tld");
        }
    }

    mod header_tests {
        use super::*;

        #[test]
        fn plain_name() {
            let addr = Address::parse("Alice <a@x.tld>").unwrap();
            assert_eq!(addr.to_header(), "Alice <a@x.tld>");
        }

        #[test]
        fn no_name() {
            let addr = Address::parse("a@x.tld").unwrap();
            assert_eq!(addr.to_string(), "<a@x.tld>");
        }

        #[test]
        fn specials_are_quoted() {
            let addr = Address::parse("\"Doe, John\" <john@example.com>").unwrap();
            assert_eq!(addr.to_header(), "\"Doe, John\" <john@example.com>");
        }

        #[test]
        fn non_ascii_name_encoded() {
            let addr = Address::parse("Zoë <zoe@example.com>").unwrap();
            assert_eq!(addr.to_header(), "=?utf-8?B?Wm/Dqw==?= <zoe@example.com>");
        }
    }
}
