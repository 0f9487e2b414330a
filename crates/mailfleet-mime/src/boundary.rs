//! Multipart boundary markers.

use crate::encoding::encode_base64;
use rand::RngCore;

/// Random bytes drawn per marker.
const ENTROPY_BYTES: usize = 30;

/// Draws a fresh boundary token from the thread-local CSPRNG.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("_{}_", encode_base64(&bytes))
}

/// Boundary of one multipart container, allocated on first use.
///
/// A marker lives inside a single render; rendering again starts from
/// unallocated markers and draws new tokens.
#[derive(Debug, Default)]
pub struct Boundary {
    token: Option<String>,
}

impl Boundary {
    /// Creates an unallocated marker.
    #[must_use]
    pub const fn new() -> Self {
        Self { token: None }
    }

    /// Returns true once a token has been drawn.
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.token.is_some()
    }

    /// Returns the token, drawing it on first call.
    pub fn token(&mut self) -> &str {
        self.token.get_or_insert_with(generate_token)
    }

    /// Delimiter opening the first child: `--token\r\n`.
    pub fn open(&mut self) -> String {
        format!("--{}\r\n", self.token())
    }

    /// Delimiter between siblings. The leading CRLF belongs to the
    /// delimiter, so the preceding part needs no trailing line break.
    pub fn delimiter(&mut self) -> String {
        format!("\r\n--{}\r\n", self.token())
    }

    /// Closing delimiter after the last child: `--token--\r\n` on its own line.
    pub fn close(&mut self) -> String {
        format!("\r\n--{}--\r\n", self.token())
    }

    /// Opening delimiter for the first child, separator for the rest.
    pub fn before_part(&mut self, index: usize) -> String {
        if index == 0 {
            self.open()
        } else {
            self.delimiter()
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
    use std::collections::HashSet;

    #[test]
    fn test_lazy_allocation() {
        let mut boundary = Boundary::new();
        assert!(!boundary.is_allocated());
        let token = boundary.token().to_string();
        assert!(boundary.is_allocated());
        assert_eq!(boundary.token(), token);
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        // 30 bytes encode to 40 base64 characters without padding
        assert_eq!(token.len(), 42);
        assert!(token.starts_with('_') && token.ends_with('_'));
        assert!(!token.contains('='));
    }

    #[test]
    fn test_renderings() {
        let mut boundary = Boundary::new();
        let token = boundary.token().to_string();
        assert_eq!(boundary.open(), format!("--{token}\r\n"));
        assert_eq!(boundary.delimiter(), format!("\r\n--{token}\r\n"));
        assert_eq!(boundary.close(), format!("\r\n--{token}--\r\n"));
        assert_eq!(boundary.before_part(0), boundary.open());
        assert_eq!(boundary.before_part(2), boundary.delimiter());
    }

    #[test]
    fn test_tokens_are_fresh() {
        let tokens: HashSet<String> = (0..256).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 256);
    }
}
