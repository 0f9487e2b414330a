//! Caller-supplied MIME headers.

use std::fmt;
use std::io::{self, Write};

/// Ordered, case-insensitive collection of multi-valued headers.
///
/// Names keep first-insertion order. A header with several values is
/// rendered once, its values folded onto continuation lines.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = canonical_name(&name.into());
        let value = sanitize(&value.into());
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Returns true if no header is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes every header as CRLF-terminated lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer fails.
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "{self}")
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, values) in &self.entries {
            write!(f, "{name}: {}\r\n", values.join(";\r\n\t "))?;
        }
        Ok(())
    }
}

/// Capitalizes a header name (e.g., "content-type" -> "Content-Type").
fn canonical_name(name: &str) -> String {
    name.trim()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Line breaks inside a value would start a new header.
fn sanitize(value: &str) -> String {
    value.replace(['\r', '\n'], " ").trim().to_string()
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
    fn test_add_canonicalizes_name() {
        let mut headers = Headers::new();
        assert!(headers.is_empty());
        headers.add(" x-campaign ", " spring ");
        assert_eq!(headers.to_string(), "X-Campaign: spring\r\n");
        assert!(!headers.is_empty());
    }

    #[test]
    fn test_multiple_values_fold() {
        let mut headers = Headers::new();
        headers.add("List-Unsubscribe", "<mailto:u@x.tld>");
        headers.add("list-unsubscribe", "<https://x.tld/u>");

        assert_eq!(
            headers.to_string(),
            "List-Unsubscribe: <mailto:u@x.tld>;\r\n\t <https://x.tld/u>\r\n"
        );
    }

    #[test]
    fn test_insertion_order_kept() {
        let mut headers = Headers::new();
        headers.add("x-b", "2");
        headers.add("x-a", "1");
        assert_eq!(headers.to_string(), "X-B: 2\r\nX-A: 1\r\n");
    }

    #[test]
    fn test_values_cannot_inject_lines() {
        let mut headers = Headers::new();
        headers.add("x-note", "a\r\nBcc: evil@x.tld");
        assert_eq!(headers.to_string(), "X-Note: a  Bcc: evil@x.tld\r\n");
    }
}
