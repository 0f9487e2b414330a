//! MIME content type handling.

use std::fmt;

/// MIME content type with ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters in emission order (e.g., charset=utf-8, boundary=xxx).
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: Vec::new(),
        }
    }

    /// Creates a text/plain content type.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "utf-8")
    }

    /// Creates a text/html content type.
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "utf-8")
    }

    /// Creates a text/x-amp-html content type.
    #[must_use]
    pub fn text_amp_html() -> Self {
        Self::new("text", "x-amp-html").with_parameter("charset", "utf-8")
    }

    /// Creates a `multipart/<sub_type>` content type with boundary.
    #[must_use]
    pub fn multipart(sub_type: impl Into<String>, boundary: impl Into<String>) -> Self {
        Self::new("multipart", sub_type).with_parameter("boundary", boundary)
    }

    /// Creates `application/octet-stream`.
    #[must_use]
    pub fn octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }

    /// Parses a bare `type/subtype` essence, ignoring any parameters.
    #[must_use]
    pub fn from_essence(essence: &str) -> Option<Self> {
        let essence = essence.split(';').next()?.trim();
        let (main, sub) = essence.split_once('/')?;
        if main.is_empty() || sub.is_empty() {
            return None;
        }
        Some(Self::new(main.to_lowercase(), sub.to_lowercase()))
    }

    /// Adds a parameter, replacing an existing one with the same name.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self
            .parameters
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            slot.1 = value;
        } else {
            self.parameters.push((key, value));
        }
        self
    }

    /// Returns `type/subtype`.
    #[must_use]
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)?;

        for (key, value) in &self.parameters {
            // Quote if contains special characters
            if value.is_empty()
                || value.contains(|c: char| {
                    c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)
                })
            {
                write!(f, "; {key}=\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
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
    fn test_text_plain() {
        let ct = ContentType::text_plain();
        assert_eq!(ct.essence(), "text/plain");
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_amp_html() {
        assert_eq!(
            ContentType::text_amp_html().to_string(),
            "text/x-amp-html; charset=utf-8"
        );
    }

    #[test]
    fn test_multipart_boundary_quoted() {
        let ct = ContentType::multipart("mixed", "_ab/cd+ef_");
        assert_eq!(ct.essence(), "multipart/mixed");
        assert_eq!(ct.to_string(), "multipart/mixed; boundary=\"_ab/cd+ef_\"");
    }

    #[test]
    fn test_parameters_keep_order() {
        let ct = ContentType::new("image", "png")
            .with_parameter("name", "logo.png")
            .with_parameter("x-extra", "1");
        assert_eq!(ct.to_string(), "image/png; name=logo.png; x-extra=1");
    }

    #[test]
    fn test_parameter_replaced() {
        let ct = ContentType::text_plain().with_parameter("Charset", "us-ascii");
        assert_eq!(ct.parameters.len(), 1);
        assert_eq!(ct.to_string(), "text/plain; charset=us-ascii");
    }

    #[test]
    fn test_quoted_value_escapes() {
        let ct = ContentType::octet_stream().with_parameter("name", "a \"b\".bin");
        assert_eq!(
            ct.to_string(),
            "application/octet-stream; name=\"a \\\"b\\\".bin\""
        );
    }

    #[test]
    fn test_from_essence() {
        let ct = ContentType::from_essence("Image/PNG; q=1").unwrap();
        assert_eq!(ct.essence(), "image/png");
        assert!(ct.parameters.is_empty());
        assert!(ContentType::from_essence("nonsense").is_none());
    }
}
