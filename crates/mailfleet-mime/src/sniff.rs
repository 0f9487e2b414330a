//! Content-type detection for file-backed parts.

use crate::content_type::ContentType;
use std::io::{self, Read};

/// Number of leading bytes inspected.
pub const SNIFF_LEN: usize = 512;

/// Signatures checked against the start of the content.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"ID3", "audio/mpeg"),
    (b"OggS\x00", "application/ogg"),
    (b"\x1a\x45\xdf\xa3", "video/webm"),
    (b"%!PS-Adobe-", "application/postscript"),
];

/// Reads up to [`SNIFF_LEN`] bytes from `reader`.
///
/// # Errors
///
/// Returns an error if the read fails.
pub fn read_head<R: Read>(reader: R) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    reader.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Detects a content type from leading bytes, falling back to the file name.
///
/// Order: binary signatures, markup prefixes, extension lookup, a UTF-8 text
/// check, then `application/octet-stream`.
#[must_use]
pub fn sniff(head: &[u8], file_name: &str) -> ContentType {
    if let Some(essence) = magic(head) {
        if let Some(ct) = ContentType::from_essence(essence) {
            return ct;
        }
    }

    if let Some(markup) = markup(head) {
        return markup;
    }

    if let Some(guess) = mime_guess::from_path(file_name).first() {
        if let Some(ct) = ContentType::from_essence(guess.essence_str()) {
            return if ct.main_type == "text" {
                ct.with_parameter("charset", "utf-8")
            } else {
                ct
            };
        }
    }

    if looks_like_text(head) {
        return ContentType::text_plain();
    }

    ContentType::octet_stream()
}

fn magic(head: &[u8]) -> Option<&'static str> {
    if let Some(&(_, essence)) = SIGNATURES.iter().find(|(sig, _)| head.starts_with(sig)) {
        return Some(essence);
    }

    // RIFF containers and ISO media carry their brand a few bytes in
    if head.len() >= 12 && head.starts_with(b"RIFF") {
        return match &head[8..12] {
            b"WEBP" => Some("image/webp"),
            b"WAVE" => Some("audio/wave"),
            b"AVI " => Some("video/avi"),
            _ => None,
        };
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return Some("video/mp4");
    }
    None
}

fn markup(head: &[u8]) -> Option<ContentType> {
    let start = head.iter().position(|b| !b.is_ascii_whitespace())?;
    let rest = &head[start..];
    let prefix = |tag: &[u8]| {
        rest.len() >= tag.len() && rest[..tag.len()].eq_ignore_ascii_case(tag)
    };

    if prefix(b"<!doctype html") || prefix(b"<html") {
        return Some(ContentType::text_html());
    }
    if prefix(b"<?xml") {
        return Some(ContentType::new("text", "xml").with_parameter("charset", "utf-8"));
    }
    None
}

fn looks_like_text(head: &[u8]) -> bool {
    let valid = match std::str::from_utf8(head) {
        Ok(_) => true,
        // a multi-byte sequence cut at the sniff window is still text
        Err(e) => e.error_len().is_none(),
    };
    valid
        && !head
            .iter()
            .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b))
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
    use std::io::Cursor;

    #[test]
    fn test_png_signature_wins_over_name() {
        let head = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";
        assert_eq!(sniff(head, "logo.txt").essence(), "image/png");
    }

    #[test]
    fn test_pdf() {
        assert_eq!(sniff(b"%PDF-1.7\n", "doc").essence(), "application/pdf");
    }

    #[test]
    fn test_webp_riff() {
        let head = b"RIFF\x24\x00\x00\x00WEBPVP8 ";
        assert_eq!(sniff(head, "x").essence(), "image/webp");
    }

    #[test]
    fn test_html_markup() {
        let ct = sniff(b"  <!DOCTYPE html><html></html>", "page");
        assert_eq!(ct.to_string(), "text/html; charset=utf-8");
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(sniff(b"a,b,c\n1,2,3\n", "report.csv").essence(), "text/csv");
    }

    #[test]
    fn test_plain_text() {
        let ct = sniff("héllo world\n".as_bytes(), "notes");
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_truncated_utf8_is_text() {
        let mut head = "é".repeat(255).into_bytes();
        head.push(0xc3);
        assert!(looks_like_text(&head));
    }

    #[test]
    fn test_binary_fallback() {
        let ct = sniff(&[0x00, 0x01, 0x02, 0xfe], "blob");
        assert_eq!(ct.essence(), "application/octet-stream");
    }

    #[test]
    fn test_read_head_limit() {
        let data = vec![b'a'; 2000];
        let head = read_head(Cursor::new(&data)).unwrap();
        assert_eq!(head.len(), SNIFF_LEN);

        let head = read_head(Cursor::new(b"short")).unwrap();
        assert_eq!(head, b"short");
    }
}
