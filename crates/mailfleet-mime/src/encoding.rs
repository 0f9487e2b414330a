//! MIME encoding utilities.
//!
//! Base64 helpers, a streaming Quoted-Printable writer and RFC 2047
//! encoded-word generation for header values.

use crate::error::Result;
use crate::wrap::LineWrap;
use base64::Engine;
use base64::engine::general_purpose::{GeneralPurpose, STANDARD};
use base64::write::EncoderWriter;
use std::io::{self, Write};

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data, ignoring line breaks and other whitespace.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Wraps `sink` in a streaming Base64 encoder whose output is broken into
/// 76-column CRLF-terminated lines.
///
/// Call [`EncoderWriter::finish`] to flush the final partial group.
pub fn base64_writer<W: Write>(sink: W) -> EncoderWriter<'static, GeneralPurpose, LineWrap<W>> {
    EncoderWriter::new(LineWrap::new(sink), &STANDARD)
}

/// Maximum line length for Quoted-Printable encoding.
const MAX_LINE_LENGTH: usize = 76;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

const fn hex_escape(byte: u8) -> [u8; 3] {
    [b'=', HEX[(byte >> 4) as usize], HEX[(byte & 0x0f) as usize]]
}

/// Streaming Quoted-Printable encoder (RFC 2045 section 6.7).
///
/// CRLF (or a bare LF) in the input becomes a hard line break, long lines
/// get `=` soft breaks so no output line exceeds 76 columns, and whitespace
/// at the end of a line is escaped. Call [`finish`](Self::finish) once the
/// content is written; dropping the writer loses the last partial line.
#[derive(Debug)]
pub struct QuotedPrintableWriter<W: Write> {
    inner: W,
    line: Vec<u8>,
    pending_cr: bool,
}

impl<W: Write> QuotedPrintableWriter<W> {
    /// Creates an encoder writing into `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            line: Vec::with_capacity(MAX_LINE_LENGTH + 2),
            pending_cr: false,
        }
    }

    /// Writes out the buffered line and returns the inner writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the inner writer fails.
    pub fn finish(mut self) -> io::Result<W> {
        if self.pending_cr {
            self.pending_cr = false;
            self.push_token(&hex_escape(b'\r'))?;
        }
        self.escape_trailing_space()?;
        self.inner.write_all(&self.line)?;
        self.line.clear();
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn push_token(&mut self, token: &[u8]) -> io::Result<()> {
        // keep one column free for the soft-break '='
        if self.line.len() + token.len() > MAX_LINE_LENGTH - 1 {
            self.line.extend_from_slice(b"=\r\n");
            self.inner.write_all(&self.line)?;
            self.line.clear();
        }
        self.line.extend_from_slice(token);
        Ok(())
    }

    fn push_byte(&mut self, byte: u8) -> io::Result<()> {
        match byte {
            b'!'..=b'<' | b'>'..=b'~' | b' ' | b'\t' => self.push_token(&[byte]),
            _ => self.push_token(&hex_escape(byte)),
        }
    }

    fn escape_trailing_space(&mut self) -> io::Result<()> {
        if let Some(&last @ (b' ' | b'\t')) = self.line.last() {
            self.line.pop();
            self.push_token(&hex_escape(last))?;
        }
        Ok(())
    }

    fn hard_break(&mut self) -> io::Result<()> {
        self.escape_trailing_space()?;
        self.line.extend_from_slice(b"\r\n");
        self.inner.write_all(&self.line)?;
        self.line.clear();
        Ok(())
    }
}

impl<W: Write> Write for QuotedPrintableWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    self.hard_break()?;
                    continue;
                }
                self.push_token(&hex_escape(b'\r'))?;
            }
            match byte {
                b'\r' => self.pending_cr = true,
                b'\n' => self.hard_break()?,
                _ => self.push_byte(byte)?,
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Longest run of raw bytes that fits one 75-column `=?utf-8?B?...?=` word.
const WORD_CHUNK: usize = 45;

/// Returns true if `text` can go into a header verbatim.
#[must_use]
pub fn is_header_safe(text: &str) -> bool {
    text.bytes().all(|b| matches!(b, b' ' | b'\t' | b'!'..=b'~')) && !text.contains("=?")
}

/// Encodes a header value as RFC 2047 B-encoded words if needed.
///
/// Each word stays within 75 characters and never splits a UTF-8 sequence.
/// ASCII text without encoded-word lookalikes is returned as one element.
#[must_use]
pub fn encode_rfc2047_words(text: &str) -> Vec<String> {
    if is_header_safe(text) {
        return vec![text.to_string()];
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, ch) in text.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > WORD_CHUNK && end > start {
            words.push(encoded_word(&text[start..end]));
            start = end;
        }
        end = next;
    }
    if end > start || words.is_empty() {
        words.push(encoded_word(&text[start..end]));
    }
    words
}

/// Encodes a header value using RFC 2047, folding between encoded words.
#[must_use]
pub fn encode_rfc2047(text: &str) -> String {
    encode_rfc2047_words(text).join("\r\n ")
}

fn encoded_word(chunk: &str) -> String {
    format!("=?utf-8?B?{}?=", encode_base64(chunk.as_bytes()))
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
    use proptest::prelude::*;

    fn qp(data: &[u8]) -> String {
        let mut writer = QuotedPrintableWriter::new(Vec::new());
        writer.write_all(data).unwrap();
        String::from_utf8(writer.finish().unwrap()).unwrap()
    }

    fn qp_decode(encoded: &str) -> Vec<u8> {
        let raw = format!("Content-Transfer-Encoding: quoted-printable\r\n\r\n{encoded}");
        mailparse::parse_mail(raw.as_bytes())
            .unwrap()
            .get_body_raw()
            .unwrap()
    }

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_writer_wraps_lines() {
        let data = vec![0xa5u8; 300];
        let mut writer = base64_writer(Vec::new());
        writer.write_all(&data).unwrap();
        let out = writer.finish().unwrap().into_inner();
        let text = String::from_utf8(out).unwrap();

        for line in text.split("\r\n").filter(|l| !l.is_empty()) {
            assert!(line.len() <= 76);
        }
        assert_eq!(decode_base64(&text).unwrap(), data);
    }

    #[test]
    fn test_quoted_printable_plain_ascii() {
        assert_eq!(qp(b"Hello, World!"), "Hello, World!");
    }

    #[test]
    fn test_quoted_printable_non_ascii() {
        let encoded = qp("Héllo, Wørld!".as_bytes());
        assert_eq!(encoded, "H=C3=A9llo, W=C3=B8rld!");
    }

    #[test]
    fn test_quoted_printable_equals_sign() {
        assert_eq!(qp(b"a=b"), "a=3Db");
    }

    #[test]
    fn test_quoted_printable_keeps_hard_breaks() {
        assert_eq!(
            qp(b"line one\r\nline two"),
            "line one\r\nline two"
        );
    }

    #[test]
    fn test_quoted_printable_trailing_whitespace() {
        assert_eq!(qp(b"end \r\nnext\t"), "end=20\r\nnext=09");
    }

    #[test]
    fn test_quoted_printable_bare_lf_becomes_crlf() {
        assert_eq!(qp(b"a\nb"), "a\r\nb");
    }

    #[test]
    fn test_quoted_printable_soft_breaks() {
        let text = "x".repeat(200);
        let encoded = qp(text.as_bytes());
        for line in encoded.split("\r\n") {
            assert!(line.len() <= 76, "line too long: {}", line.len());
        }
        assert!(encoded.contains("=\r\n"));
        assert_eq!(qp_decode(&encoded), text.as_bytes());
    }

    #[test]
    fn test_rfc2047_ascii_passthrough() {
        assert_eq!(encode_rfc2047("Hello"), "Hello");
    }

    #[test]
    fn test_rfc2047_non_ascii() {
        let encoded = encode_rfc2047("Héllo");
        assert_eq!(encoded, "=?utf-8?B?SMOpbGxv?=");
    }

    #[test]
    fn test_rfc2047_lookalike_is_encoded() {
        let encoded = encode_rfc2047("=?x?");
        assert!(encoded.starts_with("=?utf-8?B?"));
    }

    #[test]
    fn test_rfc2047_long_text_splits_words() {
        let text = "Привет, мир! ".repeat(10);
        let words = encode_rfc2047_words(&text);
        assert!(words.len() > 1);

        let mut decoded = Vec::new();
        for word in &words {
            assert!(word.len() <= 75);
            let inner = word
                .strip_prefix("=?utf-8?B?")
                .and_then(|w| w.strip_suffix("?="))
                .unwrap();
            let chunk = decode_base64(inner).unwrap();
            // every word holds whole characters
            assert!(String::from_utf8(chunk.clone()).is_ok());
            decoded.extend(chunk);
        }
        assert_eq!(String::from_utf8(decoded).unwrap(), text);
    }

    proptest! {
        #[test]
        fn prop_quoted_printable_round_trip(text in "[ -~\u{e9}\u{4e16}]{0,300}") {
            let encoded = qp(text.as_bytes());
            for line in encoded.split("\r\n") {
                prop_assert!(line.len() <= 76);
            }
            prop_assert_eq!(qp_decode(&encoded), text.as_bytes());
        }
    }
}
