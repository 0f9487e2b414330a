//! Fixed-width line wrapping for encoded output.

use std::io::{self, Write};

/// RFC 2045 line length for base64 bodies.
pub const LINE_WIDTH: usize = 76;

/// Pass-through writer that inserts CRLF after every `width` bytes.
///
/// Bytes are forwarded in order without buffering. The delimiter is only
/// written once a line is full, so finishing an encoder stacked on top
/// never leaves a dangling CRLF after a short final line.
#[derive(Debug)]
pub struct LineWrap<W: Write> {
    inner: W,
    width: usize,
    column: usize,
}

impl<W: Write> LineWrap<W> {
    /// Wraps `inner` at the RFC 2045 width of 76 columns.
    pub const fn new(inner: W) -> Self {
        Self::with_width(inner, LINE_WIDTH)
    }

    /// Wraps `inner` at a custom width. A width of zero disables wrapping.
    pub const fn with_width(inner: W, width: usize) -> Self {
        Self {
            inner,
            width,
            column: 0,
        }
    }

    /// Number of bytes written on the current line.
    #[must_use]
    pub const fn column(&self) -> usize {
        self.column
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for LineWrap<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.width == 0 {
            self.inner.write_all(buf)?;
            return Ok(buf.len());
        }

        let mut rest = buf;
        while !rest.is_empty() {
            let take = (self.width - self.column).min(rest.len());
            self.inner.write_all(&rest[..take])?;
            self.column += take;
            rest = &rest[take..];

            if self.column == self.width {
                self.inner.write_all(b"\r\n")?;
                self.column = 0;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
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
    use crate::encoding::{base64_writer, decode_base64};
    use proptest::prelude::*;

    fn wrap_all(input: &[u8], width: usize) -> Vec<u8> {
        let mut wrap = LineWrap::with_width(Vec::new(), width);
        wrap.write_all(input).unwrap();
        wrap.into_inner()
    }

    fn encode_wrapped(data: &[u8]) -> String {
        let mut writer = base64_writer(Vec::new());
        writer.write_all(data).unwrap();
        String::from_utf8(writer.finish().unwrap().into_inner()).unwrap()
    }

    #[test]
    fn test_short_input_untouched() {
        assert_eq!(wrap_all(b"abc", 76), b"abc");
    }

    #[test]
    fn test_delimiter_after_each_full_line() {
        assert_eq!(wrap_all(b"abcdefg", 3), b"abc\r\ndef\r\ng");
    }

    #[test]
    fn test_unit_at_a_time_matches_bulk() {
        let input: Vec<u8> = (0..200u8).collect();
        let mut wrap = LineWrap::with_width(Vec::new(), 76);
        for byte in &input {
            wrap.write_all(&[*byte]).unwrap();
        }
        assert_eq!(wrap.into_inner(), wrap_all(&input, 76));
    }

    #[test]
    fn test_zero_width_passes_through() {
        assert_eq!(wrap_all(b"abcdef", 0), b"abcdef");
    }

    #[test]
    fn test_no_dangling_delimiter_after_partial_group() {
        // 58 input bytes encode to 80 characters: one full line plus a 4-char tail
        let out = encode_wrapped(&[7u8; 58]);
        assert!(!out.ends_with("\r\n"));
        assert_eq!(out.split("\r\n").count(), 2);
    }

    #[test]
    fn test_round_trip_all_lengths() {
        for len in 0..1000usize {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
            let out = encode_wrapped(&data);
            for line in out.split("\r\n") {
                assert!(line.len() <= LINE_WIDTH);
            }
            assert_eq!(decode_base64(&out.replace("\r\n", "")).unwrap(), data);
        }
    }

    proptest! {
        #[test]
        fn prop_base64_round_trip(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let out = encode_wrapped(&data);
            let joined = out.replace("\r\n", "");
            prop_assert_eq!(decode_base64(&joined).unwrap(), data);
        }
    }
}
