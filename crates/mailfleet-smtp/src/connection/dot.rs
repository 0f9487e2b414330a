//! DATA transparency (RFC 5321 section 4.5.2).

/// Incremental dot-stuffer and line-ending normalizer.
///
/// Lines starting with `.` get an extra `.`; bare LF becomes CRLF. State is
/// kept across chunks, so a message can be fed in arbitrary pieces.
#[derive(Debug, Clone)]
pub struct DotStuffer {
    line_start: bool,
    prev_cr: bool,
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DotStuffer {
    /// Creates a stuffer positioned at the start of a line.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            line_start: true,
            prev_cr: false,
        }
    }

    /// Appends the transparent form of `chunk` to `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        out.reserve(chunk.len() + chunk.len() / 64);
        for &b in chunk {
            if self.line_start && b == b'.' {
                out.push(b'.');
            }
            if b == b'\n' && !self.prev_cr {
                out.push(b'\r');
            }
            out.push(b);
            self.line_start = b == b'\n';
            self.prev_cr = b == b'\r';
        }
    }

    /// Returns the bytes ending the DATA phase: a line break if the message
    /// did not end with one, then `.` CRLF.
    #[must_use]
    pub fn finish(self) -> &'static [u8] {
        if self.line_start {
            b".\r\n"
        } else if self.prev_cr {
            b"\n.\r\n"
        } else {
            b"\r\n.\r\n"
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

    fn stuff(chunks: &[&[u8]]) -> Vec<u8> {
        let mut stuffer = DotStuffer::new();
        let mut out = Vec::new();
        for chunk in chunks {
            stuffer.push(chunk, &mut out);
        }
        out.extend_from_slice(stuffer.finish());
        out
    }

    #[test]
    fn test_leading_dots() {
        assert_eq!(stuff(&[b".hidden\r\nok\r\n..two\r\n"]), b"..hidden\r\nok\r\n...two\r\n.\r\n");
    }

    #[test]
    fn test_lone_dot_line() {
        assert_eq!(stuff(&[b"a\r\n.\r\nb"]), b"a\r\n..\r\nb\r\n.\r\n");
    }

    #[test]
    fn test_split_across_chunks() {
        assert_eq!(stuff(&[b"a\r", b"\n", b".b"]), b"a\r\n..b\r\n.\r\n");
    }

    #[test]
    fn test_bare_lf_normalized() {
        assert_eq!(stuff(&[b"a\nb\n"]), b"a\r\nb\r\n.\r\n");
    }

    #[test]
    fn test_trailing_cr() {
        assert_eq!(stuff(&[b"a\r"]), b"a\r\n.\r\n");
    }

    #[test]
    fn test_empty() {
        assert_eq!(stuff(&[]), b".\r\n");
    }
}
