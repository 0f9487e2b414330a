//! Body content sources and file-backed parts.

use crate::content_type::ContentType;
use crate::encoding::{base64_writer, encode_rfc2047_words, is_header_safe};
use crate::error::Result;
use crate::sniff::{read_head, sniff};
use std::fmt;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

/// Function writing content into a render target.
///
/// Under [`SignStrategy::DoubleRender`](crate::SignStrategy::DoubleRender)
/// a producer runs twice per render and must write the same bytes both times.
pub type Producer = Arc<dyn Fn(&mut dyn Write) -> io::Result<()> + Send + Sync>;

/// Literal bytes, a producer, or both (literal first).
#[derive(Clone, Default)]
pub struct Content {
    literal: Vec<u8>,
    producer: Option<Producer>,
}

impl Content {
    /// Content from literal bytes.
    #[must_use]
    pub fn literal(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            literal: bytes.into(),
            producer: None,
        }
    }

    /// Content generated at render time.
    #[must_use]
    pub fn producer<F>(f: F) -> Self
    where
        F: Fn(&mut dyn Write) -> io::Result<()> + Send + Sync + 'static,
    {
        Self {
            literal: Vec::new(),
            producer: Some(Arc::new(f)),
        }
    }

    pub(crate) fn set_literal(&mut self, bytes: Vec<u8>) {
        self.literal = bytes;
    }

    pub(crate) fn set_producer(&mut self, producer: Producer) {
        self.producer = Some(producer);
    }

    /// Returns true if there is literal content or a producer.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.literal.is_empty() || self.producer.is_some()
    }

    /// Writes the literal bytes, then the producer output.
    ///
    /// # Errors
    ///
    /// Returns the first write or producer error.
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.literal)?;
        if let Some(producer) = &self.producer {
            producer(out)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("literal_len", &self.literal.len())
            .field("producer", &self.producer.is_some())
            .finish()
    }
}

/// How a file-backed part is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Regular attachment.
    Attachment,
    /// Inline resource referenced by `cid:` from HTML or AMP.
    Inline,
}

impl Disposition {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::Inline => "inline",
        }
    }
}

/// A file attached to the message or related to an HTML/AMP body.
///
/// The file is read at render time through a shared handle, so one
/// `Attachment` must not be rendered by two messages concurrently.
/// The handle closes when the attachment is dropped.
#[derive(Debug)]
pub struct Attachment {
    name: String,
    file: File,
}

impl Attachment {
    /// Opens `path`; the part is named after its base name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self { name, file })
    }

    /// Wraps an already opened file.
    #[must_use]
    pub fn new(name: impl Into<String>, file: File) -> Self {
        Self {
            name: name.into(),
            file,
        }
    }

    /// File name used for `name=`, `filename=` and `Content-ID`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writes the part header and base64 body.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the file or writing the part fails.
    pub fn write_part(&self, disposition: Disposition, out: &mut dyn Write) -> Result<()> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let head = read_head(&mut file)?;
        file.seek(SeekFrom::Start(0))?;
        let size = file.metadata()?.len();

        let name = param_value(&self.name);
        let content_type = sniff(&head, &self.name).with_parameter("name", name.clone());

        write!(out, "Content-Type: {content_type}\r\n")?;
        out.write_all(b"Content-Transfer-Encoding: base64\r\n")?;
        if disposition == Disposition::Inline {
            write!(out, "Content-ID: <{name}>\r\n")?;
        }
        write!(
            out,
            "Content-Disposition: {}; filename=\"{name}\"; size={size}\r\n\r\n",
            disposition.as_str()
        )?;

        let mut encoder = base64_writer(&mut *out);
        io::copy(&mut file, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    }
}

/// Encoded-word form for non-ASCII names, quotes stripped either way.
fn param_value(name: &str) -> String {
    let name = name.replace(['"', '\r', '\n'], "");
    if is_header_safe(&name) {
        name
    } else {
        encode_rfc2047_words(&name).join(" ")
    }
}

/// Content type of a body kind.
pub(crate) fn body_content_type(kind: BodyKind) -> ContentType {
    match kind {
        BodyKind::Text => ContentType::text_plain(),
        BodyKind::Amp => ContentType::text_amp_html(),
        BodyKind::Html => ContentType::text_html(),
    }
}

/// Alternative body kinds in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// `text/plain`.
    Text,
    /// `text/x-amp-html`.
    Amp,
    /// `text/html`.
    Html,
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
    use crate::encoding::decode_base64;

    fn temp_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    fn split_part(rendered: &[u8]) -> (String, String) {
        let text = String::from_utf8(rendered.to_vec()).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        (head.to_string(), body.to_string())
    }

    #[test]
    fn test_content_presence() {
        assert!(!Content::default().is_present());
        assert!(Content::literal("x").is_present());
        assert!(Content::producer(|_| Ok(())).is_present());
    }

    #[test]
    fn test_content_literal_then_producer() {
        let mut content = Content::literal("Hello, ");
        content.set_producer(Arc::new(|w: &mut dyn Write| w.write_all(b"World")));
        let mut out = Vec::new();
        content.write_to(&mut out).unwrap();
        assert_eq!(out, b"Hello, World");
    }

    #[test]
    fn test_attachment_part() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let file = temp_file(&data);
        let attachment = Attachment::new("data.bin", file.reopen().unwrap());

        let mut out = Vec::new();
        attachment.write_part(Disposition::Attachment, &mut out).unwrap();
        let (head, body) = split_part(&out);

        assert!(head.contains("Content-Transfer-Encoding: base64"));
        assert!(head.contains("Content-Disposition: attachment; filename=\"data.bin\"; size=1000"));
        assert!(!head.contains("Content-ID"));
        assert_eq!(decode_base64(&body).unwrap(), data);
    }

    #[test]
    fn test_inline_part_has_content_id() {
        let file = temp_file(b"\x89PNG\r\n\x1a\n0000");
        let attachment = Attachment::new("logo.png", file.reopen().unwrap());

        let mut out = Vec::new();
        attachment.write_part(Disposition::Inline, &mut out).unwrap();
        let (head, _) = split_part(&out);

        assert!(head.starts_with("Content-Type: image/png; name=logo.png\r\n"));
        assert!(head.contains("Content-ID: <logo.png>"));
        assert!(head.contains("Content-Disposition: inline; filename=\"logo.png\""));
    }

    #[test]
    fn test_rerender_reads_from_start() {
        let file = temp_file(b"same bytes every time");
        let attachment = Attachment::new("a.txt", file.reopen().unwrap());

        let mut first = Vec::new();
        attachment.write_part(Disposition::Attachment, &mut first).unwrap();
        let mut second = Vec::new();
        attachment.write_part(Disposition::Attachment, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_from_path_uses_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let attachment = Attachment::from_path(&path).unwrap();
        assert_eq!(attachment.name(), "report.pdf");
    }

    #[test]
    fn test_non_ascii_name_encoded() {
        assert_eq!(param_value("ünï.txt"), "=?utf-8?B?w7xuw68udHh0?=");
        assert_eq!(param_value("a\"b.txt"), "ab.txt");
    }
}
