//! Message description and streaming assembly.
//!
//! A [`Message`] is built once through [`MessageBuilder`] and can then be
//! rendered any number of times. Each [`Message::render`] call allocates
//! fresh boundaries and a fresh `Date`, so renders never share state.

use crate::address::Address;
use crate::boundary::Boundary;
use crate::content_type::ContentType;
use crate::dkim::{DkimConfig, DkimSigner};
use crate::encoding::{QuotedPrintableWriter, base64_writer, encode_rfc2047};
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::part::{Attachment, BodyKind, Content, Disposition, body_content_type};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Transfer encoding applied to text, AMP and HTML bodies.
///
/// Attachments and inline resources are always base64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyEncoding {
    /// `quoted-printable`.
    #[default]
    QuotedPrintable,
    /// `base64`.
    Base64,
}

impl BodyEncoding {
    /// Header value for `Content-Transfer-Encoding`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QuotedPrintable => "quoted-printable",
            Self::Base64 => "base64",
        }
    }
}

/// One present alternative body and its inline resources.
#[derive(Debug)]
struct Body {
    kind: BodyKind,
    content: Content,
    related: Vec<Attachment>,
}

/// Per-render mutable state.
struct RenderContext {
    date: String,
    mixed: Boundary,
    alternative: Boundary,
    related: Vec<Boundary>,
}

impl RenderContext {
    fn new(bodies: usize) -> Self {
        Self {
            date: chrono::Local::now()
                .format("%a, %d %b %Y %H:%M:%S %z")
                .to_string(),
            mixed: Boundary::new(),
            alternative: Boundary::new(),
            related: (0..bodies).map(|_| Boundary::new()).collect(),
        }
    }
}

/// Builder for [`Message`].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Option<String>,
    reply_to: Option<String>,
    subject: Content,
    extra_headers: Vec<String>,
    mime_headers: Headers,
    text: Content,
    amp: Content,
    html: Content,
    amp_related: Vec<Attachment>,
    html_related: Vec<Attachment>,
    attachments: Vec<Attachment>,
    encoding: BodyEncoding,
    dkim: Option<DkimConfig>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `From` address.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Sets the `To` address, also used as the envelope recipient.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to = Some(address.into());
        self
    }

    /// Sets the `Reply-To` address.
    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Sets the literal subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject.set_literal(subject.into().into_bytes());
        self
    }

    /// Appends producer output to the subject at render time.
    #[must_use]
    pub fn subject_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn Write) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.subject.set_producer(std::sync::Arc::new(f));
        self
    }

    /// Adds a raw header line such as `X-Campaign: spring`.
    ///
    /// Lines without a valid field name are rejected by [`build`](Self::build).
    #[must_use]
    pub fn header(mut self, line: impl Into<String>) -> Self {
        let line = line.into();
        let line = line.trim_end_matches(['\r', '\n']).replace(['\r', '\n'], " ");
        if !line.is_empty() {
            self.extra_headers.push(line);
        }
        self
    }

    /// Adds a MIME header value. Repeated names fold into one header.
    #[must_use]
    pub fn mime_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.mime_headers.add(name, value);
        self
    }

    /// Sets the plain-text body.
    #[must_use]
    pub fn text(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.text.set_literal(body.into());
        self
    }

    /// Sets a producer for the plain-text body, written after any literal.
    #[must_use]
    pub fn text_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn Write) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.text.set_producer(std::sync::Arc::new(f));
        self
    }

    /// Sets the AMP body.
    #[must_use]
    pub fn amp(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.amp.set_literal(body.into());
        self
    }

    /// Sets a producer for the AMP body.
    #[must_use]
    pub fn amp_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn Write) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.amp.set_producer(std::sync::Arc::new(f));
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.html.set_literal(body.into());
        self
    }

    /// Sets a producer for the HTML body.
    #[must_use]
    pub fn html_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn Write) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.html.set_producer(std::sync::Arc::new(f));
        self
    }

    /// Adds an inline resource referenced from the HTML body by `cid:<name>`.
    #[must_use]
    pub fn html_related(mut self, resource: Attachment) -> Self {
        self.html_related.push(resource);
        self
    }

    /// Adds an inline resource referenced from the AMP body by `cid:<name>`.
    #[must_use]
    pub fn amp_related(mut self, resource: Attachment) -> Self {
        self.amp_related.push(resource);
        self
    }

    /// Adds an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Sets the body transfer encoding.
    #[must_use]
    pub const fn body_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Signs every render with DKIM.
    #[must_use]
    pub fn dkim(mut self, config: DkimConfig) -> Self {
        self.dkim = Some(config);
        self
    }

    /// Validates addresses and key material and returns the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeader`] without `From` or `To`,
    /// [`Error::InvalidAddress`] for a malformed address,
    /// [`Error::InvalidHeader`] for a raw header line without a field name
    /// and [`Error::Dkim`] for unusable key material.
    pub fn build(self) -> Result<Message> {
        if let Some(line) = self.extra_headers.iter().find(|line| !is_header_line(line)) {
            return Err(Error::InvalidHeader(line.clone()));
        }
        let from = Address::parse(self.from.as_deref().ok_or(Error::MissingHeader("From"))?)?;
        let to = Address::parse(self.to.as_deref().ok_or(Error::MissingHeader("To"))?)?;
        let reply_to = self.reply_to.as_deref().map(Address::parse).transpose()?;
        let signer = self.dkim.as_ref().map(DkimConfig::signer).transpose()?;

        let bodies = [
            (BodyKind::Text, self.text, Vec::new()),
            (BodyKind::Amp, self.amp, self.amp_related),
            (BodyKind::Html, self.html, self.html_related),
        ]
        .into_iter()
        .filter(|(_, content, _)| content.is_present())
        .map(|(kind, content, related)| Body {
            kind,
            content,
            related,
        })
        .collect();

        Ok(Message {
            from,
            to,
            reply_to,
            subject: self.subject,
            extra_headers: self.extra_headers,
            mime_headers: self.mime_headers,
            bodies,
            attachments: self.attachments,
            encoding: self.encoding,
            signer,
        })
    }
}

/// Returns true for `Name: value` with a printable ASCII field name.
fn is_header_line(line: &str) -> bool {
    line.split_once(':').is_some_and(|(name, _)| {
        !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic())
    })
}

/// An immutable message description, rendered on demand.
#[derive(Debug)]
pub struct Message {
    from: Address,
    to: Address,
    reply_to: Option<Address>,
    subject: Content,
    extra_headers: Vec<String>,
    mime_headers: Headers,
    bodies: Vec<Body>,
    attachments: Vec<Attachment>,
    encoding: BodyEncoding,
    signer: Option<DkimSigner>,
}

impl Message {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    /// Sender address.
    #[must_use]
    pub const fn from(&self) -> &Address {
        &self.from
    }

    /// Recipient address.
    #[must_use]
    pub const fn to(&self) -> &Address {
        &self.to
    }

    /// Reply-To address, if set.
    #[must_use]
    pub const fn reply_to(&self) -> Option<&Address> {
        self.reply_to.as_ref()
    }

    /// Returns true if renders carry a DKIM signature.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        self.signer.is_some()
    }

    /// Writes the complete message into `out`.
    ///
    /// Boundaries are drawn fresh for every call. A signed message is
    /// prefixed with its `DKIM-Signature` header.
    ///
    /// # Errors
    ///
    /// Returns the first sink, file or producer error, or a signing error.
    /// Output already written is not rolled back.
    pub fn render(&self, out: &mut dyn Write) -> Result<()> {
        let mut ctx = RenderContext::new(self.bodies.len());
        match &self.signer {
            Some(signer) => signer.sign_render(&mut |w: &mut dyn Write| self.render_with(&mut ctx, w), out),
            None => self.render_with(&mut ctx, out),
        }
    }

    /// Renders into memory.
    ///
    /// # Errors
    ///
    /// See [`render`](Self::render).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.render(&mut out)?;
        Ok(out)
    }

    fn render_with(&self, ctx: &mut RenderContext, out: &mut dyn Write) -> Result<()> {
        self.write_headers(ctx, out)?;

        let top_level = usize::from(!self.bodies.is_empty()) + self.attachments.len();
        if top_level > 1 {
            let content_type = ContentType::multipart("mixed", ctx.mixed.token());
            write!(out, "Content-Type: {content_type}\r\n\r\n")?;

            let mut index = 0;
            if !self.bodies.is_empty() {
                out.write_all(ctx.mixed.open().as_bytes())?;
                self.write_primary(ctx, out)?;
                index += 1;
            }
            for attachment in &self.attachments {
                out.write_all(ctx.mixed.before_part(index).as_bytes())?;
                attachment.write_part(Disposition::Attachment, out)?;
                index += 1;
            }
            out.write_all(ctx.mixed.close().as_bytes())?;
            return Ok(());
        }

        if !self.bodies.is_empty() {
            return self.write_primary(ctx, out);
        }
        if let Some(attachment) = self.attachments.first() {
            return attachment.write_part(Disposition::Attachment, out);
        }
        self.write_body_part(BodyKind::Text, &Content::default(), out)
    }

    fn write_headers(&self, ctx: &RenderContext, out: &mut dyn Write) -> Result<()> {
        write!(out, "From: {}\r\n", self.from.to_header())?;
        write!(out, "To: {}\r\n", self.to.to_header())?;
        if let Some(reply_to) = &self.reply_to {
            write!(out, "Reply-To: {}\r\n", reply_to.to_header())?;
        }
        write!(out, "Date: {}\r\n", ctx.date)?;
        out.write_all(b"MIME-Version: 1.0\r\n")?;
        for line in &self.extra_headers {
            write!(out, "{line}\r\n")?;
        }
        self.mime_headers.write_to(out)?;

        let mut subject = Vec::new();
        self.subject.write_to(&mut subject)?;
        let subject = String::from_utf8_lossy(&subject).replace(['\r', '\n'], "");
        write!(out, "Subject: {}\r\n", encode_rfc2047(&subject))?;
        Ok(())
    }

    /// Writes the bodies, inside `multipart/alternative` when there are several.
    fn write_primary(&self, ctx: &mut RenderContext, out: &mut dyn Write) -> Result<()> {
        if self.bodies.len() == 1 {
            if let (Some(body), Some(related)) = (self.bodies.first(), ctx.related.first_mut()) {
                return self.write_body(body, related, out);
            }
        }

        let content_type = ContentType::multipart("alternative", ctx.alternative.token());
        write!(out, "Content-Type: {content_type}\r\n\r\n")?;
        for (index, (body, related)) in self.bodies.iter().zip(&mut ctx.related).enumerate() {
            out.write_all(ctx.alternative.before_part(index).as_bytes())?;
            self.write_body(body, related, out)?;
        }
        out.write_all(ctx.alternative.close().as_bytes())?;
        Ok(())
    }

    /// Writes one body, inside `multipart/related` when it has resources.
    fn write_body(&self, body: &Body, boundary: &mut Boundary, out: &mut dyn Write) -> Result<()> {
        if body.related.is_empty() {
            return self.write_body_part(body.kind, &body.content, out);
        }

        let content_type = ContentType::multipart("related", boundary.token())
            .with_parameter("type", body_content_type(body.kind).essence());
        write!(out, "Content-Type: {content_type}\r\n\r\n")?;
        out.write_all(boundary.open().as_bytes())?;
        self.write_body_part(body.kind, &body.content, out)?;
        for resource in &body.related {
            out.write_all(boundary.delimiter().as_bytes())?;
            resource.write_part(Disposition::Inline, out)?;
        }
        out.write_all(boundary.close().as_bytes())?;
        Ok(())
    }

    fn write_body_part(&self, kind: BodyKind, content: &Content, out: &mut dyn Write) -> Result<()> {
        write!(
            out,
            "Content-Type: {}\r\nContent-Transfer-Encoding: {}\r\n\r\n",
            body_content_type(kind),
            self.encoding.as_str()
        )?;
        match self.encoding {
            BodyEncoding::QuotedPrintable => {
                let mut encoder = QuotedPrintableWriter::new(&mut *out);
                content.write_to(&mut encoder)?;
                encoder.finish()?;
            }
            BodyEncoding::Base64 => {
                let mut encoder = base64_writer(&mut *out);
                content.write_to(&mut encoder)?;
                encoder.finish()?;
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
    use crate::dkim::SignStrategy;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn base() -> MessageBuilder {
        MessageBuilder::new()
            .from("Alice <a@x.tld>")
            .to("Bob <b@y.tld>")
            .subject("Hi")
    }

    fn render(message: &Message) -> String {
        String::from_utf8(message.to_bytes().unwrap()).unwrap()
    }

    fn ed25519_key() -> String {
        pem::encode(&pem::Pem::new("EDDSA PRIVATE KEY", vec![7u8; 32]))
    }

    #[test]
    fn test_header_order() {
        let message = base()
            .reply_to("help@x.tld")
            .header("X-Campaign: spring\r\n")
            .mime_header("list-unsubscribe", "<mailto:u@x.tld>")
            .text("Hello")
            .build()
            .unwrap();
        let out = render(&message);

        let names: Vec<&str> = out
            .split("\r\n\r\n")
            .next()
            .unwrap()
            .split("\r\n")
            .map(|line| line.split(':').next().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "From",
                "To",
                "Reply-To",
                "Date",
                "MIME-Version",
                "X-Campaign",
                "List-Unsubscribe",
                "Subject",
                "Content-Type",
                "Content-Transfer-Encoding",
            ]
        );
        assert!(out.starts_with("From: Alice <a@x.tld>\r\nTo: Bob <b@y.tld>\r\nReply-To: <help@x.tld>\r\n"));
    }

    #[test]
    fn test_single_body_has_no_boundary() {
        let message = base().html("<p>Hello</p>").build().unwrap();
        let out = render(&message);
        assert!(!out.contains("multipart"));
        assert!(!out.contains("--_"));
        assert!(out.ends_with("Content-Type: text/html; charset=utf-8\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\n<p>Hello</p>"));
    }

    #[test]
    fn test_alternative_order() {
        let message = base()
            .html("<p>Hello</p>")
            .text("Hello")
            .amp("<html amp4email>Hello</html>")
            .build()
            .unwrap();
        let out = render(&message);

        assert_eq!(out.matches("multipart/alternative").count(), 1);
        assert!(!out.contains("multipart/mixed"));
        let text = out.find("text/plain").unwrap();
        let amp = out.find("text/x-amp-html").unwrap();
        let html = out.find("text/html").unwrap();
        assert!(text < amp && amp < html);
    }

    #[test]
    fn test_empty_message_is_empty_text() {
        let message = base().build().unwrap();
        let out = render(&message);
        assert!(out.ends_with("Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\n"));
    }

    #[test]
    fn test_missing_addresses() {
        let err = MessageBuilder::new().to("b@y.tld").build().unwrap_err();
        assert!(matches!(err, Error::MissingHeader("From")));

        let err = MessageBuilder::new().from("a@x.tld").build().unwrap_err();
        assert!(matches!(err, Error::MissingHeader("To")));

        let err = base().to("<user[at]domain.tld>").build().unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[test]
    fn test_raw_header_needs_field_name() {
        for bad in ["X-Campaign spring", ": spring", "X Campaign: spring", "Gr\u{fc}\u{df}e: x"] {
            let err = base().header(bad).text("Hello").build().unwrap_err();
            assert!(matches!(&err, Error::InvalidHeader(line) if line == bad), "{bad}");
            assert!(err.is_config());
        }

        let message = base().header("X-Empty:").text("Hello").build().unwrap();
        assert!(render(&message).contains("\r\nX-Empty:\r\n"));
    }

    #[test]
    fn test_subject_producer_and_encoding() {
        let message = base()
            .subject("Order ")
            .subject_fn(|w| w.write_all("n°42\r\n".as_bytes()))
            .text("x")
            .build()
            .unwrap();
        let out = render(&message);
        let expected = format!("Subject: {}\r\n", encode_rfc2047("Order n°42"));
        assert!(out.contains(&expected));
        assert!(expected.starts_with("Subject: =?utf-8?B?"));
    }

    #[test]
    fn test_producer_follows_literal() {
        let message = base()
            .text("Hello, ")
            .text_fn(|w| w.write_all(b"World"))
            .build()
            .unwrap();
        assert!(render(&message).ends_with("\r\n\r\nHello, World"));
    }

    #[test]
    fn test_base64_bodies() {
        let message = base()
            .text("Hello")
            .body_encoding(BodyEncoding::Base64)
            .build()
            .unwrap();
        let out = render(&message);
        assert!(out.ends_with("Content-Transfer-Encoding: base64\r\n\r\nSGVsbG8="));
    }

    #[test]
    fn test_each_render_draws_new_boundaries() {
        let message = base().text("a").html("b").build().unwrap();
        let first = render(&message);
        let second = render(&message);
        let boundary = |s: &str| {
            let start = s.find("boundary=").unwrap() + 9;
            s[start..].trim_start_matches('"')[..42].to_string()
        };
        assert_ne!(boundary(&first), boundary(&second));
    }

    #[test]
    fn test_producer_error_aborts() {
        let message = base()
            .text_fn(|_| Err(io::Error::other("template failed")))
            .build()
            .unwrap();
        let err = message.to_bytes().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_bad_dkim_key_fails_at_build() {
        let err = base()
            .text("x")
            .dkim(DkimConfig::new("x.tld", "mail", "nonsense"))
            .build()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_signed_double_render_runs_producers_twice() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let message = base()
            .text("a")
            .html_fn(move |w| {
                counter.fetch_add(1, Ordering::SeqCst);
                w.write_all(b"<p>b</p>")
            })
            .dkim(DkimConfig::new("x.tld", "mail", ed25519_key()))
            .build()
            .unwrap();
        assert!(message.is_signed());

        let out = render(&message);
        assert!(out.starts_with("DKIM-Signature: v=1; a=ed25519-sha256;"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.matches("\r\nFrom: ").count(), 1);
    }

    #[test]
    fn test_signed_buffered_render_runs_producers_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let message = base()
            .text_fn(move |w| {
                counter.fetch_add(1, Ordering::SeqCst);
                w.write_all(b"hello")
            })
            .dkim(DkimConfig::new("x.tld", "mail", ed25519_key()).strategy(SignStrategy::BufferedRender))
            .build()
            .unwrap();

        let out = render(&message);
        assert!(out.starts_with("DKIM-Signature: "));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
