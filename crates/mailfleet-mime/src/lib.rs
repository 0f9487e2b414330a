//! # mailfleet-mime
//!
//! Streaming MIME message assembly for outbound mail.
//!
//! ## Features
//!
//! - **Message assembly**: From/To/Reply-To/Date/Subject headers, text, AMP
//!   and HTML alternatives, inline related resources and attachments
//! - **Streaming render**: messages are written straight into any
//!   [`std::io::Write`] sink, file-backed parts are read at render time
//! - **Encoding**: Base64 wrapped at 76 columns, Quoted-Printable,
//!   RFC 2047 header words
//! - **Content sniffing**: attachment types from magic numbers and file names
//! - **DKIM**: RSA-SHA256 and Ed25519-SHA256 signatures with a double-render
//!   or buffered-render strategy
//!
//! ## Quick Start
//!
//! ### Building and Rendering
//!
//! ```ignore
//! use mailfleet_mime::{Attachment, MessageBuilder};
//!
//! let message = MessageBuilder::new()
//!     .from("Alice <a@x.tld>")
//!     .to("Bob <b@y.tld>")
//!     .subject("Hi")
//!     .text("Hello")
//!     .html("<p>Hello</p>")
//!     .attach(Attachment::from_path("logo.png")?)
//!     .build()?;
//!
//! let mut out = Vec::new();
//! message.render(&mut out)?;
//! ```
//!
//! ### Content Producers
//!
//! ```ignore
//! use mailfleet_mime::MessageBuilder;
//!
//! let message = MessageBuilder::new()
//!     .from("news@x.tld")
//!     .to("reader@y.tld")
//!     .subject("Weekly digest #")
//!     .subject_fn(|w| write!(w, "{}", 42))
//!     .html_fn(|w| w.write_all(b"<h1>Digest</h1>"))
//!     .build()?;
//! ```
//!
//! ### DKIM Signing
//!
//! ```ignore
//! use mailfleet_mime::{DkimConfig, MessageBuilder, SignStrategy};
//!
//! let dkim = DkimConfig::new("x.tld", "mail", std::fs::read_to_string("dkim.pem")?)
//!     .strategy(SignStrategy::BufferedRender);
//!
//! let message = MessageBuilder::new()
//!     .from("a@x.tld")
//!     .to("b@y.tld")
//!     .subject("Signed")
//!     .text("Hello")
//!     .dkim(dkim)
//!     .build()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod boundary;
mod content_type;
mod dkim;
mod error;
mod header;
mod message;
mod part;
mod sniff;
mod wrap;

pub mod encoding;

pub use address::Address;
pub use boundary::{Boundary, generate_token};
pub use content_type::ContentType;
pub use dkim::{DkimConfig, DkimSigner, SIGNED_HEADERS, SignStrategy, SigningKey};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{BodyEncoding, Message, MessageBuilder};
pub use part::{Attachment, BodyKind, Content, Disposition, Producer};
pub use sniff::{SNIFF_LEN, read_head, sniff};
pub use wrap::{LINE_WIDTH, LineWrap};
