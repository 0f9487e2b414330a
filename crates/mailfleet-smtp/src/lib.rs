//! # mailfleet-smtp
//!
//! SMTP client for outbound delivery (RFC 5321).
//!
//! ## Features
//!
//! - **Type-state connection management**: Compile-time enforcement of valid
//!   SMTP state transitions
//! - **Greeting**: EHLO with HELO fallback
//! - **TLS**: STARTTLS verified against the webpki roots
//! - **Authentication**: AUTH PLAIN with initial response
//! - **Transports**: direct, bound to a local address, or through SOCKS5
//! - **Streaming DATA**: dot-stuffing over chunks from a channel, with
//!   per-operation deadlines
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailfleet_smtp::{Address, Client, Transport, connect, DEFAULT_TIMEOUT};
//!
//! #[tokio::main]
//! async fn main() -> mailfleet_smtp::Result<()> {
//!     let stream = connect("mx.example.com", 25, &Transport::Direct, DEFAULT_TIMEOUT).await?;
//!     let client = Client::from_stream(stream).await?;
//!
//!     let client = client.hello("mail.example.org").await?;
//!     let client = client.starttls("mx.example.com").await?;
//!
//!     let client = client.mail_from(Address::new("sender@example.org")?).await?;
//!     let client = client.rcpt_to(Address::new("rcpt@example.com")?).await?;
//!     let client = client.data().await?;
//!
//!     let (tx, rx) = tokio::sync::mpsc::channel(1);
//!     tx.send(Ok(b"Subject: Test\r\n\r\nHello\r\n".to_vec())).await.ok();
//!     drop(tx);
//!     let client = client.send_chunks(rx).await?;
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! Connected ── hello() / starttls() ──→ Connected
//!     │
//!     ├── auth_plain() ──→ Authenticated ── mail_from() ──┐
//!     │                                                   ▼
//!     └── mail_from() ─────────────────────────→ MailTransaction
//!                                                         │ rcpt_to()
//!                                                         ▼
//!            Connected ←── send_chunks() ── Data ←── RecipientAdded
//!                                         data()       (rcpt_to() repeats)
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command serialization
//! - [`connection`]: Streams, transports and the type-state client
//! - [`parser`]: Reply parser
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, Connected, DEFAULT_TIMEOUT, Data, DotStuffer, MailTransaction,
    ProxyUrl, RecipientAdded, ServerInfo, SmtpConnection, SmtpStream, Transport, connect,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
