//! Type-state SMTP client.

use super::{DotStuffer, ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use std::collections::HashSet;
use std::marker::PhantomData;
use tokio::sync::mpsc;
use tracing::debug;

/// Replies longer than this are treated as garbage.
const MAX_REPLY_LINES: usize = 256;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
///
/// Dropping a client in any state closes the connection.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    client_hostname: String,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;

    /// Returns the underlying stream.
    fn stream(&self) -> &SmtpStream;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn stream(&self) -> &SmtpStream {
        &self.stream
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = read_reply(&mut stream).await?.success()?;
        debug!(peer = %stream.peer_addr(), greeting = %greeting, "connected");

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: HashSet::new(),
            },
            client_hostname: String::new(),
            _state: PhantomData,
        })
    }

    /// Greets with EHLO, falling back to HELO if EHLO is refused with 5xx.
    ///
    /// After a HELO fallback no extensions are known.
    ///
    /// # Errors
    ///
    /// Returns the server's reply if both greetings are rejected, or a 4xx
    /// EHLO reply as is.
    pub async fn hello(mut self, client_hostname: &str) -> Result<Self> {
        let reply = self
            .send_command(Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;
        self.client_hostname = client_hostname.to_string();

        if reply.is_success() {
            self.server_info.extensions = parse_extensions(&reply);
            return Ok(self);
        }
        if !reply.code.is_permanent() {
            return Err(reply.into_error());
        }

        debug!(reply = %reply, "EHLO refused, trying HELO");
        self.send_command(Command::Helo {
            hostname: client_hostname.to_string(),
        })
        .await?
        .success()?;
        self.server_info.extensions.clear();
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS and greets again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StartTlsNotSupported`] if not advertised, the
    /// server's reply if refused, or the handshake error.
    pub async fn starttls(mut self, server_name: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::StartTlsNotSupported);
        }

        self.send_command(Command::StartTls).await?.success()?;
        self.stream = self.stream.upgrade_to_tls(server_name).await?;
        debug!(server_name, "TLS established");

        // RFC 3207: forget pre-TLS capabilities and ask again
        let reply = self
            .send_command(Command::Ehlo {
                hostname: self.client_hostname.clone(),
            })
            .await?
            .success()?;
        self.server_info.extensions = parse_extensions(&reply);
        Ok(self)
    }

    /// Authenticates using the PLAIN mechanism with an initial response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthNotSupported`] if AUTH PLAIN is not advertised,
    /// or the server's reply if the credentials are rejected.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        if !self.server_info.supports_auth(AuthMechanism::Plain) {
            return Err(Error::AuthNotSupported(AuthMechanism::Plain.as_str()));
        }

        let credentials = format!("\0{username}\0{password}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());
        self.send_command(Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(encoded),
        })
        .await?
        .success()?;

        Ok(self.into_state())
    }

    /// Starts a mail transaction without authentication.
    ///
    /// # Errors
    ///
    /// Returns the server's reply if MAIL FROM is rejected.
    pub async fn mail_from(self, from: Address) -> Result<Client<MailTransaction>> {
        self.start_transaction(from).await
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns the server's reply if MAIL FROM is rejected.
    pub async fn mail_from(self, from: Address) -> Result<Client<MailTransaction>> {
        self.start_transaction(from).await
    }
}

impl Client<MailTransaction> {
    /// Adds the first recipient.
    ///
    /// # Errors
    ///
    /// Returns the server's reply if RCPT TO is rejected.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        self.send_command(Command::RcptTo { to }).await?.success()?;
        Ok(self.into_state())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient.
    ///
    /// # Errors
    ///
    /// Returns the server's reply if RCPT TO is rejected.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.send_command(Command::RcptTo { to }).await?.success()?;
        Ok(self)
    }

    /// Opens the DATA phase.
    ///
    /// # Errors
    ///
    /// Returns the server's reply unless it is 354.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(reply.into_error());
        }
        Ok(self.into_state())
    }
}

impl Client<Data> {
    /// Streams the message from `chunks` and ends the DATA phase.
    ///
    /// An `Err` item aborts the transfer without the terminating `.`, so the
    /// server never accepts a partial message; the connection should then be
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns the producer's error, a write error, or the server's reply if
    /// it rejects the message.
    pub async fn send_chunks(
        mut self,
        mut chunks: mpsc::Receiver<std::io::Result<Vec<u8>>>,
    ) -> Result<Client<Connected>> {
        let mut stuffer = DotStuffer::new();
        let mut out = Vec::new();
        let mut total = 0usize;

        while let Some(chunk) = chunks.recv().await {
            let chunk = chunk?;
            total += chunk.len();
            out.clear();
            stuffer.push(&chunk, &mut out);
            self.stream.write_all(&out).await?;
        }

        self.stream.write_all(stuffer.finish()).await?;
        debug!(bytes = total, "message streamed");
        self.finish_data().await
    }

    async fn finish_data(mut self) -> Result<Client<Connected>> {
        let reply = read_reply(&mut self.stream).await?.success()?;
        debug!(reply = %reply, "message accepted");
        Ok(self.into_state())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    /// Hostname announced in EHLO/HELO.
    #[must_use]
    pub fn client_hostname(&self) -> &str {
        &self.client_hostname
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        self.stream.write_all(&cmd.serialize()).await?;
        let reply = read_reply(&mut self.stream).await?;
        debug!(command = cmd.verb(), code = reply.code.as_u16(), "SMTP exchange");
        Ok(reply)
    }

    async fn start_transaction(mut self, from: Address) -> Result<Client<MailTransaction>> {
        let body = self
            .server_info
            .supports(&Extension::EightBitMime)
            .then_some("8BITMIME");
        self.send_command(Command::MailFrom { from, body })
            .await?
            .success()?;
        Ok(self.into_state())
    }

    fn into_state<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            client_hostname: self.client_hostname,
            _state: PhantomData,
        }
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;
        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(reply.into_error());
        }
        Ok(())
    }
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
        if lines.len() >= MAX_REPLY_LINES {
            return Err(Error::Parse(format!("reply exceeds {MAX_REPLY_LINES} lines")));
        }
    }

    parse_reply(&lines)
}

/// EHLO keywords, skipping the first line (the server's greeting).
fn parse_extensions(reply: &Reply) -> HashSet<Extension> {
    reply
        .message
        .iter()
        .skip(1)
        .map(|line| Extension::parse(line))
        .collect()
}
