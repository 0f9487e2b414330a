//! One SMTP transaction: STARTTLS, AUTH, envelope, DATA, QUIT.

use crate::config::Route;
use crate::dialer::Connection;
use crate::error::{Error, Result};
use mailfleet_mime::Message;
use mailfleet_smtp::{Address, SmtpConnection};
use std::io::{self, Write};
use std::mem;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Bytes buffered before a chunk is handed to the DATA stream.
const CHUNK_SIZE: usize = 16 * 1024;

/// Chunks in flight between the renderer and the socket.
const CHANNEL_DEPTH: usize = 8;

/// Runs the transaction for `message` over a greeted connection.
///
/// The message is rendered on the blocking pool and streamed into DATA.
/// The connection is closed on every path; QUIT is only sent after the
/// message was accepted.
///
/// # Errors
///
/// Returns the peer's rejection, a transport error, or [`Error::Render`]
/// if the message could not be rendered. A render failure aborts DATA
/// without the final `.`.
pub async fn transact(connection: Connection, route: &Route, message: Arc<Message>) -> Result<()> {
    let Connection { mut client, server } = connection;

    if route.starttls() && client.server_info().supports_starttls() {
        // TLS name is the host dialed (MX or smart host), not the recipient domain.
        client = client.starttls(&server.host).await?;
    }

    let from = Address::new(message.from().email())?;
    let to = Address::new(message.to().email())?;

    let client = match route.smart_host().and_then(|smart| smart.auth()) {
        Some((username, password)) => {
            client
                .auth_plain(username, password)
                .await?
                .mail_from(from)
                .await?
        }
        None => client.mail_from(from).await?,
    };
    let client = client.rcpt_to(to).await?.data().await?;

    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let render = tokio::task::spawn_blocking(move || {
        let mut writer = ChannelWriter::new(tx);
        match message.render(&mut writer) {
            Ok(()) => writer.finish().map_err(mailfleet_mime::Error::from),
            Err(err) => {
                writer.abort(&err);
                Err(err)
            }
        }
    });

    let sent = client.send_chunks(rx).await;
    let rendered = render
        .await
        .unwrap_or_else(|join| Err(mailfleet_mime::Error::Io(io::Error::other(join))));

    match (sent, rendered) {
        (Ok(client), Ok(())) => {
            if let Err(err) = client.quit().await {
                debug!(error = %err, "QUIT after accepted message failed");
            }
            Ok(())
        }
        (Err(err), Err(render)) if is_stream_closed(&render) => Err(err.into()),
        (_, Err(render)) => Err(Error::Render(render)),
        (Err(err), Ok(())) => Err(err.into()),
    }
}

fn is_stream_closed(err: &mailfleet_mime::Error) -> bool {
    matches!(err, mailfleet_mime::Error::Io(io) if io.kind() == io::ErrorKind::BrokenPipe)
}

/// Synchronous [`Write`] feeding a bounded channel of chunks.
///
/// Must only be used off the async runtime, e.g. in `spawn_blocking`.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Vec<u8>>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send(&self, item: io::Result<Vec<u8>>) -> io::Result<()> {
        self.tx
            .blocking_send(item)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "DATA stream closed"))
    }

    fn finish(mut self) -> io::Result<()> {
        self.flush()
    }

    /// Tells the DATA stream to abort instead of terminating the message.
    fn abort(self, err: &mailfleet_mime::Error) {
        let _ = self.send(Err(io::Error::other(err.to_string())));
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.flush()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.send(Ok(chunk))
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

    #[tokio::test]
    async fn test_channel_writer_chunks() {
        let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);
        let writer = tokio::task::spawn_blocking(move || {
            let mut writer = ChannelWriter::new(tx);
            writer.write_all(&vec![b'a'; CHUNK_SIZE + 10]).unwrap();
            writer.write_all(b"tail").unwrap();
            writer.finish().unwrap();
        });

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.push(chunk.unwrap());
        }
        writer.await.unwrap();

        assert_eq!(received.len(), 2);
        assert_eq!(received[0].len(), CHUNK_SIZE + 10);
        assert_eq!(received[1], b"tail");
    }

    #[tokio::test]
    async fn test_channel_writer_abort() {
        let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::task::spawn_blocking(move || {
            let mut writer = ChannelWriter::new(tx);
            writer.write_all(b"partial").unwrap();
            writer.abort(&mailfleet_mime::Error::MissingHeader("From"));
        })
        .await
        .unwrap();

        let item = rx.recv().await.unwrap();
        assert!(item.is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_writer_closed() {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        drop(rx);
        let err = tokio::task::spawn_blocking(move || {
            let mut writer = ChannelWriter::new(tx);
            writer.write_all(b"x").unwrap();
            writer.finish().unwrap_err()
        })
        .await
        .unwrap();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(is_stream_closed(&mailfleet_mime::Error::Io(err)));
    }
}
