//! Mock SMTP server for delivery tests.
//!
//! Accepts any number of connections, answers with configurable replies,
//! records each session and tracks how many connections were open at once.
#![allow(dead_code)] // Not every test binary uses every helper

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// What one client did during a connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Name given in EHLO or HELO.
    pub helo: Option<String>,
    /// Every command line, in order.
    pub commands: Vec<String>,
    /// Envelope sender.
    pub mail_from: Option<String>,
    /// Envelope recipients.
    pub rcpt_to: Vec<String>,
    /// Message accepted after the final `.`, with dots unstuffed.
    pub data: Option<Vec<u8>>,
    /// DATA was opened but the client went away before the final `.`.
    pub aborted: bool,
}

#[derive(Debug, Clone)]
struct Script {
    extensions: Vec<String>,
    ehlo: Option<(u16, String)>,
    mail: (u16, String),
    rcpt: (u16, String),
    data: (u16, String),
    greeting_delay: Duration,
    data_delay: Duration,
}

/// Builder for [`MockSmtpServer`].
#[derive(Debug, Clone)]
pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    /// Adds an EHLO extension line, e.g. `AUTH PLAIN`.
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.script.extensions.push(extension.to_string());
        self
    }

    /// Replies to EHLO with an error instead of the extension list.
    pub fn with_ehlo_response(mut self, code: u16, message: &str) -> Self {
        self.script.ehlo = Some((code, message.to_string()));
        self
    }

    /// Sets the MAIL FROM reply.
    pub fn with_mail_from_response(mut self, code: u16, message: &str) -> Self {
        self.script.mail = (code, message.to_string());
        self
    }

    /// Sets the RCPT TO reply.
    pub fn with_rcpt_to_response(mut self, code: u16, message: &str) -> Self {
        self.script.rcpt = (code, message.to_string());
        self
    }

    /// Sets the reply after the final `.`.
    pub fn with_data_response(mut self, code: u16, message: &str) -> Self {
        self.script.data = (code, message.to_string());
        self
    }

    /// Waits before sending the greeting.
    pub const fn with_greeting_delay(mut self, delay: Duration) -> Self {
        self.script.greeting_delay = delay;
        self
    }

    /// Waits before accepting the message.
    pub const fn with_data_delay(mut self, delay: Duration) -> Self {
        self.script.data_delay = delay;
        self
    }

    /// Binds to a loopback port and starts accepting.
    pub async fn build(self) -> MockSmtpServer {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());

        let script = Arc::new(self.script);
        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                let script = Arc::clone(&script);
                tokio::spawn(async move {
                    let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
                    state.peak.fetch_max(active, Ordering::SeqCst);
                    let session = handle_connection(socket, &script).await;
                    state.active.fetch_sub(1, Ordering::SeqCst);
                    state.sessions.lock().unwrap().push(session);
                });
            }
        });

        MockSmtpServer {
            addr,
            state,
            handle,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    sessions: Mutex<Vec<Session>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// A running mock server.
#[derive(Debug)]
pub struct MockSmtpServer {
    addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl MockSmtpServer {
    /// Starts building a server that accepts everything.
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script {
                extensions: vec!["8BITMIME".to_string(), "SIZE 10240000".to_string()],
                ehlo: None,
                mail: (250, "2.1.0 OK".to_string()),
                rcpt: (250, "2.1.5 OK".to_string()),
                data: (250, "2.0.0 queued".to_string()),
                greeting_delay: Duration::ZERO,
                data_delay: Duration::ZERO,
            },
        }
    }

    /// Starts a server that accepts everything.
    pub async fn start() -> Self {
        Self::builder().build().await
    }

    /// Listening address.
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listening port.
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Finished sessions, in completion order.
    pub fn sessions(&self) -> Vec<Session> {
        self.state.sessions.lock().unwrap().clone()
    }

    /// Most connections that were open at the same time.
    pub fn peak_connections(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Waits until `count` sessions have finished.
    pub async fn wait_for_sessions(&self, count: usize) -> Vec<Session> {
        for _ in 0..200 {
            let sessions = self.sessions();
            if sessions.len() >= count {
                return sessions;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("only {} of {count} sessions finished", self.sessions().len());
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Sends library logs to the test output. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Returns a loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn reply(writer: &mut (impl AsyncWriteExt + Unpin), code: u16, message: &str) -> bool {
    writer
        .write_all(format!("{code} {message}\r\n").as_bytes())
        .await
        .is_ok()
}

fn angle_path(line: &str) -> Option<String> {
    let start = line.find('<')?;
    let end = line[start..].find('>')?;
    Some(line[start + 1..start + end].to_string())
}

async fn handle_connection(socket: TcpStream, script: &Script) -> Session {
    let mut session = Session::default();
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    tokio::time::sleep(script.greeting_delay).await;
    if !reply(&mut writer, 220, "mock.test ESMTP").await {
        return session;
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        session.commands.push(line.clone());
        let verb = line
            .split([' ', ':'])
            .next()
            .unwrap_or_default()
            .to_uppercase();

        let ok = match verb.as_str() {
            "EHLO" => {
                session.helo = line.get(5..).map(str::to_string);
                if let Some((code, message)) = &script.ehlo {
                    reply(&mut writer, *code, message).await
                } else {
                    let mut lines = vec!["mock.test greets you".to_string()];
                    lines.extend(script.extensions.iter().cloned());
                    let last = lines.len() - 1;
                    let text: String = lines
                        .iter()
                        .enumerate()
                        .map(|(i, l)| format!("250{}{l}\r\n", if i == last { ' ' } else { '-' }))
                        .collect();
                    writer.write_all(text.as_bytes()).await.is_ok()
                }
            }
            "HELO" => {
                session.helo = line.get(5..).map(str::to_string);
                reply(&mut writer, 250, "mock.test").await
            }
            "AUTH" => reply(&mut writer, 235, "2.7.0 Authentication successful").await,
            "MAIL" => {
                session.mail_from = angle_path(&line);
                reply(&mut writer, script.mail.0, &script.mail.1).await
            }
            "RCPT" => {
                if let Some(path) = angle_path(&line) {
                    session.rcpt_to.push(path);
                }
                reply(&mut writer, script.rcpt.0, &script.rcpt.1).await
            }
            "DATA" => {
                if !reply(&mut writer, 354, "End data with <CR><LF>.<CR><LF>").await {
                    break;
                }
                match read_data(&mut reader).await {
                    Some(data) => {
                        tokio::time::sleep(script.data_delay).await;
                        session.data = Some(data);
                        reply(&mut writer, script.data.0, &script.data.1).await
                    }
                    None => {
                        session.aborted = true;
                        break;
                    }
                }
            }
            "RSET" | "NOOP" => reply(&mut writer, 250, "OK").await,
            "QUIT" => {
                let _ = reply(&mut writer, 221, "2.0.0 Bye").await;
                break;
            }
            _ => reply(&mut writer, 500, "5.5.1 Unrecognized command").await,
        };
        if !ok {
            break;
        }
    }
    session
}

/// Reads DATA lines up to the lone `.`, undoing dot-stuffing. Returns
/// `None` if the connection ends first.
async fn read_data(reader: &mut (impl AsyncBufReadExt + Unpin)) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        if line == b".\r\n" {
            return Some(data);
        }
        let unstuffed = line.strip_prefix(b".").unwrap_or(&line[..]);
        data.extend_from_slice(unstuffed);
    }
}
