//! End-to-end delivery against mock SMTP servers on loopback.

mod support;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use mailfleet::mime::{Attachment, Message};
use mailfleet::{
    DeliveryResult, Dialer, Email, Error, MailServer, Pipeline, Resolve, Resolver, Route,
    RouteConfig, SmartHost, SmtpDeliverer, deliver_now, session,
};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use support::{MockSmtpServer, closed_port};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn png_bytes() -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend((0..4000u32).map(|i| (i * 13 % 256) as u8));
    data
}

fn body_text(part: &ParsedMail<'_>) -> String {
    part.get_body().unwrap().trim_end_matches(['\r', '\n']).to_string()
}

fn relay_route(server: &MockSmtpServer) -> RouteConfig {
    RouteConfig::builder("relay")
        .hostname("mail.x.tld")
        .smart_host(SmartHost::new("127.0.0.1", server.port()))
        .build()
}

fn simple_message() -> Message {
    Message::builder()
        .from("Alice <a@x.tld>")
        .to("Bob <b@y.tld>")
        .subject("Hi")
        .text("Hello")
        .build()
        .unwrap()
}

fn collector() -> (
    Arc<Mutex<Vec<DeliveryResult>>>,
    impl Fn(DeliveryResult) + Send + Sync + 'static,
) {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);
    (results, move |result| sink.lock().unwrap().push(result))
}

/// Resolver answering MX queries from a table and PTR queries from a queue,
/// one answer per lookup.
#[derive(Default)]
struct TableResolver {
    mx: HashMap<&'static str, Vec<&'static str>>,
    ptr: Mutex<VecDeque<Option<&'static str>>>,
    reversed: Arc<Mutex<Vec<IpAddr>>>,
}

impl TableResolver {
    fn mx(mut self, domain: &'static str, hosts: &[&'static str]) -> Self {
        self.mx.insert(domain, hosts.to_vec());
        self
    }

    fn ptr(self, answer: Option<&'static str>) -> Self {
        self.ptr.lock().unwrap().push_back(answer);
        self
    }
}

impl Resolve for TableResolver {
    fn mail_servers<'a>(
        &'a self,
        domain: &'a str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = mailfleet::Result<Vec<MailServer>>> + Send + 'a>> {
        Box::pin(async move {
            let hosts = self
                .mx
                .get(domain)
                .ok_or_else(|| Error::Resolution(format!("domain {domain} does not exist")))?;
            Ok(hosts
                .iter()
                .zip(1u16..)
                .map(|(host, preference)| MailServer::new(*host, preference * 10, port))
                .collect())
        })
    }

    fn reverse<'a>(
        &'a self,
        ip: IpAddr,
    ) -> Pin<Box<dyn Future<Output = mailfleet::Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            self.reversed.lock().unwrap().push(ip);
            let answer = self.ptr.lock().unwrap().pop_front().flatten();
            Ok(answer.map(str::to_string))
        })
    }
}

fn unnamed_route(server: &MockSmtpServer) -> RouteConfig {
    RouteConfig::builder("direct").port(server.port()).build()
}

async fn deliver(route: &RouteConfig, message: Message) -> DeliveryResult {
    deliver_with(SmtpDeliverer::new(), route, message).await
}

async fn deliver_with(
    deliverer: SmtpDeliverer,
    route: &RouteConfig,
    message: Message,
) -> DeliveryResult {
    let (results, callback) = collector();
    let route = Route::from_config(route).unwrap();
    let email = Email::new("task", message).on_result(callback);

    deliver_now(&deliverer, &route, email).await;

    let mut results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    results.pop().unwrap()
}

#[tokio::test]
async fn test_end_to_end_through_pipeline() {
    let server = MockSmtpServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let logo = png_bytes();
    let path = dir.path().join("logo.png");
    std::fs::write(&path, &logo).unwrap();

    let message = Message::builder()
        .from("Alice <a@x.tld>")
        .to("Bob <b@y.tld>")
        .subject("Hi")
        .text("Hello")
        .html("<p>Hello</p>")
        .attach(Attachment::from_path(&path).unwrap())
        .build()
        .unwrap();

    let (results, callback) = collector();
    let pipeline = Pipeline::new(&[relay_route(&server)]).unwrap();
    pipeline.start().unwrap();
    pipeline
        .send(Email::new("e2e", message).on_result(callback))
        .await
        .unwrap();
    pipeline.stop().await;

    {
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "e2e");
        assert!(results[0].is_success(), "{:?}", results[0].error);
    }

    let sessions = server.wait_for_sessions(1).await;
    let session = &sessions[0];
    assert_eq!(session.helo.as_deref(), Some("mail.x.tld"));
    assert_eq!(session.mail_from.as_deref(), Some("a@x.tld"));
    assert_eq!(session.rcpt_to, vec!["b@y.tld"]);
    assert_eq!(session.commands.last().map(String::as_str), Some("QUIT"));
    assert!(
        session
            .commands
            .iter()
            .any(|c| c == "MAIL FROM:<a@x.tld> BODY=8BITMIME")
    );

    let data = session.data.as_ref().unwrap();
    let parsed = mailparse::parse_mail(data).unwrap();
    assert_eq!(parsed.headers.get_first_value("Subject").unwrap(), "Hi");
    assert_eq!(parsed.ctype.mimetype, "multipart/mixed");

    let alternative = &parsed.subparts[0];
    assert_eq!(alternative.ctype.mimetype, "multipart/alternative");
    assert_eq!(body_text(&alternative.subparts[0]), "Hello");
    assert_eq!(body_text(&alternative.subparts[1]), "<p>Hello</p>");

    let attachment = &parsed.subparts[1];
    let disposition = attachment.get_content_disposition();
    assert_eq!(disposition.disposition, DispositionType::Attachment);
    assert_eq!(disposition.params.get("filename").unwrap(), "logo.png");
    assert_eq!(attachment.get_body_raw().unwrap(), logo);
}

#[tokio::test]
async fn test_smart_host_auth_plain() {
    let server = MockSmtpServer::builder()
        .with_extension("AUTH PLAIN LOGIN")
        .build()
        .await;
    let route = RouteConfig::builder("relay")
        .hostname("mail.x.tld")
        .smart_host(SmartHost::new("127.0.0.1", server.port()).credentials("u", "p"))
        .build();

    let result = deliver(&route, simple_message()).await;
    assert!(result.is_success(), "{:?}", result.error);

    let sessions = server.wait_for_sessions(1).await;
    let commands = &sessions[0].commands;
    let auth = commands.iter().position(|c| c == "AUTH PLAIN AHUAcA==").unwrap();
    let mail = commands.iter().position(|c| c.starts_with("MAIL FROM")).unwrap();
    assert!(auth < mail);
}

#[tokio::test]
async fn test_credentials_without_auth_support() {
    let server = MockSmtpServer::start().await;
    let route = RouteConfig::builder("relay")
        .hostname("mail.x.tld")
        .smart_host(SmartHost::new("127.0.0.1", server.port()).credentials("u", "p"))
        .build();

    let result = deliver(&route, simple_message()).await;
    let error = result.error.unwrap();
    assert!(matches!(
        error,
        Error::Smtp(mailfleet::smtp::Error::AuthNotSupported("PLAIN"))
    ));
}

#[tokio::test]
async fn test_recipient_rejection_reported_verbatim() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(550, "5.1.1 no such user")
        .build()
        .await;

    let result = deliver(&relay_route(&server), simple_message()).await;
    let error = result.error.unwrap();
    assert_eq!(error.to_string(), "550 5.1.1 no such user");
    assert_eq!(error.code(), Some(550));
    assert!(!error.is_transient());

    let sessions = server.wait_for_sessions(1).await;
    assert!(sessions[0].data.is_none());
}

#[tokio::test]
async fn test_data_rejection() {
    let server = MockSmtpServer::builder()
        .with_data_response(452, "4.3.1 insufficient storage")
        .build()
        .await;

    let result = deliver(&relay_route(&server), simple_message()).await;
    let error = result.error.unwrap();
    assert_eq!(error.code(), Some(452));
    assert!(error.is_transient());
}

#[tokio::test]
async fn test_render_failure_aborts_data() {
    let server = MockSmtpServer::start().await;
    let message = Message::builder()
        .from("a@x.tld")
        .to("b@y.tld")
        .subject("Broken")
        .text_fn(|_out| Err(io::Error::other("template missing")))
        .build()
        .unwrap();

    let result = deliver(&relay_route(&server), message).await;
    let error = result.error.unwrap();
    assert!(matches!(error, Error::Render(_)), "{error}");
    assert!(error.to_string().contains("template missing"));

    let sessions = server.wait_for_sessions(1).await;
    assert!(sessions[0].aborted);
    assert!(sessions[0].data.is_none());
}

#[tokio::test]
async fn test_failover_to_next_host() {
    let live = MockSmtpServer::start().await;
    let refusing = MockSmtpServer::builder()
        .with_ehlo_response(421, "4.3.2 shutting down")
        .build()
        .await;
    let route = Route::from_config(&RouteConfig::builder("direct").hostname("mail.x.tld").build())
        .unwrap();
    let servers = [
        MailServer::new("127.0.0.1", 5, closed_port().await),
        MailServer::new("127.0.0.1", 10, refusing.port()),
        MailServer::new("127.0.0.1", 20, live.port()),
    ];

    let dialer = Dialer::new(Arc::new(Resolver::new()));
    let connection = dialer.connect_any(&route, &servers).await.unwrap();
    assert_eq!(connection.server.port, live.port());

    session::transact(connection, &route, Arc::new(simple_message()))
        .await
        .unwrap();

    let sessions = live.wait_for_sessions(1).await;
    assert!(sessions[0].data.is_some());
    assert_eq!(refusing.wait_for_sessions(1).await[0].helo.as_deref(), Some("mail.x.tld"));
}

#[tokio::test]
async fn test_all_hosts_fail_surfaces_last_error() {
    let refusing = MockSmtpServer::builder()
        .with_ehlo_response(421, "4.3.2 shutting down")
        .build()
        .await;
    let route = Route::from_config(&RouteConfig::builder("direct").hostname("mail.x.tld").build())
        .unwrap();
    let servers = [
        MailServer::new("127.0.0.1", 5, closed_port().await),
        MailServer::new("127.0.0.1", 10, refusing.port()),
    ];

    let dialer = Dialer::new(Arc::new(Resolver::new()));
    let error = dialer.connect_any(&route, &servers).await.unwrap_err();
    assert_eq!(error.to_string(), "421 4.3.2 shutting down");
    assert!(error.is_transient());

    let error = dialer.connect_any(&route, &[]).await.unwrap_err();
    assert!(matches!(error, Error::Resolution(_)));
}

#[tokio::test]
async fn test_helo_fallback_on_same_host() {
    let server = MockSmtpServer::builder()
        .with_ehlo_response(502, "5.5.2 EHLO not implemented")
        .build()
        .await;

    let result = deliver(&relay_route(&server), simple_message()).await;
    assert!(result.is_success(), "{:?}", result.error);

    let sessions = server.wait_for_sessions(1).await;
    assert_eq!(sessions[0].commands[0], "EHLO mail.x.tld");
    assert_eq!(sessions[0].commands[1], "HELO mail.x.tld");
    assert!(sessions[0].commands.iter().any(|c| c == "MAIL FROM:<a@x.tld>"));
}

#[tokio::test]
async fn test_signed_message_delivered() {
    let server = MockSmtpServer::start().await;
    let seed = [7u8; 32];
    let pem = format!(
        "-----BEGIN ED25519 PRIVATE KEY-----\n{}\n-----END ED25519 PRIVATE KEY-----\n",
        mailfleet::mime::encoding::encode_base64(&seed)
    );
    let message = Message::builder()
        .from("Alice <a@x.tld>")
        .to("Bob <b@y.tld>")
        .subject("Signed")
        .text("Hello")
        .dkim(mailfleet::mime::DkimConfig::new("x.tld", "s1", pem))
        .build()
        .unwrap();

    let result = deliver(&relay_route(&server), message).await;
    assert!(result.is_success(), "{:?}", result.error);

    let sessions = server.wait_for_sessions(1).await;
    let data = sessions[0].data.as_ref().unwrap();
    assert!(data.starts_with(b"DKIM-Signature: v=1; a=ed25519-sha256;"));
}

#[tokio::test]
async fn test_helo_discovered_from_nat_translated_ptr() {
    let server = MockSmtpServer::start().await;
    let resolver = TableResolver::default()
        .mx("y.tld", &["127.0.0.1"])
        .ptr(Some("out.x.tld"));
    let reversed = Arc::clone(&resolver.reversed);
    let route = RouteConfig::builder("direct")
        .port(server.port())
        .nat("127.0.0.1", "203.0.113.5")
        .build();

    let deliverer = SmtpDeliverer::with_resolver(resolver);
    let result = deliver_with(deliverer, &route, simple_message()).await;
    assert!(result.is_success(), "{:?}", result.error);

    assert_eq!(
        *reversed.lock().unwrap(),
        vec![IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5))]
    );
    let sessions = server.wait_for_sessions(1).await;
    assert_eq!(sessions[0].helo.as_deref(), Some("out.x.tld"));
    assert_eq!(sessions[0].commands[0], "EHLO out.x.tld");
    assert!(sessions[0].data.is_some());
}

#[tokio::test]
async fn test_empty_ptr_moves_to_next_host() {
    let first = MockSmtpServer::start().await;
    let second = MockSmtpServer::start().await;
    let resolver = TableResolver::default().ptr(None).ptr(Some("out.x.tld"));
    let reversed = Arc::clone(&resolver.reversed);
    let route = Route::from_config(&unnamed_route(&first)).unwrap();
    let servers = [
        MailServer::new("127.0.0.1", 10, first.port()),
        MailServer::new("127.0.0.1", 20, second.port()),
    ];

    let dialer = Dialer::new(Arc::new(resolver));
    let connection = dialer.connect_any(&route, &servers).await.unwrap();
    assert_eq!(connection.server.port, second.port());
    connection.client.quit().await.unwrap();

    assert_eq!(reversed.lock().unwrap().len(), 2);
    assert!(first.wait_for_sessions(1).await[0].commands.is_empty());
    assert_eq!(
        second.wait_for_sessions(1).await[0].helo.as_deref(),
        Some("out.x.tld")
    );
}

#[tokio::test]
async fn test_no_ptr_fails_delivery() {
    let server = MockSmtpServer::start().await;
    let resolver = TableResolver::default().mx("y.tld", &["127.0.0.1"]);

    let result = deliver_with(
        SmtpDeliverer::with_resolver(resolver),
        &unnamed_route(&server),
        simple_message(),
    )
    .await;
    let error = result.error.unwrap();
    assert!(
        matches!(error, Error::NoHeloName(ip) if ip == IpAddr::V4(Ipv4Addr::LOCALHOST)),
        "{error}"
    );
    assert!(error.is_transient());
    assert!(server.wait_for_sessions(1).await[0].commands.is_empty());
}

#[tokio::test]
async fn test_unknown_domain_fails_before_dialing() {
    let server = MockSmtpServer::start().await;
    let deliverer = SmtpDeliverer::with_resolver(TableResolver::default());

    let result = deliver_with(deliverer, &unnamed_route(&server), simple_message()).await;
    assert!(matches!(result.error, Some(Error::Resolution(_))));
    assert!(server.sessions().is_empty());
}

/// Offers STARTTLS to one client and returns the TLS record it opens with.
async fn client_hello_server() -> (u16, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut socket = BufReader::new(socket);
        socket.write_all(b"220 tls.test ESMTP\r\n").await.unwrap();

        let mut line = String::new();
        loop {
            line.clear();
            socket.read_line(&mut line).await.unwrap();
            if line.starts_with("EHLO") {
                socket.write_all(b"250-tls.test\r\n250 STARTTLS\r\n").await.unwrap();
            } else if line.starts_with("STARTTLS") {
                socket.write_all(b"220 2.0.0 ready\r\n").await.unwrap();
                break;
            } else {
                panic!("unexpected command {line:?}");
            }
        }

        let mut header = [0u8; 5];
        socket.read_exact(&mut header).await.unwrap();
        let mut record = vec![0u8; usize::from(u16::from_be_bytes([header[3], header[4]]))];
        socket.read_exact(&mut record).await.unwrap();
        record
    });
    (port, handle)
}

#[tokio::test]
async fn test_starttls_names_dialed_host() {
    let (port, hello) = client_hello_server().await;
    let route = RouteConfig::builder("relay")
        .hostname("mail.x.tld")
        .smart_host(SmartHost::new("localhost", port))
        .build();

    let result = deliver(&route, simple_message()).await;
    assert!(result.error.is_some());

    let hello = hello.await.unwrap();
    let contains = |name: &[u8]| hello.windows(name.len()).any(|w| w == name);
    assert!(contains(b"localhost"));
    assert!(!contains(b"y.tld"));
}
