//! Turns a route and a destination into a greeted SMTP client.

use crate::config::Route;
use crate::error::{Error, Result};
use crate::resolver::{MailServer, Resolve};
use mailfleet_smtp::{Client, Connected, SmtpConnection, connect};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// A greeted client and the host it reached.
#[derive(Debug)]
pub struct Connection {
    /// Client after EHLO/HELO.
    pub client: Client<Connected>,
    /// Host the client is connected to, used as the TLS server name.
    pub server: MailServer,
}

/// Opens connections for a route: to its smart host, or to the recipient
/// domain's mail exchangers in preference order.
#[derive(Clone)]
pub struct Dialer {
    resolver: Arc<dyn Resolve>,
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer").finish_non_exhaustive()
    }
}

impl Dialer {
    /// Creates a dialer sharing `resolver`.
    #[must_use]
    pub const fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self { resolver }
    }

    /// Connects for a delivery to `domain` over `route`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolution`] if MX lookup fails, or the last
    /// per-host error if no host could be greeted.
    pub async fn connect(&self, route: &Route, domain: &str) -> Result<Connection> {
        let servers = match route.smart_host() {
            Some(smart) => vec![MailServer::new(smart.host.clone(), 0, smart.port)],
            None => self.resolver.mail_servers(domain, route.port()).await?,
        };
        self.connect_any(route, &servers).await
    }

    /// Tries `servers` in order, returning the first that accepts a greeting.
    ///
    /// # Errors
    ///
    /// Returns the last host's error, or [`Error::Resolution`] if `servers`
    /// is empty.
    pub async fn connect_any(&self, route: &Route, servers: &[MailServer]) -> Result<Connection> {
        let mut last_error = None;
        for server in servers {
            match self.open(route, server).await {
                Ok(client) => {
                    return Ok(Connection {
                        client,
                        server: server.clone(),
                    });
                }
                Err(err) => {
                    warn!(route = route.name(), host = %server.host, port = server.port, error = %err, "host failed, trying next");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Resolution("no mail servers to try".into())))
    }

    async fn open(&self, route: &Route, server: &MailServer) -> Result<Client<Connected>> {
        debug!(route = route.name(), host = %server.host, port = server.port, "dialing");
        let stream = connect(&server.host, server.port, route.transport(), route.timeout()).await?;
        let (local_ip, proxy_ip) = (stream.local_ip(), stream.proxy_ip());
        let client = Client::from_stream(stream).await?;

        let helo = self.helo_name(route, local_ip, proxy_ip).await?;
        let client = client.hello(&helo).await?;
        debug!(
            host = %server.host,
            peer = %client.server_info().hostname,
            helo = %helo,
            "greeted"
        );
        Ok(client)
    }

    /// Returns the configured HELO name, or discovers one from the
    /// connection's source IP.
    ///
    /// The IP is first translated through the route's NAT map (see
    /// [`Route::public_ip`]), then reverse-resolved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoHeloName`] if the reverse lookup yields nothing.
    pub async fn helo_name(
        &self,
        route: &Route,
        local_ip: IpAddr,
        proxy_ip: Option<IpAddr>,
    ) -> Result<String> {
        if let Some(hostname) = route.hostname() {
            return Ok(hostname.to_string());
        }
        let public_ip = route.public_ip(local_ip, proxy_ip);
        self.resolver
            .reverse(public_ip)
            .await?
            .ok_or(Error::NoHeloName(public_ip))
    }
}
