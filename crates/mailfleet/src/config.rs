//! Route configuration.
//!
//! A [`RouteConfig`] is the serializable description collaborators hand in;
//! [`Route`] is its validated form with the transport and NAT map parsed.

use crate::error::{Error, Result};
use mailfleet_smtp::{ProxyUrl, Transport};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

const fn default_port() -> u16 {
    25
}

const fn default_stream() -> usize {
    1
}

const fn default_starttls() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_submission_port() -> u16 {
    587
}

/// Relay used instead of direct-to-MX delivery.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartHost {
    /// Relay hostname, also the TLS server name.
    pub host: String,
    /// Relay port (default: 587).
    #[serde(default = "default_submission_port")]
    pub port: u16,
    /// AUTH PLAIN user; no AUTH when absent.
    #[serde(default)]
    pub username: Option<String>,
    /// AUTH PLAIN password.
    #[serde(default)]
    pub password: Option<String>,
}

impl SmartHost {
    /// Creates an unauthenticated smart host.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Adds AUTH PLAIN credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Returns the credentials, if a user is set.
    #[must_use]
    pub fn auth(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or_default()))
    }
}

impl fmt::Debug for SmartHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartHost")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Delivery route as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route name, used in logs.
    #[serde(default)]
    pub name: String,
    /// Fixed HELO name; discovered by reverse lookup when absent.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Local IP to bind, or `socks://` / `socks5://[user:pass@]host[:port]`.
    #[serde(default)]
    pub iface: Option<String>,
    /// Destination SMTP port for direct delivery (default: 25).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent deliveries (default: 1).
    #[serde(default = "default_stream")]
    pub stream: usize,
    /// Local IP to public IP, for HELO discovery behind NAT or a proxy.
    #[serde(default)]
    pub nat: HashMap<String, String>,
    /// Relay to use instead of MX lookup.
    #[serde(default)]
    pub smart_host: Option<SmartHost>,
    /// Negotiate STARTTLS when advertised (default: true).
    #[serde(default = "default_starttls")]
    pub starttls: bool,
    /// Connect and per-read/write deadline in seconds (default: 5).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            hostname: None,
            iface: None,
            port: default_port(),
            stream: default_stream(),
            nat: HashMap::new(),
            smart_host: None,
            starttls: default_starttls(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RouteConfig {
    /// Creates a builder for a named route.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> RouteConfigBuilder {
        RouteConfigBuilder::new(name)
    }
}

/// Builder for [`RouteConfig`].
#[derive(Debug, Clone)]
pub struct RouteConfigBuilder {
    config: RouteConfig,
}

impl RouteConfigBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: RouteConfig {
                name: name.into(),
                ..RouteConfig::default()
            },
        }
    }

    /// Sets a fixed HELO name.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = Some(hostname.into());
        self
    }

    /// Sets the bind address or proxy URL.
    #[must_use]
    pub fn iface(mut self, iface: impl Into<String>) -> Self {
        self.config.iface = Some(iface.into());
        self
    }

    /// Sets the destination port for direct delivery.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub const fn stream(mut self, stream: usize) -> Self {
        self.config.stream = stream;
        self
    }

    /// Adds a NAT translation.
    #[must_use]
    pub fn nat(mut self, local: impl Into<String>, public: impl Into<String>) -> Self {
        self.config.nat.insert(local.into(), public.into());
        self
    }

    /// Routes through a smart host.
    #[must_use]
    pub fn smart_host(mut self, smart_host: SmartHost) -> Self {
        self.config.smart_host = Some(smart_host);
        self
    }

    /// Enables or disables STARTTLS.
    #[must_use]
    pub const fn starttls(mut self, enabled: bool) -> Self {
        self.config.starttls = enabled;
        self
    }

    /// Sets the connect and I/O deadline.
    ///
    /// The deadline is kept in whole seconds; a fractional part rounds up.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs();
        self.config.timeout_secs = if timeout.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        };
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> RouteConfig {
        self.config
    }
}

/// A validated route.
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    hostname: Option<String>,
    transport: Transport,
    port: u16,
    stream: usize,
    nat: HashMap<IpAddr, IpAddr>,
    smart_host: Option<SmartHost>,
    starttls: bool,
    timeout: Duration,
}

impl Route {
    /// Validates a route description.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero stream or timeout, an iface that
    /// is neither an IP nor a SOCKS URL, an unparsable NAT entry or an empty
    /// smart host name.
    pub fn from_config(config: &RouteConfig) -> Result<Self> {
        let invalid = |why: String| Error::Config(format!("route {:?}: {why}", config.name));

        if config.stream == 0 {
            return Err(invalid("stream must be at least 1".into()));
        }
        if config.timeout_secs == 0 {
            return Err(invalid("timeout must be at least 1 second".into()));
        }
        if config
            .smart_host
            .as_ref()
            .is_some_and(|smart| smart.host.trim().is_empty())
        {
            return Err(invalid("smart host has no host name".into()));
        }

        let transport = match config.iface.as_deref().map(str::trim) {
            None | Some("") => Transport::Direct,
            Some(spec) if ProxyUrl::is_proxy_spec(spec) => Transport::Socks(
                ProxyUrl::parse(spec).map_err(|e| invalid(e.to_string()))?,
            ),
            Some(spec) => Transport::Bind(
                spec.parse()
                    .map_err(|_| invalid(format!("iface {spec:?} is not an IP or SOCKS URL")))?,
            ),
        };

        let nat = config
            .nat
            .iter()
            .map(|(local, public)| -> Result<(IpAddr, IpAddr)> {
                let parse = |ip: &str| {
                    ip.trim()
                        .parse::<IpAddr>()
                        .map_err(|_| invalid(format!("NAT entry {ip:?} is not an IP")))
                };
                Ok((parse(local)?, parse(public)?))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            name: config.name.clone(),
            hostname: config
                .hostname
                .as_deref()
                .map(|h| h.trim().trim_end_matches('.').to_string())
                .filter(|h| !h.is_empty()),
            transport,
            port: config.port,
            stream: config.stream,
            nat,
            smart_host: config.smart_host.clone(),
            starttls: config.starttls,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Route name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed HELO name, if configured.
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// How connections are opened.
    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Destination port for direct delivery.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Concurrency limit.
    #[must_use]
    pub const fn stream(&self) -> usize {
        self.stream
    }

    /// Smart host, if any.
    #[must_use]
    pub const fn smart_host(&self) -> Option<&SmartHost> {
        self.smart_host.as_ref()
    }

    /// Whether STARTTLS is attempted when advertised.
    #[must_use]
    pub const fn starttls(&self) -> bool {
        self.starttls
    }

    /// Connect and I/O deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Translates a connection's source IP through the NAT map.
    ///
    /// For a SOCKS tunnel the map is keyed by the proxy's address first; the
    /// address the proxy reported (`local`) is only looked up when the proxy
    /// has no entry.
    #[must_use]
    pub fn public_ip(&self, local: IpAddr, proxy: Option<IpAddr>) -> IpAddr {
        proxy
            .and_then(|ip| self.nat.get(&ip))
            .or_else(|| self.nat.get(&local))
            .copied()
            .unwrap_or(local)
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
    use std::net::Ipv4Addr;

    #[test]
    fn test_serde_defaults() {
        let config: RouteConfig = serde_json::from_str(r#"{"name": "main"}"#).unwrap();
        assert_eq!(config.port, 25);
        assert_eq!(config.stream, 1);
        assert!(config.starttls);
        assert_eq!(config.timeout_secs, 5);
        assert!(config.smart_host.is_none());
    }

    #[test]
    fn test_serde_smart_host() {
        let config: RouteConfig = serde_json::from_str(
            r#"{
                "name": "relay",
                "stream": 4,
                "smart_host": {"host": "smtp.x.tld", "username": "u", "password": "p"}
            }"#,
        )
        .unwrap();
        let smart = config.smart_host.as_ref().unwrap();
        assert_eq!(smart.port, 587);
        assert_eq!(smart.auth(), Some(("u", "p")));
        assert!(!format!("{smart:?}").contains("\"p\""));
    }

    #[test]
    fn test_builder() {
        let config = RouteConfig::builder("fleet")
            .hostname("mail.x.tld.")
            .iface("10.0.0.5")
            .port(2525)
            .stream(8)
            .nat("10.0.0.5", "203.0.113.7")
            .starttls(false)
            .timeout(Duration::from_secs(9))
            .build();
        assert_eq!(config.stream, 8);
        assert_eq!(config.timeout_secs, 9);

        let route = Route::from_config(&config).unwrap();
        assert_eq!(route.name(), "fleet");
        assert_eq!(route.hostname(), Some("mail.x.tld"));
        assert_eq!(
            route.transport(),
            &Transport::Bind(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
        );
        assert_eq!(route.port(), 2525);
        assert!(!route.starttls());
        assert_eq!(route.timeout(), Duration::from_secs(9));
    }

    #[test]
    fn test_builder_timeout_rounds_up() {
        let config = RouteConfig::builder("fast")
            .timeout(Duration::from_millis(500))
            .build();
        assert_eq!(config.timeout_secs, 1);
        let route = Route::from_config(&config).unwrap();
        assert_eq!(route.timeout(), Duration::from_secs(1));

        let config = RouteConfig::builder("slow")
            .timeout(Duration::from_millis(2001))
            .build();
        assert_eq!(config.timeout_secs, 3);
    }

    #[test]
    fn test_nat_translation() {
        let route = Route::from_config(
            &RouteConfig::builder("nat")
                .nat("10.0.0.5", "203.0.113.7")
                .build(),
        )
        .unwrap();
        assert_eq!(
            route.public_ip("10.0.0.5".parse().unwrap(), None),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            route.public_ip("10.0.0.6".parse().unwrap(), None),
            "10.0.0.6".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_nat_keyed_by_socks_proxy() {
        let route = Route::from_config(
            &RouteConfig::builder("proxied")
                .iface("socks5://127.0.0.1:1080")
                .nat("127.0.0.1", "203.0.113.5")
                .nat("10.9.9.9", "198.51.100.9")
                .build(),
        )
        .unwrap();
        let proxy = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let bound = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));

        assert_eq!(
            route.public_ip(bound, proxy),
            "203.0.113.5".parse::<IpAddr>().unwrap()
        );
        // A proxy without an entry falls back to the bound address.
        let other_proxy = Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        assert_eq!(
            route.public_ip("10.9.9.9".parse().unwrap(), other_proxy),
            "198.51.100.9".parse::<IpAddr>().unwrap()
        );
        assert_eq!(route.public_ip(bound, other_proxy), bound);
    }

    #[test]
    fn test_socks_iface() {
        let route = Route::from_config(
            &RouteConfig::builder("proxied")
                .iface("socks5://u:p@127.0.0.1:1080")
                .build(),
        )
        .unwrap();
        let Transport::Socks(proxy) = route.transport() else {
            panic!("expected SOCKS transport");
        };
        assert_eq!(proxy.port, 1080);
        assert!(proxy.has_credentials());
    }

    #[test]
    fn test_direct_when_iface_blank() {
        let route = Route::from_config(&RouteConfig::builder("d").iface("  ").build()).unwrap();
        assert_eq!(route.transport(), &Transport::Direct);
        assert_eq!(route.hostname(), None);
    }

    #[test]
    fn test_invalid_routes() {
        let cases = [
            RouteConfig::builder("a").stream(0).build(),
            RouteConfig::builder("b").iface("eth0").build(),
            RouteConfig::builder("c").iface("socks5://").build(),
            RouteConfig::builder("d").nat("10.0.0.1", "public").build(),
            RouteConfig::builder("e")
                .smart_host(SmartHost::new(" ", 25))
                .build(),
            RouteConfig::builder("f").timeout(Duration::ZERO).build(),
        ];
        for config in &cases {
            let err = Route::from_config(config).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{}: {err}", config.name);
        }
    }
}
