//! DNS resolution for direct delivery.
//!
//! MX lookup with the implicit-MX rule of RFC 5321 section 5.1, and reverse
//! lookup for HELO name discovery.

use crate::error::{Error, Result};
use hickory_resolver::{
    TokioResolver, config::ResolverConfig, name_server::TokioConnectionProvider,
};
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use tracing::{debug, warn};

/// A mail exchanger to try, in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailServer {
    /// Hostname or IP literal, without a trailing dot.
    pub host: String,
    /// MX preference (lower is tried first). 0 for an implicit MX.
    pub preference: u16,
    /// Port to connect to.
    pub port: u16,
}

impl MailServer {
    /// Creates a mail server entry.
    #[must_use]
    pub fn new(host: impl Into<String>, preference: u16, port: u16) -> Self {
        Self {
            host: host.into(),
            preference,
            port,
        }
    }
}

/// DNS lookups needed for direct delivery and HELO discovery.
pub trait Resolve: Send + Sync {
    /// Returns the mail exchangers for `domain`, sorted by preference, each
    /// with `port` as its destination port.
    ///
    /// A domain without MX records is its own implicit MX.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolution`] if the domain does not exist or the
    /// lookup fails.
    fn mail_servers<'a>(
        &'a self,
        domain: &'a str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MailServer>>> + Send + 'a>>;

    /// Returns the first PTR name for `ip`, without a trailing dot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolution`] if the lookup fails for a reason other
    /// than an empty answer.
    fn reverse<'a>(
        &'a self,
        ip: IpAddr,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;
}

/// Async DNS resolver backed by hickory.
#[derive(Debug)]
pub struct Resolver {
    inner: TokioResolver,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Creates a resolver from the system configuration, falling back to
    /// the resolver library's default upstreams if it cannot be read.
    #[must_use]
    pub fn new() -> Self {
        let inner = match TokioResolver::builder(TokioConnectionProvider::default()) {
            Ok(builder) => builder.build(),
            Err(err) => {
                warn!(error = %err, "system DNS configuration unavailable, using defaults");
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };
        Self { inner }
    }
}

impl Resolve for Resolver {
    fn mail_servers<'a>(
        &'a self,
        domain: &'a str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MailServer>>> + Send + 'a>> {
        Box::pin(async move {
            debug!(domain, "looking up MX");
            match self.inner.mx_lookup(domain).await {
                Ok(lookup) => {
                    let mut servers: Vec<MailServer> = lookup
                        .iter()
                        .filter_map(|mx| {
                            let host = relative_name(&mx.exchange().to_utf8())?;
                            Some(MailServer::new(host, mx.preference(), port))
                        })
                        .collect();

                    if servers.is_empty() {
                        return Ok(vec![MailServer::new(domain, 0, port)]);
                    }
                    servers.sort_by_key(|server| server.preference);
                    debug!(domain, count = servers.len(), "MX resolved");
                    Ok(servers)
                }
                Err(err) if err.is_nx_domain() => {
                    Err(Error::Resolution(format!("domain {domain} does not exist")))
                }
                Err(err) if err.is_no_records_found() => {
                    debug!(domain, "no MX records, using implicit MX");
                    Ok(vec![MailServer::new(domain, 0, port)])
                }
                Err(err) => Err(Error::Resolution(format!(
                    "MX lookup for {domain} failed: {err}"
                ))),
            }
        })
    }

    fn reverse<'a>(
        &'a self,
        ip: IpAddr,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            match self.inner.reverse_lookup(ip).await {
                Ok(lookup) => Ok(lookup
                    .iter()
                    .find_map(|ptr| relative_name(&ptr.to_string()))),
                Err(err) if err.is_no_records_found() => Ok(None),
                Err(err) => Err(Error::Resolution(format!(
                    "reverse lookup of {ip} failed: {err}"
                ))),
            }
        })
    }
}

/// Strips the root label from a DNS name; `None` for the root itself.
fn relative_name(name: &str) -> Option<String> {
    let name = name.trim_end_matches('.');
    (!name.is_empty()).then(|| name.to_string())
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
    #[ignore = "Requires network access"]
    async fn test_mx_lookup_sorted() {
        let resolver = Resolver::new();
        let servers = resolver.mail_servers("gmail.com", 25).await.unwrap();

        assert!(!servers.is_empty());
        assert!(servers.iter().all(|s| s.port == 25 && !s.host.ends_with('.')));
        assert!(servers.windows(2).all(|w| w[0].preference <= w[1].preference));
    }

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn test_nonexistent_domain() {
        let resolver = Resolver::new();
        let err = resolver
            .mail_servers("does-not-exist.invalid", 25)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("421 "));
        assert!(err.is_transient());
    }

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn test_reverse_lookup() {
        let resolver = Resolver::new();
        let name = resolver.reverse("8.8.8.8".parse().unwrap()).await.unwrap();
        assert_eq!(name.as_deref(), Some("dns.google"));
    }

    #[test]
    fn test_relative_name() {
        assert_eq!(relative_name("mx1.y.tld.").as_deref(), Some("mx1.y.tld"));
        assert_eq!(relative_name("mx1.y.tld").as_deref(), Some("mx1.y.tld"));
        assert_eq!(relative_name("."), None);
        assert_eq!(relative_name(""), None);
    }

    #[test]
    fn test_mail_server_new() {
        let server = MailServer::new("mx1.y.tld", 10, 25);
        assert_eq!(server.host, "mx1.y.tld");
        assert_eq!(server.preference, 10);
    }
}
