//! Publisher and resolver configuration
//!
//! Options hold what a user types: strings and durations. [`PublisherOptions::validate`]
//! turns them into a [`PublisherConfig`] of parsed values, so a malformed
//! address fails once at construction instead of on every publish.

use crate::error::ConfigError;
use bon::Builder;
use chrono::{DateTime, Utc};
use multiaddr::{Multiaddr, Protocol};
use smol_str::SmolStr;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Default address the chain is served on
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9999";

/// Default indexer ingest endpoint for announcements
pub const DEFAULT_ANNOUNCE_URL: &str = "http://localhost:3001";

/// Default indexer find endpoint for resolution
pub const DEFAULT_FIND_URL: &str = "http://localhost:3000";

/// How long a published record stays valid unless overridden
pub const DEFAULT_RECORD_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Publisher options.
///
/// - `listen_addr`: `host:port` the chain is served on.
/// - `announce_url`: base URL of the indexer's ingest API; announcements go
///   to `{announce_url}/announce`.
/// - `publisher_addrs`: multiaddrs written into every advertisement and
///   announcement. Empty means `/ip4/<listen ip>/tcp/<listen port>/http`, or
///   `/dns4/localhost/tcp/<listen port>/http` when listening on every
///   interface.
/// - `record_lifetime`: end-of-life offset from the publish time.
/// - `record_ttl`: TTL written into records.
#[derive(Debug, Clone, Builder)]
#[builder(start_fn = new)]
pub struct PublisherOptions {
    /// Address the chain is served on
    #[builder(into, default = DEFAULT_LISTEN_ADDR.to_string())]
    pub listen_addr: String,
    /// Indexer ingest base URL
    #[builder(into, default = DEFAULT_ANNOUNCE_URL.to_string())]
    pub announce_url: String,
    /// Addresses to advertise, derived from `listen_addr` when empty
    #[builder(default)]
    pub publisher_addrs: Vec<String>,
    /// Record validity window
    #[builder(default = DEFAULT_RECORD_LIFETIME)]
    pub record_lifetime: Duration,
    /// Record TTL
    #[builder(default = Duration::ZERO)]
    pub record_ttl: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self::new().build()
    }
}

impl PublisherOptions {
    /// Parse every option, failing on the first malformed one
    pub fn validate(&self) -> Result<PublisherConfig, ConfigError> {
        let listen_addr: SocketAddr =
            self.listen_addr
                .parse()
                .map_err(|source| ConfigError::ListenAddr {
                    addr: self.listen_addr.clone(),
                    source,
                })?;

        let announce_url = Url::parse(&self.announce_url).map_err(|source| ConfigError::Url {
            field: "announce URL",
            url: self.announce_url.clone(),
            source,
        })?;

        let publisher_addrs = if self.publisher_addrs.is_empty() {
            vec![default_publisher_addr(listen_addr)]
        } else {
            self.publisher_addrs
                .iter()
                .map(|addr| {
                    addr.parse::<Multiaddr>()
                        .map_err(|source| ConfigError::PublisherAddr {
                            addr: addr.clone(),
                            source,
                        })
                })
                .collect::<Result<_, _>>()?
        };

        Ok(PublisherConfig {
            listen_addr,
            announce_url,
            publisher_addrs,
            record_lifetime: self.record_lifetime,
            record_ttl: self.record_ttl,
        })
    }
}

/// `/ip4/<ip>/tcp/<port>/http` (or `/ip6/...`) for a socket address
pub fn http_multiaddr(addr: SocketAddr) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::from(addr.ip()))
        .with(Protocol::Tcp(addr.port()))
        .with(Protocol::Http)
}

/// Address advertised for `listen_addr` when none is configured
///
/// An unspecified IP is not dialable, so it becomes `localhost`.
pub fn default_publisher_addr(listen_addr: SocketAddr) -> Multiaddr {
    if listen_addr.ip().is_unspecified() {
        Multiaddr::empty()
            .with(Protocol::Dns4("localhost".into()))
            .with(Protocol::Tcp(listen_addr.port()))
            .with(Protocol::Http)
    } else {
        http_multiaddr(listen_addr)
    }
}

/// Validated publisher configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Address the chain is served on
    pub listen_addr: SocketAddr,
    /// Indexer ingest base URL
    pub announce_url: Url,
    /// Addresses written into advertisements and announcements
    pub publisher_addrs: Vec<Multiaddr>,
    /// Record validity window
    pub record_lifetime: Duration,
    /// Record TTL
    pub record_ttl: Duration,
}

impl PublisherConfig {
    /// Publisher addresses in advertisement form
    pub fn ad_addresses(&self) -> Vec<SmolStr> {
        self.publisher_addrs
            .iter()
            .map(|addr| SmolStr::new(addr.to_string()))
            .collect()
    }
}

/// Per-publish overrides
#[derive(Debug, Clone, Default, Builder)]
#[builder(start_fn = new)]
pub struct PublishOptions {
    /// Absolute end-of-life, instead of now + `record_lifetime`
    pub eol: Option<DateTime<Utc>>,
    /// TTL, instead of `record_ttl`
    pub ttl: Option<Duration>,
}

/// Resolver options.
///
/// - `find_url`: base URL of the indexer's find API.
/// - `validate`: if true (default), the chosen record must be signed by the
///   owner of the queried name and unexpired.
#[derive(Debug, Clone, Builder)]
#[builder(start_fn = new)]
pub struct ResolverOptions {
    /// Indexer find base URL
    #[builder(into, default = DEFAULT_FIND_URL.to_string())]
    pub find_url: String,
    /// Check the record against the queried name
    #[builder(default = true)]
    pub validate: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::new().build()
    }
}
