//! Error types for publishing, announcing and resolving

use cid::Cid as IpldCid;
use http::StatusCode;
use miette::Diagnostic;
use naam_chain::{ChainError, ChainErrorKind};
use thiserror::Error;

/// Boxed error type for transport failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Malformed configuration, reported at construction time
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// Listen address is not `host:port`
    #[error("invalid listen address `{addr}`")]
    #[diagnostic(code(naam::config::listen_addr), help("use host:port, e.g. 0.0.0.0:9999"))]
    ListenAddr {
        /// Address as configured
        addr: String,
        /// Parse failure
        #[source]
        source: std::net::AddrParseError,
    },

    /// URL does not parse
    #[error("invalid {field} `{url}`")]
    #[diagnostic(code(naam::config::url), help("use an absolute http(s) URL"))]
    Url {
        /// Which option held the URL
        field: &'static str,
        /// URL as configured
        url: String,
        /// Parse failure
        #[source]
        source: url::ParseError,
    },

    /// Publisher address is not a multiaddr
    #[error("invalid publisher address `{addr}`")]
    #[diagnostic(
        code(naam::config::publisher_addr),
        help("addresses look like /ip4/127.0.0.1/tcp/9999/http")
    )]
    PublisherAddr {
        /// Address as configured
        addr: String,
        /// Parse failure
        #[source]
        source: multiaddr::Error,
    },

    /// Signing key cannot produce a peer id
    #[error("unusable signing key")]
    #[diagnostic(code(naam::config::key))]
    Key(#[source] ChainError),
}

/// Failure to notify the indexer of a new head
#[derive(Debug, Error, Diagnostic)]
pub enum AnnounceError {
    /// Request could not be built or sent
    #[error("announce request failed")]
    #[diagnostic(
        code(naam::announce::transport),
        help("check that the indexer is reachable at the configured announce URL")
    )]
    Transport(#[source] BoxError),

    /// Indexer answered with a non-success status
    #[error("indexer rejected announce with status {status}")]
    #[diagnostic(code(naam::announce::status))]
    Status {
        /// Response status
        status: StatusCode,
        /// Response body, lossily decoded
        body: String,
    },

    /// Message could not be encoded
    #[error("failed to encode announce message")]
    #[diagnostic(code(naam::announce::encode))]
    Encode(#[from] serde_json::Error),
}

/// Publish failure
///
/// Everything but [`Announce`](PublishError::Announce) and committed
/// [`Storage`](PublishError::Storage) errors leaves the chain state exactly
/// as it was before the call.
#[derive(Debug, Error, Diagnostic)]
pub enum PublishError {
    /// Publisher configuration is invalid
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    /// Name lacks the `/ipns/` prefix or its peer id does not decode
    #[error("invalid name format")]
    #[diagnostic(code(naam::publish::invalid_name), help("names look like /ipns/<peer id>"))]
    InvalidName(#[source] ChainError),

    /// Key unusable or record/advertisement could not be serialized
    #[error("signing failed")]
    #[diagnostic(code(naam::publish::signing))]
    Signing(#[source] ChainError),

    /// Block store or chain state failure
    #[error("storage failed (committed: {committed})")]
    #[diagnostic(code(naam::publish::storage))]
    Storage {
        /// Underlying failure
        #[source]
        source: ChainError,
        /// Whether the new head had already been committed
        committed: bool,
    },

    /// The new head is committed but the indexer was not told
    #[error("unsuccessful announce of head {head} at height {height}")]
    #[diagnostic(
        code(naam::publish::announce),
        help("the publish took effect; retry with announce_head() instead of republishing")
    )]
    Announce {
        /// Committed head
        head: IpldCid,
        /// Committed height
        height: u64,
        /// Underlying failure
        #[source]
        source: AnnounceError,
    },
}

impl PublishError {
    /// Storage failure before or after the commit point
    pub fn storage(source: ChainError, committed: bool) -> Self {
        Self::Storage { source, committed }
    }

    /// Sort a chain-building failure into signing or storage
    pub(crate) fn from_chain(source: ChainError) -> Self {
        match source.kind() {
            ChainErrorKind::Crypto
            | ChainErrorKind::Serialization
            | ChainErrorKind::InvalidRecord
            | ChainErrorKind::InvalidAdvertisement => Self::Signing(source),
            _ => Self::storage(source, false),
        }
    }

    /// Whether the publish took effect despite the error
    ///
    /// When true, the chain head and height have advanced and the publish
    /// must not be repeated; at most the announce needs retrying.
    pub fn is_committed(&self) -> bool {
        match self {
            Self::Announce { .. } => true,
            Self::Storage { committed, .. } => *committed,
            _ => false,
        }
    }
}

/// Resolution failure
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    /// Name does not parse
    #[error("invalid name format")]
    #[diagnostic(code(naam::resolve::invalid_name), help("names look like /ipns/<peer id>"))]
    InvalidName(#[source] ChainError),

    /// Indexer knows no naming record for the name
    #[error("no record found for {0}")]
    #[diagnostic(code(naam::resolve::not_found))]
    NotFound(String),

    /// Request could not be built or sent
    #[error("HTTP error")]
    #[diagnostic(
        code(naam::resolve::http),
        help("check network connectivity and the configured find URL")
    )]
    Http(#[source] BoxError),

    /// Indexer answered with an unexpected status
    #[error("HTTP status {0}")]
    #[diagnostic(code(naam::resolve::http_status))]
    HttpStatus(StatusCode),

    /// Response body is not a find response
    #[error("invalid find response: {0}")]
    #[diagnostic(code(naam::resolve::invalid_response))]
    InvalidResponse(String),

    /// Metadata does not hold a decodable naming record
    #[error("invalid naming record")]
    #[diagnostic(code(naam::resolve::invalid_record))]
    InvalidRecord(#[source] ChainError),

    /// Best record has expired
    #[error("record expired at {0}")]
    #[diagnostic(code(naam::resolve::expired), help("the owner needs to republish the name"))]
    Expired(String),

    /// Best record is not signed by the name's owner
    #[error("record for {name} is signed by {signer}")]
    #[diagnostic(
        code(naam::resolve::name_mismatch),
        help("the record was published by someone who does not own the name; do not trust it")
    )]
    NameMismatch {
        /// Queried name
        name: String,
        /// Peer id of the record's key
        signer: String,
    },
}
