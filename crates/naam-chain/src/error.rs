//! Error types for chain operations

use std::error::Error;
use std::fmt;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for chain operations
pub type Result<T> = std::result::Result<T, ChainError>;

/// Chain operation error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct ChainError {
    kind: ChainErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for chain operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainErrorKind {
    /// Storage operation failed
    Storage,
    /// Invalid naming record
    InvalidRecord,
    /// Invalid advertisement or entries block
    InvalidAdvertisement,
    /// Invalid name or peer identity
    InvalidName,
    /// Invalid CID
    InvalidCid,
    /// Resource not found
    NotFound,
    /// Cryptographic operation failed
    Crypto,
    /// Serialization/deserialization failed
    Serialization,
    /// Chain structure does not match the recorded state
    BrokenChain,
    /// Chain state changed since it was read
    Conflict,
    /// CAR file operation failed
    Car,
    /// I/O error
    Io,
}

impl ChainError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: ChainErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &ChainErrorKind {
        &self.kind
    }

    /// Create a storage error
    pub fn storage(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(ChainErrorKind::Storage, Some(Box::new(source)))
    }

    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::new(ChainErrorKind::InvalidRecord, Some(msg.into().into()))
    }

    /// Create an invalid advertisement error
    pub fn invalid_advertisement(msg: impl Into<String>) -> Self {
        Self::new(ChainErrorKind::InvalidAdvertisement, Some(msg.into().into()))
    }

    /// Create an invalid name error
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::new(ChainErrorKind::InvalidName, None)
            .with_help("names look like /ipns/<peer id>")
            .with_context(format!("name: {}", name.into()))
    }

    /// Create an invalid CID error
    pub fn invalid_cid(msg: impl Into<String>) -> Self {
        Self::new(ChainErrorKind::InvalidCid, Some(msg.into().into()))
    }

    /// Create a not found error
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(ChainErrorKind::NotFound, None)
            .with_context(format!("{} not found: {}", resource, id))
    }

    /// Create a crypto error
    pub fn crypto(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(ChainErrorKind::Crypto, Some(Box::new(source)))
    }

    /// Create a serialization error
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(ChainErrorKind::Serialization, Some(Box::new(source)))
    }

    /// Create a broken chain error
    pub fn broken_chain(msg: impl Into<String>) -> Self {
        Self::new(ChainErrorKind::BrokenChain, Some(msg.into().into()))
            .with_help("walking PreviousID from the head must reach the root in exactly `height` steps")
    }

    /// Create a conflict error for a state that moved from `expected` to `found`
    pub fn conflict(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        Self::new(ChainErrorKind::Conflict, None)
            .with_context(format!("expected {expected}, found {found}"))
            .with_help("another publish committed first; read the state again and rebuild")
    }

    /// Create a CAR file error
    pub fn car(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(ChainErrorKind::Car, Some(Box::new(source)))
    }

    /// Create a CAR parse error (alias for car)
    pub fn car_parse(source: impl Error + Send + Sync + 'static) -> Self {
        Self::car(source).with_context("Failed to parse CAR file".to_string())
    }

    /// Create an I/O error
    pub fn io(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(ChainErrorKind::Io, Some(Box::new(source)))
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

// Internal granular errors

/// Naming record errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RecordError {
    /// Signing key could not produce a signature
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Invalid signature format
    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Record does not carry a public key
    #[error("Record has no embedded public key")]
    #[diagnostic(help("publish records with the owner's public key embedded"))]
    MissingPublicKey,

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// Embedded key does not belong to the name
    #[error("Record key belongs to {signer}, not {name}")]
    #[diagnostic(
        code(naam::record::name_mismatch),
        help("only the owner of a name can produce a valid record for it")
    )]
    NameMismatch {
        /// Peer id derived from the embedded key
        signer: String,
        /// Peer id the record claims to be for
        name: String,
    },

    /// Record validity has passed
    #[error("Record expired at {0}")]
    Expired(String),

    /// Unsupported validity type
    #[error("Unsupported validity type: {0}")]
    UnsupportedValidity(u64),

    /// Metadata does not carry a naming record
    #[error("Unexpected metadata protocol: 0x{0:x}")]
    UnexpectedProtocol(u64),

    /// Serialization failed
    #[error("Serialization failed")]
    Serialization(#[source] BoxError),
}

impl From<RecordError> for ChainError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::Signing(msg) => ChainError::new(ChainErrorKind::Crypto, Some(msg.into()))
                .with_context("signing naming record".to_string()),
            RecordError::InvalidSignature(msg) => {
                ChainError::new(ChainErrorKind::Crypto, Some(msg.into()))
                    .with_context("invalid signature format".to_string())
            }
            RecordError::SignatureVerificationFailed => {
                ChainError::new(ChainErrorKind::Crypto, None)
                    .with_context("record signature verification failed".to_string())
            }
            RecordError::InvalidKey(msg) => ChainError::new(ChainErrorKind::Crypto, Some(msg.into()))
                .with_context("invalid key format".to_string()),
            RecordError::Serialization(e) => {
                ChainError::new(ChainErrorKind::Serialization, Some(e))
            }
            other => ChainError::new(ChainErrorKind::InvalidRecord, Some(Box::new(other))),
        }
    }
}

/// Advertisement-specific errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum AdvertisementError {
    /// Signing key could not produce a signature
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Advertisement has no signature
    #[error("Advertisement is not signed")]
    Unsigned,

    /// Invalid signature envelope
    #[error("Invalid signature envelope: {0}")]
    InvalidSignature(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    #[diagnostic(
        code(naam::advertisement::signature_failed),
        help("the advertisement must be signed by the key in its signature envelope")
    )]
    SignatureVerificationFailed,

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// Entry is not a valid multihash
    #[error("Invalid entry multihash: {0}")]
    InvalidEntry(String),

    /// Serialization failed
    #[error("Serialization failed")]
    Serialization(#[source] BoxError),
}

impl From<AdvertisementError> for ChainError {
    fn from(e: AdvertisementError) -> Self {
        match e {
            AdvertisementError::Signing(msg) => {
                ChainError::new(ChainErrorKind::Crypto, Some(msg.into()))
                    .with_context("signing advertisement".to_string())
            }
            AdvertisementError::InvalidSignature(msg) => {
                ChainError::new(ChainErrorKind::Crypto, Some(msg.into()))
                    .with_context("invalid signature envelope".to_string())
            }
            AdvertisementError::SignatureVerificationFailed => {
                ChainError::new(ChainErrorKind::Crypto, None)
                    .with_context("advertisement signature verification failed".to_string())
            }
            AdvertisementError::InvalidKey(msg) => {
                ChainError::new(ChainErrorKind::Crypto, Some(msg.into()))
                    .with_context("invalid key format".to_string())
            }
            AdvertisementError::Serialization(e) => {
                ChainError::new(ChainErrorKind::Serialization, Some(e))
            }
            other => ChainError::new(ChainErrorKind::InvalidAdvertisement, Some(Box::new(other))),
        }
    }
}
