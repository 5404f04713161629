//! Naming records on an IPNI advertisement chain
//!
//! This crate provides the building blocks for publishing mutable names through
//! an indexer's advertisement chain:
//!
//! - **Naming records**: signed, versioned pointers from a name to a target path
//! - **Advertisements**: signed chain nodes linking to the previous head, carrying
//!   a naming record as metadata and an entries block keyed by the claimed name
//! - **Storage**: content-addressed block storage and the head/height chain state
//! - **CAR I/O**: export a chain, or back block storage with a CAR file
//!
//! # Design
//!
//! - Advertisements and entries blocks are immutable and addressed by CID
//! - The chain head is the only mutable cell; height advances with it
//! - The advertisement signature and the record signature are independent, so
//!   an advertisement signed by one key may carry a record for any name. Use
//!   [`verify_binding`] to check that pairing explicitly.
//!
//! # Example
//!
//! ```rust,ignore
//! use naam_chain::{AdChain, CONTEXT_ID, ChainStateStore, MemoryBlockStore, MemoryChainState, Name, NamingRecord};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let chain = AdChain::new(MemoryBlockStore::new());
//! let state = MemoryChainState::new();
//! let key = libp2p_identity::Keypair::generate_ed25519();
//! let name = Name::from_key(&key)?;
//!
//! let current = state.state().await?;
//! let record = NamingRecord::build(&key, "/ipfs/bafy...", current.height + 1, eol, ttl)?;
//! let appended = chain
//!     .append(current.head, &name, addrs, CONTEXT_ID.into(), record.to_metadata()?, &key)
//!     .await?;
//! state.set_head_and_advance_height(current, appended.head).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// Advertisement and entries block structures
pub mod advertisement;
/// Block encoding helpers
pub mod block;
/// CAR (Content Addressable aRchive) utilities
pub mod car;
/// Advertisement chain construction and traversal
pub mod chain;
pub mod error;
pub(crate) mod fs;
/// Signed chain head
pub mod head;
/// Names, peer identities and signing keys
pub mod identity;
/// Signed naming records
pub mod record;
pub(crate) mod serde_bytes_helper;
/// Chain head and height storage
pub mod state;
/// Block storage abstraction
pub mod storage;

pub use advertisement::{Advertisement, EntryChunk, verify_binding};
pub use chain::{AdChain, Appended};
pub use error::{ChainError, ChainErrorKind, Result};
pub use head::SignedHead;
pub use identity::{Name, SigningKey};
pub use record::NamingRecord;
pub use state::{ChainState, ChainStateStore, FileChainState, MemoryChainState};
pub use storage::{BlockStore, FileBlockStore, MemoryBlockStore};

/// DAG-CBOR codec identifier for CIDs (0x71)
pub const DAG_CBOR_CID_CODEC: u64 = 0x71;

/// SHA2-256 multihash code (0x12)
pub const SHA2_256: u64 = 0x12;

/// libp2p-key codec identifier, used for peer ids in CID form (0x72)
pub const LIBP2P_KEY_CODEC: u64 = 0x72;

/// Context ID shared by every advertisement carrying a naming record
pub const CONTEXT_ID: &[u8] = b"/ipni/naam";

/// Metadata protocol ID for naming records (multicodec `ipns-record`)
pub const METADATA_PROTOCOL_ID: u64 = 0x0300;
