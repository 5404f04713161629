//! Publish mutable names through an IPNI advertisement chain
//!
//! A [`Publisher`] owns one advertisement chain. Each publish signs a naming
//! record, appends an advertisement carrying it, advances the chain head and
//! tells the indexer about the new head. A [`NameResolver`] asks the indexer
//! for the newest record under a name.
//!
//! # Example
//!
//! ```no_run
//! use naam::{Publisher, PublisherOptions};
//! use naam_chain::{MemoryBlockStore, MemoryChainState};
//!
//! # async fn example() -> miette::Result<()> {
//! let key = libp2p_identity::Keypair::generate_ed25519();
//! let publisher = Publisher::http(
//!     &PublisherOptions::default(),
//!     key,
//!     MemoryBlockStore::new(),
//!     MemoryChainState::new(),
//! )?;
//!
//! let name = publisher.name().to_string();
//! match publisher.publish("/ipfs/bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi", &name).await {
//!     Ok(published) => println!("head {} at height {}", published.head, published.height),
//!     Err(e) if e.is_committed() => publisher.announce_head().await.map(|_| ())?,
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The chain operator key signs records and advertisements alike, and nothing
//! stops it from publishing under a name it does not own. Resolvers check
//! ownership with [`ResolverOptions::validate`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod announce;
pub mod error;
pub mod http_client;
pub mod options;
pub mod publisher;
pub mod resolve;

pub use announce::{AnnounceMessage, Announcer, HttpAnnouncer};
pub use error::{AnnounceError, ConfigError, PublishError, ResolveError};
pub use http_client::HttpClient;
pub use options::{PublishOptions, PublisherConfig, PublisherOptions, ResolverOptions};
pub use publisher::{PublishStage, Published, Publisher, name_of};
pub use resolve::NameResolver;

pub use naam_chain;
