//! Block storage abstraction for advertisements and entries blocks

use crate::error::Result;
use bytes::Bytes;
use cid::Cid as IpldCid;

/// Async block storage trait
///
/// Provides CID-keyed storage for advertisement and entries blocks.
/// Implementations might use:
/// - In-memory map ([`MemoryBlockStore`])
/// - CAR file ([`FileBlockStore`])
/// - SQLite/RocksDB (user-provided)
///
/// Blocks are immutable: a CID always names the same bytes, so writing a block
/// that is already present is a no-op rather than an update.
///
/// Clone is required so the chain builder and HTTP server can share storage.
///
/// # Example
///
/// ```rust,ignore
/// use naam_chain::storage::{BlockStore, MemoryBlockStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryBlockStore::new();
///
/// let cid = storage.put(b"hello world").await?;
/// assert_eq!(storage.put(b"hello world").await?, cid);
///
/// if let Some(retrieved) = storage.get(&cid).await? {
///     assert_eq!(retrieved.as_ref(), b"hello world");
/// }
/// # Ok(())
/// # }
/// ```
#[trait_variant::make(Send)]
pub trait BlockStore: Clone {
    /// Get a block by CID
    ///
    /// Returns `None` if the block is not found.
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>>;

    /// Put a block, return its CID
    ///
    /// The CID is calculated from the data using SHA-256 hash and DAG-CBOR codec.
    /// The same data always produces the same CID, and storing it twice keeps a
    /// single copy.
    async fn put(&self, data: &[u8]) -> Result<IpldCid>;

    /// Check if a block exists without retrieving it
    async fn has(&self, cid: &IpldCid) -> Result<bool>;

    /// Get multiple blocks at once
    ///
    /// Returns a vec of the same length as the input, with `None` for missing blocks.
    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>>;

    /// Make the blocks behind a new head durable
    ///
    /// Called after a new advertisement and its entries block are stored and
    /// before the chain state moves to `head`. Stores that keep a root (like a
    /// CAR file) record `head` as that root.
    async fn apply_head(&self, head: IpldCid) -> Result<()>;
}

pub mod file;
pub mod memory;

pub use file::FileBlockStore;
pub use memory::MemoryBlockStore;
