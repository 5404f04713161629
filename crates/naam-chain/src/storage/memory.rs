//! In-memory block storage implementation

use crate::block::compute_cid;
use crate::error::Result;
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory block storage using BTreeMap
///
/// Useful for tests, short-lived publishers and chains that fit in memory.
/// Uses `Bytes` for cheap cloning of stored blocks.
#[derive(Debug, Clone)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<IpldCid, Bytes>>>,
}

impl MemoryBlockStore {
    /// Create new empty memory store
    pub fn new() -> Self {
        Self {
            blocks: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Create new memory store from a map of blocks
    pub fn new_from_blocks(blocks: BTreeMap<IpldCid, Bytes>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
        }
    }

    /// Get number of blocks stored
    pub fn len(&self) -> usize {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Snapshot of every stored block
    pub fn blocks(&self) -> BTreeMap<IpldCid, Bytes> {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        Ok(self
            .blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cid)
            .cloned())
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = compute_cid(data)?;
        self.blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cid)
            .or_insert_with(|| Bytes::copy_from_slice(data));
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self
            .blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(cid))
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let store = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        let mut results = Vec::with_capacity(cids.len());
        for cid in cids {
            results.push(store.get(cid).cloned());
        }
        Ok(results)
    }

    async fn apply_head(&self, _head: IpldCid) -> Result<()> {
        Ok(())
    }
}
