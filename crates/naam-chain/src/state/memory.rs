//! In-memory chain state

use super::{
    ChainState, ChainStateStore, HEAD_KEY, HEIGHT_KEY, decode_head, decode_height, encode_height,
    ensure_unchanged,
};
use crate::error::Result;
use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Chain state held in a key/value map
///
/// Head and height are compared and written under a single lock, so the pair
/// always changes as a unit and clones never interleave commits.
#[derive(Debug, Clone, Default)]
pub struct MemoryChainState {
    values: Arc<RwLock<BTreeMap<SmolStr, Bytes>>>,
}

impl MemoryChainState {
    /// Create new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored value for a key
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn read(values: &BTreeMap<SmolStr, Bytes>) -> Result<ChainState> {
        let head = values.get(HEAD_KEY).map(|b| decode_head(b)).transpose()?;
        let height = values
            .get(HEIGHT_KEY)
            .map(|b| decode_height(b))
            .transpose()?
            .unwrap_or(0);
        Ok(ChainState { head, height })
    }
}

impl ChainStateStore for MemoryChainState {
    async fn head(&self) -> Result<Option<IpldCid>> {
        Ok(self.state().await?.head)
    }

    async fn height(&self) -> Result<u64> {
        Ok(self.state().await?.height)
    }

    async fn state(&self) -> Result<ChainState> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Self::read(&values)
    }

    async fn set_head_and_advance_height(
        &self,
        expected: ChainState,
        head: IpldCid,
    ) -> Result<ChainState> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let current = Self::read(&values)?;
        ensure_unchanged(&expected, &current)?;
        let next = current.advance(head);

        values.insert(HEAD_KEY.into(), Bytes::from(head.to_bytes()));
        values.insert(HEIGHT_KEY.into(), Bytes::from(encode_height(next.height)));
        Ok(next)
    }
}
