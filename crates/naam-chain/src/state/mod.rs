//! Chain head and height storage
//!
//! The head is the only mutable cell of a chain. It is stored next to the
//! height under two fixed keys: `headAdCid` holds the raw CID bytes and `height`
//! holds an unsigned varint. Missing keys mean "no chain yet".
//!
//! Commits are compare-and-set: a writer names the state it built on, and the
//! commit fails with [`ChainErrorKind::Conflict`] if another writer got there
//! first. Any number of publishers may share one store.
//!
//! [`ChainErrorKind::Conflict`]: crate::ChainErrorKind::Conflict

use crate::error::{ChainError, Result};
use cid::Cid as IpldCid;
use std::fmt;

/// Key under which the head CID is stored
pub const HEAD_KEY: &str = "headAdCid";

/// Key under which the height is stored
pub const HEIGHT_KEY: &str = "height";

/// Snapshot of a chain's head and height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainState {
    /// Latest advertisement, `None` before the first publish
    pub head: Option<IpldCid>,
    /// Number of advertisements published so far
    pub height: u64,
}

impl ChainState {
    /// State after appending `head` to this one
    pub fn advance(&self, head: IpldCid) -> Self {
        Self {
            head: Some(head),
            height: self.height + 1,
        }
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.head {
            Some(head) => write!(f, "head {head} at height {}", self.height),
            None => write!(f, "empty chain at height {}", self.height),
        }
    }
}

/// Async chain state storage trait
///
/// Head and height change together. [`set_head_and_advance_height`] must never
/// leave a new head paired with the old height (or the reverse), whether it
/// succeeds, fails, or is dropped part way.
///
/// Clone is required so the publisher and HTTP server can share state.
///
/// [`set_head_and_advance_height`]: ChainStateStore::set_head_and_advance_height
#[trait_variant::make(Send)]
pub trait ChainStateStore: Clone {
    /// Current head, `None` if nothing has been published
    async fn head(&self) -> Result<Option<IpldCid>>;

    /// Current height, 0 if nothing has been published
    async fn height(&self) -> Result<u64>;

    /// Head and height read together
    async fn state(&self) -> Result<ChainState>;

    /// Set the head and increment the height by one, if the stored state is
    /// still `expected`
    ///
    /// Returns the new state. Fails with [`ChainErrorKind::Conflict`] and
    /// leaves the store untouched when the stored state differs.
    ///
    /// [`ChainErrorKind::Conflict`]: crate::ChainErrorKind::Conflict
    async fn set_head_and_advance_height(
        &self,
        expected: ChainState,
        head: IpldCid,
    ) -> Result<ChainState>;
}

/// Encode a height as an unsigned varint
pub fn encode_height(height: u64) -> Vec<u8> {
    let mut buf = unsigned_varint::encode::u64_buffer();
    unsigned_varint::encode::u64(height, &mut buf).to_vec()
}

/// Decode a stored height
pub fn decode_height(bytes: &[u8]) -> Result<u64> {
    let (height, rest) = unsigned_varint::decode::u64(bytes).map_err(ChainError::serialization)?;
    if !rest.is_empty() {
        return Err(ChainError::serialization(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "trailing bytes after height",
        ))
        .with_context(HEIGHT_KEY));
    }
    Ok(height)
}

/// Decode a stored head
pub fn decode_head(bytes: &[u8]) -> Result<IpldCid> {
    IpldCid::try_from(bytes)
        .map_err(|e| ChainError::invalid_cid(e.to_string()).with_context(HEAD_KEY))
}

/// Fail with a conflict unless `found` is `expected`
pub(crate) fn ensure_unchanged(expected: &ChainState, found: &ChainState) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(ChainError::conflict(expected, found))
    }
}

pub mod file;
pub mod memory;

pub use file::FileChainState;
pub use memory::MemoryChainState;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_height_encoding_is_varint() {
        assert_eq!(encode_height(0), vec![0x00]);
        assert_eq!(encode_height(1), vec![0x01]);
        assert_eq!(encode_height(300), vec![0xac, 0x02]);

        for h in [0, 1, 127, 128, 300, u32::MAX as u64 + 1, u64::MAX] {
            assert_eq!(decode_height(&encode_height(h)).unwrap(), h);
        }
    }

    #[test]
    fn test_decode_height_rejects_garbage() {
        assert!(decode_height(&[]).is_err());
        assert!(decode_height(&[0x80]).is_err());
        assert!(decode_height(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_decode_head_rejects_garbage() {
        let err = decode_head(b"not a cid").unwrap_err();
        assert_eq!(*err.kind(), crate::ChainErrorKind::InvalidCid);
    }

    #[test]
    fn test_advance() {
        let cid = crate::block::compute_cid(b"ad").unwrap();
        let next = ChainState::default().advance(cid);
        assert_eq!(next, ChainState { head: Some(cid), height: 1 });
        assert_eq!(
            next.to_string(),
            format!("head {cid} at height 1")
        );
        assert_eq!(ChainState::default().to_string(), "empty chain at height 0");
    }
}
