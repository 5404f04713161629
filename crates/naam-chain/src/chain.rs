//! Advertisement chain construction and traversal
//!
//! Appending stores an entries block and a signed advertisement linking back
//! to the previous head. Nothing here touches the chain state; the caller
//! decides when the new head becomes current.

use crate::advertisement::{Advertisement, EntryChunk};
use crate::error::{ChainError, Result};
use crate::identity::{Name, SigningKey};
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::SmolStr;
use std::collections::BTreeSet;

/// Result of appending one advertisement
#[derive(Debug, Clone)]
pub struct Appended {
    /// CID of the new advertisement, the prospective head
    pub head: IpldCid,
    /// CID of its entries block
    pub entries: IpldCid,
    /// The signed advertisement
    pub advertisement: Advertisement,
}

/// Advertisement chain over a block store
#[derive(Debug, Clone)]
pub struct AdChain<S: BlockStore> {
    storage: S,
}

impl<S: BlockStore + Sync + 'static> AdChain<S> {
    /// Create a chain view over `storage`
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Get reference to the block store
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Append an advertisement after `previous`
    ///
    /// The entries block indexes `claimed`, and the advertisement names it as
    /// provider, but the signature is made with `key`. Nothing checks that
    /// `key` owns `claimed`.
    ///
    /// If storing the advertisement fails, the entries block stays behind as
    /// an orphan. A retry with the same inputs reuses it.
    pub async fn append(
        &self,
        previous: Option<IpldCid>,
        claimed: &Name,
        addresses: Vec<SmolStr>,
        context_id: Bytes,
        metadata: Bytes,
        key: &impl SigningKey,
    ) -> Result<Appended> {
        let chunk = EntryChunk::for_name(claimed)?;
        let entries = self.storage.put(&chunk.to_cbor()?).await?;

        let advertisement = Advertisement::new_unsigned(
            previous,
            claimed.peer_id(),
            addresses,
            entries,
            context_id,
            metadata,
        )
        .sign(key)?;
        let head = self.storage.put(&advertisement.to_cbor()?).await?;

        Ok(Appended {
            head,
            entries,
            advertisement,
        })
    }

    /// Load an advertisement by CID
    pub async fn load(&self, cid: &IpldCid) -> Result<Advertisement> {
        let bytes = self
            .storage
            .get(cid)
            .await?
            .ok_or_else(|| ChainError::not_found("advertisement", cid))?;
        Advertisement::from_cbor(&bytes)
    }

    /// Load an entries block by CID
    pub async fn load_entries(&self, cid: &IpldCid) -> Result<EntryChunk> {
        let bytes = self
            .storage
            .get(cid)
            .await?
            .ok_or_else(|| ChainError::not_found("entries block", cid))?;
        EntryChunk::from_cbor(&bytes)
    }

    /// Walk the chain from `head` back to the root
    ///
    /// Returns advertisements newest first. An empty chain (`None`) yields an
    /// empty list.
    pub async fn walk(&self, head: Option<IpldCid>) -> Result<Vec<(IpldCid, Advertisement)>> {
        let mut seen = BTreeSet::new();
        let mut nodes = Vec::new();
        let mut next = head;

        while let Some(cid) = next {
            if !seen.insert(cid) {
                return Err(ChainError::broken_chain(format!("cycle at {cid}")));
            }
            let advertisement = self.load(&cid).await.map_err(|e| {
                if *e.kind() == crate::ChainErrorKind::NotFound {
                    ChainError::broken_chain(format!("missing advertisement {cid}"))
                } else {
                    e
                }
            })?;
            next = advertisement.previous_id;
            nodes.push((cid, advertisement));
        }

        Ok(nodes)
    }

    /// Check a head/height pair against the stored chain
    ///
    /// Walking from `head` must take exactly `height` steps to reach the root,
    /// every advertisement signature must verify, and every entries block must
    /// be present.
    pub async fn verify(&self, head: Option<IpldCid>, height: u64) -> Result<()> {
        let nodes = self.walk(head).await?;
        if nodes.len() as u64 != height {
            return Err(ChainError::broken_chain(format!(
                "walked {} advertisements, height is {height}",
                nodes.len()
            )));
        }

        for (cid, advertisement) in &nodes {
            advertisement
                .verify_signature()
                .map_err(|e| ChainError::from(e).with_context(format!("advertisement {cid}")))?;
            self.load_entries(advertisement.entries()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockStore;
    use crate::{CONTEXT_ID, ChainErrorKind, NamingRecord};
    use chrono::{TimeDelta, Utc};
    use libp2p_identity::Keypair;
    use std::time::Duration;

    fn metadata(key: &Keypair, value: &str, seq: u64) -> Bytes {
        NamingRecord::build(key, value, seq, Utc::now() + TimeDelta::hours(24), Duration::ZERO)
            .unwrap()
            .to_metadata()
            .unwrap()
    }

    async fn append(
        chain: &AdChain<MemoryBlockStore>,
        previous: Option<IpldCid>,
        key: &Keypair,
        name: &Name,
        seq: u64,
    ) -> Appended {
        chain
            .append(
                previous,
                name,
                vec!["/ip4/127.0.0.1/tcp/9999/http".into()],
                Bytes::from_static(CONTEXT_ID),
                metadata(key, &format!("/ipfs/{seq}"), seq),
                key,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_stores_both_blocks() {
        let store = MemoryBlockStore::new();
        let chain = AdChain::new(store.clone());
        let key = Keypair::generate_ed25519();
        let name = Name::from_key(&key).unwrap();

        let appended = append(&chain, None, &key, &name, 1).await;

        assert_eq!(store.len(), 2);
        assert_eq!(chain.load(&appended.head).await.unwrap(), appended.advertisement);
        let entries = chain.load_entries(&appended.entries).await.unwrap();
        assert!(entries.indexes(&name).unwrap());
        assert_eq!(appended.head, appended.advertisement.to_cid().unwrap());
    }

    #[tokio::test]
    async fn test_walk_visits_newest_first() {
        let chain = AdChain::new(MemoryBlockStore::new());
        let key = Keypair::generate_ed25519();
        let name = Name::from_key(&key).unwrap();

        let h1 = append(&chain, None, &key, &name, 1).await.head;
        let h2 = append(&chain, Some(h1), &key, &name, 2).await.head;
        let h3 = append(&chain, Some(h2), &key, &name, 3).await.head;

        let cids: Vec<_> = chain
            .walk(Some(h3))
            .await
            .unwrap()
            .into_iter()
            .map(|(cid, _)| cid)
            .collect();
        assert_eq!(cids, vec![h3, h2, h1]);

        assert!(chain.walk(None).await.unwrap().is_empty());
        chain.verify(Some(h3), 3).await.unwrap();
        chain.verify(None, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_height() {
        let chain = AdChain::new(MemoryBlockStore::new());
        let key = Keypair::generate_ed25519();
        let name = Name::from_key(&key).unwrap();

        let h1 = append(&chain, None, &key, &name, 1).await.head;
        let h2 = append(&chain, Some(h1), &key, &name, 2).await.head;

        for height in [0, 1, 3] {
            let err = chain.verify(Some(h2), height).await.unwrap_err();
            assert_eq!(*err.kind(), ChainErrorKind::BrokenChain);
        }
    }

    #[tokio::test]
    async fn test_walk_reports_missing_link() {
        let chain = AdChain::new(MemoryBlockStore::new());
        let key = Keypair::generate_ed25519();
        let name = Name::from_key(&key).unwrap();

        let dangling = crate::block::compute_cid(b"never stored").unwrap();
        let head = append(&chain, Some(dangling), &key, &name, 2).await.head;

        let err = chain.walk(Some(head)).await.unwrap_err();
        assert_eq!(*err.kind(), ChainErrorKind::BrokenChain);
    }

    #[tokio::test]
    async fn test_load_unknown_cid_is_not_found() {
        let chain = AdChain::new(MemoryBlockStore::new());
        let cid = crate::block::compute_cid(b"nothing").unwrap();

        let err = chain.load(&cid).await.unwrap_err();
        assert_eq!(*err.kind(), ChainErrorKind::NotFound);
    }
}
