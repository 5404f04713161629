//! CAR file writing utilities
//!
//! Provides functions for writing blocks to CAR (Content Addressable aRchive) files.

use crate::chain::AdChain;
use crate::error::{ChainError, Result};
use crate::fs::replace_file;
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarWriter;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::fs::File;

/// Encode blocks as CAR bytes
///
/// Blocks are written in sorted CID order (BTreeMap) for determinism.
pub async fn encode_car(roots: Vec<IpldCid>, blocks: BTreeMap<IpldCid, Bytes>) -> Result<Vec<u8>> {
    let header = iroh_car::CarHeader::new_v1(roots);
    let mut writer = CarWriter::new(header, Vec::new());

    for (cid, data) in blocks {
        writer
            .write(cid, data.as_ref())
            .await
            .map_err(ChainError::car)?;
    }

    writer.finish().await.map_err(ChainError::car)
}

/// Write blocks to CAR file
///
/// Roots should contain the chain head.
///
/// The file at `path` is replaced in one rename, so a failed or dropped
/// write never truncates it.
pub async fn write_car(
    path: impl AsRef<Path>,
    roots: Vec<IpldCid>,
    blocks: BTreeMap<IpldCid, Bytes>,
) -> Result<()> {
    let bytes = encode_car(roots, blocks).await?;
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || {
        replace_file(&path, &bytes)
            .map_err(|e| ChainError::io(e).with_context(format!("replacing {}", path.display())))
    })
    .await
    .map_err(ChainError::io)?
}

/// Write every block reachable from `head` to a CAR file
///
/// Writes advertisement blocks newest first, each followed by its entries
/// block unless an earlier advertisement already shared it. The head is the
/// single root.
pub async fn export_chain_car<S: BlockStore + Sync + 'static>(
    path: impl AsRef<Path>,
    storage: &S,
    head: IpldCid,
) -> Result<()> {
    let chain = AdChain::new(storage.clone());
    let nodes = chain.walk(Some(head)).await?;

    let file = File::create(path).await.map_err(ChainError::io)?;
    let header = iroh_car::CarHeader::new_v1(vec![head]);
    let mut writer = CarWriter::new(header, file);
    let mut written_entries = BTreeSet::new();

    for (cid, advertisement) in nodes {
        let ad_bytes = storage
            .get(&cid)
            .await?
            .ok_or_else(|| ChainError::not_found("advertisement", cid))?;
        writer
            .write(cid, &ad_bytes)
            .await
            .map_err(ChainError::car)?;

        let entries = *advertisement.entries();
        if !written_entries.insert(entries) {
            continue;
        }
        let entries_bytes = storage
            .get(&entries)
            .await?
            .ok_or_else(|| ChainError::not_found("entries block", entries))?;
        writer
            .write(entries, &entries_bytes)
            .await
            .map_err(ChainError::car)?;
    }

    writer.finish().await.map_err(ChainError::car)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::reader::{read_car, read_car_header};
    use crate::identity::Name;
    use crate::storage::memory::MemoryBlockStore;
    use crate::{CONTEXT_ID, NamingRecord};
    use chrono::{TimeDelta, Utc};
    use libp2p_identity::Keypair;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_write_car_with_blocks() {
        let temp_file = NamedTempFile::new().unwrap();

        let data1 = Bytes::from_static(&[1, 2, 3]);
        let data2 = Bytes::from_static(&[4, 5, 6]);
        let cid1 = crate::block::compute_cid(&data1).unwrap();
        let cid2 = crate::block::compute_cid(&data2).unwrap();

        let mut blocks = BTreeMap::new();
        blocks.insert(cid1, data1.clone());
        blocks.insert(cid2, data2.clone());

        write_car(temp_file.path(), vec![cid1], blocks)
            .await
            .unwrap();

        // Read back and verify
        let read_blocks = read_car(temp_file.path()).await.unwrap();
        assert_eq!(read_blocks.len(), 2);
        assert_eq!(read_blocks.get(&cid1).unwrap(), &data1);
        assert_eq!(read_blocks.get(&cid2).unwrap(), &data2);
    }

    #[tokio::test]
    async fn test_failed_rewrite_keeps_existing_car() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain.car");

        let data = Bytes::from_static(b"kept");
        let cid = crate::block::compute_cid(&data).unwrap();
        write_car(&path, vec![cid], BTreeMap::from([(cid, data.clone())]))
            .await
            .unwrap();
        let written = std::fs::read(&path).unwrap();

        // A directory in place of the temp file makes the rewrite fail
        std::fs::create_dir(crate::fs::temp_path(&path)).unwrap();
        assert!(write_car(&path, vec![], BTreeMap::new()).await.is_err());

        assert_eq!(std::fs::read(&path).unwrap(), written);
        assert_eq!(read_car(&path).await.unwrap().get(&cid), Some(&data));
    }

    #[tokio::test]
    async fn test_export_chain_to_car() {
        let storage = MemoryBlockStore::new();
        let chain = AdChain::new(storage.clone());
        let key = Keypair::generate_ed25519();
        let name = Name::from_key(&key).unwrap();

        let mut head = None;
        for seq in 1..=3u64 {
            let record = NamingRecord::build(
                &key,
                format!("/ipfs/{seq}"),
                seq,
                Utc::now() + TimeDelta::hours(1),
                Duration::ZERO,
            )
            .unwrap();
            let appended = chain
                .append(
                    head,
                    &name,
                    vec![],
                    Bytes::from_static(CONTEXT_ID),
                    record.to_metadata().unwrap(),
                    &key,
                )
                .await
                .unwrap();
            head = Some(appended.head);
        }
        let head = head.unwrap();

        // An unrelated block is left out of the export
        storage.put(b"unrelated").await.unwrap();

        let temp_file = NamedTempFile::new().unwrap();
        export_chain_car(temp_file.path(), &storage, head)
            .await
            .unwrap();

        assert_eq!(read_car_header(temp_file.path()).await.unwrap(), vec![head]);

        // Every advertisement shares one entries block, since the name never changes
        let blocks = read_car(temp_file.path()).await.unwrap();
        assert_eq!(blocks.len(), 4);

        let imported = AdChain::new(MemoryBlockStore::new_from_blocks(blocks));
        imported.verify(Some(head), 3).await.unwrap();
    }
}
