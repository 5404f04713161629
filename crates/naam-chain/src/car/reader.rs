//! CAR file reading utilities

use crate::block::compute_cid;
use crate::error::{ChainError, Result};
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarReader;
use n0_future::stream::StreamExt;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs::File;

/// Parsed CAR file data
#[derive(Debug, Clone)]
pub struct ParsedCar {
    /// The first root CID from the CAR header
    pub root: IpldCid,
    /// All blocks in the CAR file
    pub blocks: BTreeMap<IpldCid, Bytes>,
}

/// Read entire CAR file into memory
///
/// Returns BTreeMap of CID -> block data (sorted order for determinism).
pub async fn read_car(path: impl AsRef<Path>) -> Result<BTreeMap<IpldCid, Bytes>> {
    let file = File::open(path).await.map_err(ChainError::io)?;

    let reader = CarReader::new(file).await.map_err(ChainError::car)?;

    let mut blocks = BTreeMap::new();
    let stream = reader.stream();
    n0_future::pin!(stream);

    while let Some(result) = stream.next().await {
        let (cid, data) = result.map_err(ChainError::car_parse)?;
        blocks.insert(cid, Bytes::from(data));
    }

    Ok(blocks)
}

/// Read CAR file header (roots only)
pub async fn read_car_header(path: impl AsRef<Path>) -> Result<Vec<IpldCid>> {
    let file = File::open(path).await.map_err(ChainError::io)?;

    let reader = CarReader::new(file).await.map_err(ChainError::car)?;

    Ok(reader.header().roots().to_vec())
}

/// Parse CAR bytes into root and block map
///
/// For in-memory CAR data, e.g. a chain export fetched over HTTP.
pub async fn parse_car_bytes(data: &[u8]) -> Result<ParsedCar> {
    let reader = CarReader::new(data).await.map_err(ChainError::car_parse)?;

    let root = reader
        .header()
        .roots()
        .first()
        .copied()
        .ok_or_else(|| ChainError::invalid_cid("CAR file has no roots"))?;

    let mut blocks = BTreeMap::new();
    let stream = reader.stream();
    n0_future::pin!(stream);

    while let Some(result) = stream.next().await {
        let (cid, data) = result.map_err(ChainError::car_parse)?;
        blocks.insert(cid, Bytes::from(data));
    }

    Ok(ParsedCar { root, blocks })
}

/// Load an exported chain into `store`, returning its head
///
/// Every block is re-hashed before it is stored; a block whose bytes do not
/// match its CID rejects the whole import. The head must be one of the blocks.
pub async fn import_chain_car<S: BlockStore + Sync>(data: &[u8], store: &S) -> Result<IpldCid> {
    let parsed = parse_car_bytes(data).await?;
    if !parsed.blocks.contains_key(&parsed.root) {
        return Err(ChainError::not_found("chain head", parsed.root));
    }
    for (cid, bytes) in &parsed.blocks {
        if compute_cid(bytes)? != *cid {
            return Err(ChainError::invalid_cid(format!("block bytes do not hash to {cid}")));
        }
    }
    for bytes in parsed.blocks.values() {
        store.put(bytes).await?;
    }
    Ok(parsed.root)
}
