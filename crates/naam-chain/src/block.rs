//! Block encoding helpers

use crate::error::{ChainError, Result};
use crate::{DAG_CBOR_CID_CODEC, SHA2_256};
use cid::Cid as IpldCid;
use sha2::{Digest, Sha256};

/// Multihash type used for CIDs and entries
pub type Multihash = multihash::Multihash<64>;

/// Compute CID from raw bytes
///
/// Uses SHA-256 hash and DAG-CBOR codec. Assumes data is already DAG-CBOR encoded.
pub fn compute_cid(data: &[u8]) -> Result<IpldCid> {
    let mh = sha256_multihash(data)?;
    Ok(IpldCid::new_v1(DAG_CBOR_CID_CODEC, mh))
}

/// SHA-256 multihash of arbitrary bytes
pub fn sha256_multihash(data: &[u8]) -> Result<Multihash> {
    let hash = Sha256::digest(data);
    Multihash::wrap(SHA2_256, hash.as_slice()).map_err(|e| ChainError::invalid_cid(e.to_string()))
}
