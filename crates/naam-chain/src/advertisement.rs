//! Advertisement and entries block structures
//!
//! An advertisement is one node of the chain. It links to the previous head,
//! names the claimed provider, and carries a naming record as metadata. It is
//! signed by the chain operator, who need not own the claimed name. Its entries
//! block lists the multihash under which the record is indexed.

use crate::block::{Multihash, compute_cid};
use crate::error::{AdvertisementError, ChainError, RecordError, Result};
use crate::identity::{Name, SigningKey};
use crate::record::NamingRecord;
use crate::{CONTEXT_ID, serde_bytes_helper};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cid::Cid as IpldCid;
use libp2p_identity::{PeerId, PublicKey};
use serde_bytes::ByteBuf;
use smol_str::SmolStr;

/// Domain separation prefix for advertisement signatures
const SIGNATURE_PREFIX: &[u8] = b"naam-advertisement:";

/// Entries block: the multihashes an advertisement announces
///
/// Naming advertisements always carry exactly one entry and no `Next` link.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EntryChunk {
    /// Raw multihash bytes
    #[serde(rename = "Entries")]
    pub entries: Vec<ByteBuf>,

    /// Next chunk, for entry lists spanning several blocks
    #[serde(rename = "Next")]
    pub next: Option<IpldCid>,
}

impl EntryChunk {
    /// Entries block indexing a single name
    pub fn for_name(name: &Name) -> Result<Self> {
        let mh = name.index_multihash()?;
        Ok(Self {
            entries: vec![ByteBuf::from(mh.to_bytes())],
            next: None,
        })
    }

    /// Decode the entries as multihashes
    pub fn multihashes(&self) -> Result<Vec<Multihash>> {
        self.entries
            .iter()
            .map(|raw| {
                Multihash::from_bytes(raw)
                    .map_err(|e| ChainError::from(AdvertisementError::InvalidEntry(e.to_string())))
            })
            .collect()
    }

    /// Whether the block indexes `name`
    pub fn indexes(&self, name: &Name) -> Result<bool> {
        let wanted = name.index_multihash()?;
        Ok(self.multihashes()?.contains(&wanted))
    }

    /// Serialize to DAG-CBOR
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self)
            .map_err(|e| AdvertisementError::Serialization(Box::new(e)).into())
    }

    /// Deserialize from DAG-CBOR
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        serde_ipld_dagcbor::from_slice(data)
            .map_err(|e| AdvertisementError::Serialization(Box::new(e)).into())
    }

    /// Compute CID of this block
    pub fn to_cid(&self) -> Result<IpldCid> {
        compute_cid(&self.to_cbor()?)
    }
}

/// Signature envelope stored in an advertisement's `Signature` field
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SignatureEnvelope {
    #[serde(rename = "PublicKey", with = "serde_bytes_helper")]
    public_key: Bytes,
    #[serde(rename = "Signature", with = "serde_bytes_helper")]
    signature: Bytes,
}

/// Chain node announcing one naming record
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Advertisement {
    /// Previous head (None for the first advertisement)
    #[serde(rename = "PreviousID")]
    pub previous_id: Option<IpldCid>,

    /// Peer id of the claimed name
    #[serde(rename = "Provider")]
    pub provider: SmolStr,

    /// Multiaddrs where the provider serves its chain
    #[serde(rename = "Addresses")]
    pub addresses: Vec<SmolStr>,

    /// DAG-CBOR signature envelope, empty while unsigned
    #[serde(rename = "Signature", with = "serde_bytes_helper")]
    pub signature: Bytes,

    /// Entries block CID
    #[serde(rename = "Entries")]
    pub entries: IpldCid,

    /// Grouping key, [`CONTEXT_ID`] for everything this crate produces
    #[serde(rename = "ContextID", with = "serde_bytes_helper")]
    pub context_id: Bytes,

    /// Protocol-prefixed naming record
    #[serde(rename = "Metadata", with = "serde_bytes_helper")]
    pub metadata: Bytes,

    /// Removal flag, never set for naming advertisements
    #[serde(rename = "IsRm")]
    pub is_rm: bool,
}

impl Advertisement {
    /// Create new unsigned advertisement
    pub fn new_unsigned(
        previous_id: Option<IpldCid>,
        provider: &PeerId,
        addresses: Vec<SmolStr>,
        entries: IpldCid,
        context_id: Bytes,
        metadata: Bytes,
    ) -> Self {
        Self {
            previous_id,
            provider: provider.to_string().into(),
            addresses,
            signature: Bytes::new(),
            entries,
            context_id,
            metadata,
            is_rm: false,
        }
    }

    /// Sign this advertisement with the chain owner's key
    pub fn sign(mut self, key: &impl SigningKey) -> Result<Self> {
        let unsigned = self.unsigned_bytes()?;
        let signature = key
            .sign_bytes(&unsigned)
            .map_err(|e| AdvertisementError::Signing(e.to_string()))?;
        let envelope = SignatureEnvelope {
            public_key: Bytes::from(key.public_key()?.encode_protobuf()),
            signature,
        };
        self.signature = Bytes::from(
            serde_ipld_dagcbor::to_vec(&envelope)
                .map_err(|e| AdvertisementError::Serialization(Box::new(e)))?,
        );
        Ok(self)
    }

    /// Previous head, if any
    pub fn previous_id(&self) -> Option<&IpldCid> {
        self.previous_id.as_ref()
    }

    /// Entries block CID
    pub fn entries(&self) -> &IpldCid {
        &self.entries
    }

    /// Decode the naming record carried as metadata
    pub fn naming_record(&self) -> Result<NamingRecord> {
        NamingRecord::from_metadata(&self.metadata)
    }

    /// Get unsigned advertisement bytes (for signing/verification)
    pub(crate) fn unsigned_bytes(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.signature = Bytes::new();
        let cbor = serde_ipld_dagcbor::to_vec(&unsigned)
            .map_err(|e| AdvertisementError::Serialization(Box::new(e)))?;

        let mut payload = Vec::with_capacity(SIGNATURE_PREFIX.len() + cbor.len());
        payload.extend_from_slice(SIGNATURE_PREFIX);
        payload.extend_from_slice(&cbor);
        Ok(payload)
    }

    /// Serialize to DAG-CBOR
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self)
            .map_err(|e| AdvertisementError::Serialization(Box::new(e)).into())
    }

    /// Deserialize from DAG-CBOR
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        serde_ipld_dagcbor::from_slice(data)
            .map_err(|e| AdvertisementError::Serialization(Box::new(e)).into())
    }

    /// Compute CID of this advertisement
    pub fn to_cid(&self) -> Result<IpldCid> {
        compute_cid(&self.to_cbor()?)
    }

    /// Verify the signature envelope and return the signer
    ///
    /// The signer is whoever operates the chain. It is not required to match
    /// `Provider` or the name the record is indexed under; see [`verify_binding`].
    pub fn verify_signature(&self) -> std::result::Result<PeerId, AdvertisementError> {
        if self.signature.is_empty() {
            return Err(AdvertisementError::Unsigned);
        }
        let envelope: SignatureEnvelope = serde_ipld_dagcbor::from_slice(&self.signature)
            .map_err(|e| AdvertisementError::InvalidSignature(e.to_string()))?;
        let key = PublicKey::try_decode_protobuf(&envelope.public_key)
            .map_err(|e| AdvertisementError::InvalidKey(e.to_string()))?;

        let unsigned = self
            .unsigned_bytes()
            .map_err(|e| AdvertisementError::Serialization(e.into()))?;
        if !key.verify(&unsigned, &envelope.signature) {
            return Err(AdvertisementError::SignatureVerificationFailed);
        }
        Ok(key.to_peer_id())
    }
}

/// Check that an advertisement's record is bound to the name it is indexed under
///
/// Chain construction does not require this: an advertisement may carry a
/// record signed by the chain operator while being indexed under any name.
/// Readers that care about ownership call this. Returns the bound name.
pub fn verify_binding(
    advertisement: &Advertisement,
    entries: &EntryChunk,
    now: DateTime<Utc>,
) -> Result<Name> {
    let record = advertisement.naming_record()?;
    let key = record
        .embedded_key()?
        .ok_or(ChainError::from(RecordError::MissingPublicKey))?;
    let name = Name::new(key.to_peer_id());

    record.validate_for_name(&name, now)?;

    if !entries.indexes(&name)? {
        return Err(AdvertisementError::InvalidEntry(format!(
            "entries do not index {name}, the owner of the record key"
        ))
        .into());
    }
    Ok(name)
}
