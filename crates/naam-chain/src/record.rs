//! Signed naming records
//!
//! A naming record is a versioned pointer from a name to a target path. It is
//! signed by whichever key builds it, which for a publisher is the chain
//! operator key, and embeds that key. It only validates for a name when the
//! signer owns the name. Records travel verbatim as advertisement metadata,
//! prefixed by the naming-record protocol ID.

use crate::METADATA_PROTOCOL_ID;
use crate::block::Multihash;
use crate::error::{ChainError, RecordError, Result};
use crate::identity::{Name, SigningKey, decode_public_key};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use libp2p_identity::PublicKey;
use smol_str::SmolStr;
use std::time::Duration;

/// Validity type for records that expire at an absolute time
pub const VALIDITY_EOL: u64 = 0;

/// Domain separation prefix for record signatures
const SIGNATURE_PREFIX: &[u8] = b"naam-record:";

/// Multihash code for identity hashes, used by peer ids that inline their key
const IDENTITY_MULTIHASH: u64 = 0x00;

/// Signed, versioned pointer from a name to a target path
///
/// Records are immutable once signed. Republishing a name always produces a
/// new record with a higher sequence number.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NamingRecord {
    /// Target path the name points to
    #[serde(rename = "Value")]
    pub value: SmolStr,

    /// How `validity` is interpreted (only end-of-life is defined)
    #[serde(rename = "ValidityType")]
    pub validity_type: u64,

    /// RFC 3339 end-of-life timestamp
    #[serde(rename = "Validity")]
    pub validity: SmolStr,

    /// Sequence number, strictly increasing across records for a name
    #[serde(rename = "Sequence")]
    pub sequence: u64,

    /// Suggested re-check interval in nanoseconds
    #[serde(rename = "TTL")]
    pub ttl: u64,

    /// Protobuf-encoded public key of the signer, when embedded
    #[serde(
        rename = "PubKey",
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::serde_bytes_helper::option"
    )]
    pub pub_key: Option<Bytes>,

    /// Signature bytes
    #[serde(rename = "Signature", with = "crate::serde_bytes_helper")]
    pub signature: Bytes,
}

impl NamingRecord {
    /// Create new unsigned record with an end-of-life validity
    pub fn new_unsigned(
        value: impl Into<SmolStr>,
        sequence: u64,
        eol: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            value: value.into(),
            validity_type: VALIDITY_EOL,
            validity: eol.to_rfc3339_opts(SecondsFormat::Nanos, true).into(),
            sequence,
            ttl: u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX),
            pub_key: None,
            signature: Bytes::new(),
        }
    }

    /// Build a signed record with the signer's public key embedded
    pub fn build(
        key: &impl SigningKey,
        value: impl Into<SmolStr>,
        sequence: u64,
        eol: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self> {
        Self::new_unsigned(value, sequence, eol, ttl)
            .with_public_key(key)?
            .sign(key)
    }

    /// Embed the key's public half so the record can be verified on its own
    pub fn with_public_key(mut self, key: &impl SigningKey) -> Result<Self> {
        self.pub_key = Some(Bytes::from(key.public_key()?.encode_protobuf()));
        Ok(self)
    }

    /// Sign this record with a key
    ///
    /// The signature covers every field except the signature itself, including
    /// the embedded public key.
    pub fn sign(mut self, key: &impl SigningKey) -> Result<Self> {
        let unsigned = self.unsigned_bytes()?;
        self.signature = key
            .sign_bytes(&unsigned)
            .map_err(|e| RecordError::Signing(e.to_string()))?;
        Ok(self)
    }

    /// Target path
    pub fn value(&self) -> &str {
        &self.value
    }

    /// End-of-life timestamp
    pub fn eol(&self) -> std::result::Result<DateTime<Utc>, RecordError> {
        if self.validity_type != VALIDITY_EOL {
            return Err(RecordError::UnsupportedValidity(self.validity_type));
        }
        DateTime::parse_from_rfc3339(&self.validity)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| RecordError::Serialization(Box::new(e)))
    }

    /// Suggested re-check interval
    pub fn ttl(&self) -> Duration {
        Duration::from_nanos(self.ttl)
    }

    /// Get unsigned record bytes (for signing/verification)
    pub(crate) fn unsigned_bytes(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.signature = Bytes::new();
        let cbor = serde_ipld_dagcbor::to_vec(&unsigned)
            .map_err(|e| RecordError::Serialization(Box::new(e)))?;

        let mut payload = Vec::with_capacity(SIGNATURE_PREFIX.len() + cbor.len());
        payload.extend_from_slice(SIGNATURE_PREFIX);
        payload.extend_from_slice(&cbor);
        Ok(payload)
    }

    /// Serialize to DAG-CBOR
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| RecordError::Serialization(Box::new(e)).into())
    }

    /// Deserialize from DAG-CBOR
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        serde_ipld_dagcbor::from_slice(data)
            .map_err(|e| RecordError::Serialization(Box::new(e)).into())
    }

    /// Encode as advertisement metadata: `uvarint(protocol id) || record`
    pub fn to_metadata(&self) -> Result<Bytes> {
        let cbor = self.to_cbor()?;
        let mut prefix = unsigned_varint::encode::u64_buffer();
        let prefix = unsigned_varint::encode::u64(METADATA_PROTOCOL_ID, &mut prefix);

        let mut metadata = BytesMut::with_capacity(prefix.len() + cbor.len());
        metadata.put_slice(prefix);
        metadata.put_slice(&cbor);
        Ok(metadata.freeze())
    }

    /// Decode from advertisement metadata
    pub fn from_metadata(metadata: &[u8]) -> Result<Self> {
        let (protocol, rest) = unsigned_varint::decode::u64(metadata)
            .map_err(|e| RecordError::Serialization(Box::new(e)))?;
        if protocol != METADATA_PROTOCOL_ID {
            return Err(RecordError::UnexpectedProtocol(protocol).into());
        }
        Self::from_cbor(rest)
    }

    /// Public key embedded in the record, if any
    pub fn embedded_key(&self) -> Result<Option<PublicKey>> {
        self.pub_key
            .as_ref()
            .map(|bytes| decode_public_key(bytes))
            .transpose()
    }

    /// Verify the signature against a public key
    pub fn verify(&self, pubkey: &PublicKey) -> std::result::Result<(), RecordError> {
        let unsigned = self
            .unsigned_bytes()
            .map_err(|e| RecordError::Serialization(e.into()))?;
        if self.signature.is_empty() {
            return Err(RecordError::InvalidSignature("empty signature".into()));
        }
        if pubkey.verify(&unsigned, &self.signature) {
            Ok(())
        } else {
            Err(RecordError::SignatureVerificationFailed)
        }
    }

    /// Check that this record is a valid, unexpired record for `name`
    ///
    /// The verifying key is the embedded one, or the key inlined in the peer id
    /// when the record carries none. The key must hash to the name's peer id.
    pub fn validate_for_name(
        &self,
        name: &Name,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), RecordError> {
        let key = match &self.pub_key {
            Some(bytes) => PublicKey::try_decode_protobuf(bytes)
                .map_err(|e| RecordError::InvalidKey(e.to_string()))?,
            None => inline_key(name)?,
        };

        let signer = key.to_peer_id();
        if &signer != name.peer_id() {
            return Err(RecordError::NameMismatch {
                signer: signer.to_string(),
                name: name.peer_id().to_string(),
            });
        }

        self.verify(&key)?;

        let eol = self.eol()?;
        if eol <= now {
            return Err(RecordError::Expired(self.validity.to_string()));
        }
        Ok(())
    }
}

/// Extract the public key from a peer id that inlines it
fn inline_key(name: &Name) -> std::result::Result<PublicKey, RecordError> {
    let mh = Multihash::from_bytes(&name.to_bytes())
        .map_err(|e| RecordError::InvalidKey(e.to_string()))?;
    if mh.code() != IDENTITY_MULTIHASH {
        return Err(RecordError::MissingPublicKey);
    }
    PublicKey::try_decode_protobuf(mh.digest()).map_err(|e| RecordError::InvalidKey(e.to_string()))
}

impl TryFrom<&[u8]> for NamingRecord {
    type Error = ChainError;

    fn try_from(metadata: &[u8]) -> Result<Self> {
        Self::from_metadata(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChainErrorKind;
    use chrono::TimeDelta;
    use libp2p_identity::Keypair;

    fn eol() -> DateTime<Utc> {
        Utc::now() + TimeDelta::hours(24)
    }

    #[test]
    fn test_build_embeds_key_and_signs() {
        let key = Keypair::generate_ed25519();
        let record = NamingRecord::build(&key, "/ipfs/bafyexample", 1, eol(), Duration::ZERO)
            .unwrap();

        assert_eq!(record.value(), "/ipfs/bafyexample");
        assert_eq!(record.sequence, 1);
        assert_eq!(record.ttl(), Duration::ZERO);
        assert_eq!(record.embedded_key().unwrap(), Some(key.public()));
        record.verify(&key.public()).unwrap();
    }

    #[test]
    fn test_eol_keeps_nanosecond_precision() {
        let when = DateTime::parse_from_rfc3339("2030-01-02T03:04:05.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = NamingRecord::new_unsigned("/ipfs/x", 3, when, Duration::from_secs(60));

        assert_eq!(record.validity.as_str(), "2030-01-02T03:04:05.123456789Z");
        assert_eq!(record.eol().unwrap(), when);
        assert_eq!(record.ttl, 60_000_000_000);
    }

    #[test]
    fn test_signature_covers_fields() {
        let key = Keypair::generate_ed25519();
        let mut record =
            NamingRecord::build(&key, "/ipfs/original", 1, eol(), Duration::ZERO).unwrap();

        record.value = "/ipfs/tampered".into();
        assert!(matches!(
            record.verify(&key.public()),
            Err(RecordError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_signature_covers_embedded_key() {
        let key = Keypair::generate_ed25519();
        let other = Keypair::generate_ed25519();
        let mut record =
            NamingRecord::build(&key, "/ipfs/original", 1, eol(), Duration::ZERO).unwrap();

        record.pub_key = Some(Bytes::from(other.public().encode_protobuf()));
        assert!(record.verify(&key.public()).is_err());
    }

    #[test]
    fn test_metadata_has_protocol_prefix() {
        let key = Keypair::generate_ed25519();
        let record = NamingRecord::build(&key, "/ipfs/x", 7, eol(), Duration::ZERO).unwrap();

        let metadata = record.to_metadata().unwrap();
        // 0x0300 as uvarint
        assert_eq!(&metadata[..2], &[0x80, 0x06]);
        assert_eq!(&metadata[2..], record.to_cbor().unwrap().as_slice());
        assert_eq!(NamingRecord::from_metadata(&metadata).unwrap(), record);
    }

    #[test]
    fn test_metadata_rejects_other_protocols() {
        let mut metadata = vec![0x01];
        metadata.extend_from_slice(&[0xa0]);

        let err = NamingRecord::from_metadata(&metadata).unwrap_err();
        assert_eq!(*err.kind(), ChainErrorKind::InvalidRecord);
    }

    #[test]
    fn test_validate_for_own_name() {
        let key = Keypair::generate_ed25519();
        let name = Name::from_key(&key).unwrap();
        let record = NamingRecord::build(&key, "/ipfs/x", 1, eol(), Duration::ZERO).unwrap();

        record.validate_for_name(&name, Utc::now()).unwrap();
    }

    #[test]
    fn test_validate_uses_key_inlined_in_peer_id() {
        let key = Keypair::generate_ed25519();
        let name = Name::from_key(&key).unwrap();
        let record = NamingRecord::new_unsigned("/ipfs/x", 1, eol(), Duration::ZERO)
            .sign(&key)
            .unwrap();

        assert!(record.pub_key.is_none());
        record.validate_for_name(&name, Utc::now()).unwrap();
    }

    #[test]
    fn test_validate_rejects_record_for_someone_elses_name() {
        let owner = Keypair::generate_ed25519();
        let impostor = Keypair::generate_ed25519();
        let name = Name::from_key(&owner).unwrap();

        let record =
            NamingRecord::build(&impostor, "/ipfs/evil", 1, eol(), Duration::ZERO).unwrap();

        // The record is internally consistent...
        record.verify(&impostor.public()).unwrap();
        // ...but does not belong to the name
        assert!(matches!(
            record.validate_for_name(&name, Utc::now()),
            Err(RecordError::NameMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_expired_record() {
        let key = Keypair::generate_ed25519();
        let name = Name::from_key(&key).unwrap();
        let past = Utc::now() - TimeDelta::minutes(1);
        let record = NamingRecord::build(&key, "/ipfs/x", 1, past, Duration::ZERO).unwrap();

        assert!(matches!(
            record.validate_for_name(&name, Utc::now()),
            Err(RecordError::Expired(_))
        ));
    }
}
