//! Signed chain head, as served to indexers pulling the chain

use crate::error::{ChainError, Result};
use crate::identity::SigningKey;
use crate::serde_bytes_helper;
use bytes::Bytes;
use cid::Cid as IpldCid;
use libp2p_identity::{PeerId, PublicKey};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

/// Topic indexers ingest on by default
pub const DEFAULT_TOPIC: &str = "/indexer/ingest/mainnet";

/// Current head, signed by the chain operator
///
/// Encoded as DAG-JSON: `{ head, topic, pubkey, sig }`. The signature covers
/// SHA2-256 over the head CID bytes followed by the topic.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignedHead {
    /// Head advertisement
    pub head: IpldCid,
    /// Ingest topic
    pub topic: SmolStr,
    /// Protobuf-encoded operator public key
    #[serde(with = "serde_bytes_helper")]
    pub pubkey: Bytes,
    /// Signature over [`signed_payload`]
    #[serde(with = "serde_bytes_helper")]
    pub sig: Bytes,
}

/// Bytes covered by a head signature
pub fn signed_payload(head: &IpldCid, topic: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(head.to_bytes());
    hasher.update(topic.as_bytes());
    hasher.finalize().to_vec()
}

impl SignedHead {
    /// Sign `head` on `topic`
    pub fn sign(head: IpldCid, topic: impl Into<SmolStr>, key: &impl SigningKey) -> Result<Self> {
        let topic = topic.into();
        let sig = key.sign_bytes(&signed_payload(&head, &topic))?;
        Ok(Self {
            head,
            topic,
            pubkey: Bytes::from(key.public_key()?.encode_protobuf()),
            sig,
        })
    }

    /// Check the signature, returning the signer
    pub fn verify(&self) -> Result<PeerId> {
        let key = PublicKey::try_decode_protobuf(&self.pubkey).map_err(ChainError::crypto)?;
        if !key.verify(&signed_payload(&self.head, &self.topic), &self.sig) {
            return Err(ChainError::crypto(std::io::Error::other(
                "head signature verification failed",
            )));
        }
        Ok(key.to_peer_id())
    }

    /// Encode as DAG-JSON
    pub fn to_dag_json(&self) -> Result<Vec<u8>> {
        serde_ipld_dagjson::to_vec(self).map_err(ChainError::serialization)
    }

    /// Decode from DAG-JSON
    pub fn from_dag_json(data: &[u8]) -> Result<Self> {
        serde_ipld_dagjson::from_slice(data).map_err(ChainError::serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::compute_cid;
    use libp2p_identity::Keypair;

    #[test]
    fn test_sign_and_verify() {
        let key = Keypair::generate_ed25519();
        let head = compute_cid(b"head").unwrap();

        let signed = SignedHead::sign(head, DEFAULT_TOPIC, &key).unwrap();
        assert_eq!(signed.verify().unwrap(), key.public().to_peer_id());

        let decoded = SignedHead::from_dag_json(&signed.to_dag_json().unwrap()).unwrap();
        assert_eq!(decoded, signed);
    }

    #[test]
    fn test_dag_json_shape() {
        let key = Keypair::generate_ed25519();
        let head = compute_cid(b"head").unwrap();
        let json = SignedHead::sign(head, DEFAULT_TOPIC, &key)
            .unwrap()
            .to_dag_json()
            .unwrap();
        let text = String::from_utf8(json).unwrap();

        assert!(text.contains(&format!(r#""head":{{"/":"{head}"}}"#)));
        assert!(text.contains(r#""topic":"/indexer/ingest/mainnet""#));
        assert!(text.contains(r#""sig":{"/":{"bytes":"#));
    }

    #[test]
    fn test_other_topic_fails_verification() {
        let key = Keypair::generate_ed25519();
        let head = compute_cid(b"head").unwrap();
        let mut signed = SignedHead::sign(head, DEFAULT_TOPIC, &key).unwrap();
        signed.topic = "/indexer/ingest/testnet".into();
        assert!(signed.verify().is_err());
    }
}
