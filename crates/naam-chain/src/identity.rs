//! Names, peer identities and signing keys
//!
//! A name is the `/ipns/` namespace prefix followed by a libp2p peer id. The
//! peer id is derived from the owner's public key, so anyone holding a record's
//! embedded key can check that it belongs to the name.

use crate::LIBP2P_KEY_CODEC;
use crate::block::{Multihash, sha256_multihash};
use crate::error::{ChainError, Result};
use bytes::Bytes;
use cid::Cid as IpldCid;
use libp2p_identity::{PeerId, PublicKey};
use std::fmt;
use std::str::FromStr;

/// Namespace prefix carried by every name
pub const NAMESPACE_PREFIX: &str = "/ipns/";

/// A mutable name: `/ipns/<peer id>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    peer: PeerId,
}

impl Name {
    /// Name owned by the given peer
    pub fn new(peer: PeerId) -> Self {
        Self { peer }
    }

    /// Name owned by the holder of `key`
    pub fn from_key(key: &impl SigningKey) -> Result<Self> {
        Ok(Self::new(key.public_key()?.to_peer_id()))
    }

    /// Parse a name string
    ///
    /// The namespace prefix is required. The peer id may be in base58btc
    /// multihash form or CIDv1 form with the libp2p-key codec.
    pub fn parse(name: &str) -> Result<Self> {
        let encoded = name
            .strip_prefix(NAMESPACE_PREFIX)
            .ok_or_else(|| ChainError::invalid_name(name))?;
        let peer = decode_peer_id(encoded).map_err(|_| ChainError::invalid_name(name))?;
        Ok(Self::new(peer))
    }

    /// Peer id that owns this name
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    /// Raw identity bytes of the owning peer
    pub fn to_bytes(&self) -> Vec<u8> {
        self.peer.to_bytes()
    }

    /// Multihash under which this name is indexed
    ///
    /// SHA2-256 over the raw peer id bytes. This is the single entry in every
    /// entries block published for the name, and the key readers look up.
    pub fn index_multihash(&self) -> Result<Multihash> {
        sha256_multihash(&self.peer.to_bytes())
    }
}

impl From<PeerId> for Name {
    fn from(peer: PeerId) -> Self {
        Self::new(peer)
    }
}

impl FromStr for Name {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", NAMESPACE_PREFIX, self.peer)
    }
}

/// Decode a peer id from its base58 or CID string form
pub fn decode_peer_id(encoded: &str) -> Result<PeerId> {
    if let Ok(peer) = PeerId::from_str(encoded) {
        return Ok(peer);
    }

    let cid = IpldCid::try_from(encoded).map_err(|e| ChainError::invalid_cid(e.to_string()))?;
    if cid.codec() != LIBP2P_KEY_CODEC {
        return Err(ChainError::invalid_cid(format!(
            "expected libp2p-key codec, got 0x{:x}",
            cid.codec()
        )));
    }
    PeerId::from_multihash(*cid.hash())
        .map_err(|_| ChainError::invalid_cid("multihash is not a peer id"))
}

/// Decode a protobuf-encoded libp2p public key
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::try_decode_protobuf(bytes).map_err(ChainError::crypto)
}

/// Trait for signing keys.
///
/// Implemented for libp2p keypairs, `ed25519_dalek::SigningKey` and
/// `k256::ecdsa::SigningKey`. Signatures verify with the libp2p public key
/// returned by [`public_key`](SigningKey::public_key).
pub trait SigningKey {
    /// Sign the given data and return signature as Bytes
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes>;

    /// Get the libp2p public key
    fn public_key(&self) -> Result<PublicKey>;

    /// Peer id derived from the public key
    fn peer_id(&self) -> Result<PeerId> {
        Ok(self.public_key()?.to_peer_id())
    }
}

impl SigningKey for libp2p_identity::Keypair {
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes> {
        self.sign(data).map(Bytes::from).map_err(ChainError::crypto)
    }

    fn public_key(&self) -> Result<PublicKey> {
        Ok(self.public())
    }
}

// Ed25519 implementation
impl SigningKey for ed25519_dalek::SigningKey {
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes> {
        use ed25519_dalek::Signer;
        let sig = Signer::sign(self, data);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }

    fn public_key(&self) -> Result<PublicKey> {
        let key = libp2p_identity::ed25519::PublicKey::try_from_bytes(
            &self.verifying_key().to_bytes(),
        )
        .map_err(ChainError::crypto)?;
        Ok(PublicKey::from(key))
    }
}

// K-256 (secp256k1) implementation, DER signatures over SHA-256
impl SigningKey for k256::ecdsa::SigningKey {
    fn sign_bytes(&self, data: &[u8]) -> Result<Bytes> {
        use k256::ecdsa::signature::Signer;
        let sig: k256::ecdsa::Signature = Signer::sign(self, data);
        Ok(Bytes::copy_from_slice(sig.to_der().as_bytes()))
    }

    fn public_key(&self) -> Result<PublicKey> {
        let key = libp2p_identity::secp256k1::PublicKey::try_from_bytes(
            self.verifying_key().to_encoded_point(true).as_bytes(),
        )
        .map_err(ChainError::crypto)?;
        Ok(PublicKey::from(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChainErrorKind;
    use libp2p_identity::Keypair;

    #[test]
    fn test_name_round_trips_through_display() {
        let key = Keypair::generate_ed25519();
        let name = Name::from_key(&key).unwrap();

        let rendered = name.to_string();
        assert!(rendered.starts_with("/ipns/12D3KooW"));
        assert_eq!(Name::parse(&rendered).unwrap(), name);
    }

    #[test]
    fn test_name_requires_prefix() {
        let peer = Keypair::generate_ed25519().public().to_peer_id();

        let err = Name::parse(&peer.to_string()).unwrap_err();
        assert_eq!(*err.kind(), ChainErrorKind::InvalidName);

        let err = Name::parse("/ipfs/bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi")
            .unwrap_err();
        assert_eq!(*err.kind(), ChainErrorKind::InvalidName);
    }

    #[test]
    fn test_name_rejects_undecodable_identity() {
        for bad in ["/ipns/", "/ipns/not-a-peer", "/ipns/example.com"] {
            let err = Name::parse(bad).unwrap_err();
            assert_eq!(*err.kind(), ChainErrorKind::InvalidName, "{bad}");
        }
    }

    #[test]
    fn test_name_accepts_cid_form() {
        let peer = Keypair::generate_ed25519().public().to_peer_id();
        let mh = multihash::Multihash::<64>::from_bytes(&peer.to_bytes()).unwrap();
        let cid = IpldCid::new_v1(LIBP2P_KEY_CODEC, mh);

        let name = Name::parse(&format!("/ipns/{cid}")).unwrap();
        assert_eq!(name.peer_id(), &peer);
    }

    #[test]
    fn test_index_multihash_hashes_peer_bytes() {
        use sha2::{Digest, Sha256};

        let name = Name::from_key(&Keypair::generate_ed25519()).unwrap();
        let mh = name.index_multihash().unwrap();

        assert_eq!(mh.code(), crate::SHA2_256);
        assert_eq!(mh.digest(), Sha256::digest(name.to_bytes()).as_slice());
    }

    #[test]
    fn test_signing_keys_verify_with_libp2p_public_key() {
        let msg = b"payload";

        let keypair = Keypair::generate_ed25519();
        let sig = keypair.sign_bytes(msg).unwrap();
        assert!(SigningKey::public_key(&keypair).unwrap().verify(msg, &sig));

        let dalek = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        let sig = dalek.sign_bytes(msg).unwrap();
        assert!(dalek.public_key().unwrap().verify(msg, &sig));

        let k256_key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let sig = k256_key.sign_bytes(msg).unwrap();
        assert!(k256_key.public_key().unwrap().verify(msg, &sig));
        assert!(!k256_key.public_key().unwrap().verify(b"other", &sig));
    }
}
