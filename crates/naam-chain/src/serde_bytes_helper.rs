//! Custom serde helpers for bytes::Bytes using serde_bytes

use bytes::Bytes;
use serde::{Deserializer, Serializer};

/// Serialize Bytes as a CBOR byte string
pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serde_bytes::serialize(bytes.as_ref(), serializer)
}

/// Deserialize Bytes from a CBOR byte string
pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let vec: Vec<u8> = serde_bytes::deserialize(deserializer)?;
    Ok(Bytes::from(vec))
}

/// Same as the parent module, for optional fields
pub mod option {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize `Option<Bytes>` as a nullable CBOR byte string
    pub fn serialize<S>(bytes: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_some(serde_bytes::Bytes::new(b.as_ref())),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize `Option<Bytes>` from a nullable CBOR byte string
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let buf: Option<serde_bytes::ByteBuf> = Option::deserialize(deserializer)?;
        Ok(buf.map(|b| Bytes::from(b.into_vec())))
    }
}
