//! Contactless card tag handles

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A contactless card currently in range of the reader
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Anti-collision identifier reported by the hardware
    #[serde(with = "hex_bytes")]
    id: Vec<u8>,
    /// Whether the card accepts extended length APDUs
    pub extended_length: bool,
}

impl Tag {
    pub fn new(id: impl Into<Vec<u8>>, extended_length: bool) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::EmptyTagId);
        }
        Ok(Self {
            id,
            extended_length,
        })
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let id = hex::decode(s.trim()).map_err(|e| Error::InvalidTagId(e.to_string()))?;
        Self::new(id, true)
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.id)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.to_hex())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
