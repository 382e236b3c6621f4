use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::BlobMeta;
use crate::Error;

/// SHA-256 checksum identifying an object in the store
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// zero hash (useful as sentinel)
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// parse from a 64 character hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidHashHex(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidHashHex(s.to_string()))?;
        Ok(Self(arr))
    }

    /// true if `s` has the shape of a hex checksum
    pub fn looks_like_hex(s: &str) -> bool {
        s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// hash arbitrary bytes (trees and commits are addressed by their encoded form)
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// split into path components for the object store: (2 hex chars, 62 hex chars)
    pub fn to_path_components(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[..2].to_string(), hex[2..].to_string())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..12])
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// mode recorded for every symlink blob, whatever the on-disk link reports
pub const SYMLINK_MODE: u32 = 0o120777;

/// compute a blob checksum over (uid, gid, mode, xattrs, content)
///
/// layout, all integers little endian u32:
///   uid | gid | mode | xattr_count | (name_len | name | value_len | value)* | content
///
/// xattrs are hashed in name order regardless of the order given.
pub fn compute_blob_hash(meta: &BlobMeta, content: &[u8]) -> Hash {
    let mut hasher = BlobHasher::new(meta);
    hasher.update(content);
    hasher.finalize()
}

/// streaming blob hasher, header is written on construction
pub struct BlobHasher {
    hasher: Sha256,
}

impl BlobHasher {
    pub fn new(meta: &BlobMeta) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(meta.uid.to_le_bytes());
        hasher.update(meta.gid.to_le_bytes());
        hasher.update(meta.mode.to_le_bytes());

        let mut sorted: Vec<_> = meta.xattrs.iter().collect();
        sorted.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        hasher.update((sorted.len() as u32).to_le_bytes());
        for xattr in sorted {
            hasher.update((xattr.name.len() as u32).to_le_bytes());
            hasher.update(xattr.name.as_bytes());
            hasher.update((xattr.value.len() as u32).to_le_bytes());
            hasher.update(&xattr.value);
        }

        Self { hasher }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}
