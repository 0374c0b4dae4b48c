//! Ledger object identifiers.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::RedeemError;

/// Length of a ledger object identifier in bytes.
pub const OBJECT_ID_LENGTH: usize = 32;

/// A 32-byte ledger object identifier.
///
/// Human-readable formats (JSON, TOML) carry it as `0x`-prefixed hex; binary
/// formats carry the raw 32 bytes with no length prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; OBJECT_ID_LENGTH]);

impl ObjectId {
    pub const fn new(bytes: [u8; OBJECT_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LENGTH] {
        &self.0
    }

    /// Parse from a byte slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RedeemError> {
        let arr: [u8; OBJECT_ID_LENGTH] = bytes.try_into().map_err(|_| {
            RedeemError::InvalidInput(format!(
                "object id must be {} bytes, got {}",
                OBJECT_ID_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

impl FromStr for ObjectId {
    type Err = RedeemError;

    /// Accepts `0x`-prefixed or bare hex. Short ids such as `0x6` are
    /// left-padded with zeros the way the ledger abbreviates system objects.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || digits.len() > OBJECT_ID_LENGTH * 2 {
            return Err(RedeemError::InvalidInput(format!("invalid object id: {s:?}")));
        }

        let padded = format!("{:0>width$}", digits, width = OBJECT_ID_LENGTH * 2);
        let bytes = hex::decode(&padded)
            .map_err(|e| RedeemError::InvalidInput(format!("invalid object id {s:?}: {e}")))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(de::Error::custom)
        } else {
            <[u8; OBJECT_ID_LENGTH]>::deserialize(deserializer).map(Self)
        }
    }
}
