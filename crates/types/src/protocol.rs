//! Protocol parameters sent to the signing network.
//!
//! The network identifies each parameter by a small integer code; the enums
//! below carry the mapping in both directions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RedeemError;

/// Elliptic curve of the dWallet key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    #[default]
    Secp256k1,
}

impl Curve {
    pub fn code(self) -> u32 {
        match self {
            Curve::Secp256k1 => 0,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, RedeemError> {
        match code {
            0 => Ok(Curve::Secp256k1),
            other => Err(RedeemError::MalformedEnvelope(format!("unknown curve code {other}"))),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Curve::Secp256k1 => write!(f, "secp256k1"),
        }
    }
}

/// Signature algorithm requested from the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// ECDSA over secp256k1, spent through P2WPKH witnesses.
    #[default]
    Ecdsa,
    /// BIP-340 Schnorr, spent through key-path P2TR witnesses.
    Taproot,
}

impl SignatureAlgorithm {
    pub fn code(self) -> u32 {
        match self {
            SignatureAlgorithm::Ecdsa => 0,
            SignatureAlgorithm::Taproot => 1,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, RedeemError> {
        match code {
            0 => Ok(SignatureAlgorithm::Ecdsa),
            1 => Ok(SignatureAlgorithm::Taproot),
            other => Err(RedeemError::MalformedEnvelope(format!(
                "unknown signature algorithm code {other}"
            ))),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureAlgorithm::Ecdsa => write!(f, "ecdsa"),
            SignatureAlgorithm::Taproot => write!(f, "taproot"),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = RedeemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ecdsa" | "ecdsa_secp256k1" | "segwit" => Ok(SignatureAlgorithm::Ecdsa),
            "taproot" | "schnorr" | "p2tr" => Ok(SignatureAlgorithm::Taproot),
            _ => Err(RedeemError::Configuration(format!("unknown signature algorithm: {s}"))),
        }
    }
}

/// Hash the network applies to a message before signing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HashScheme {
    Sha256,
    #[default]
    DoubleSha256,
}

impl HashScheme {
    pub fn code(self) -> u32 {
        match self {
            HashScheme::Sha256 => 1,
            HashScheme::DoubleSha256 => 2,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, RedeemError> {
        match code {
            1 => Ok(HashScheme::Sha256),
            2 => Ok(HashScheme::DoubleSha256),
            other => Err(RedeemError::MalformedEnvelope(format!(
                "unknown hash scheme code {other}"
            ))),
        }
    }
}

impl fmt::Display for HashScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashScheme::Sha256 => write!(f, "sha256"),
            HashScheme::DoubleSha256 => write!(f, "double_sha256"),
        }
    }
}

impl FromStr for HashScheme {
    type Err = RedeemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(HashScheme::Sha256),
            "double_sha256" | "sha256d" => Ok(HashScheme::DoubleSha256),
            _ => Err(RedeemError::Configuration(format!("unknown hash scheme: {s}"))),
        }
    }
}
