//! Bitcoin type definitions.
//!
//! Common types used across the redemption flow:
//! - UTXOs as reported by Esplora and by the ledger
//! - The spendable form consumed by the assembler
//! - Network selection

use bitcoin::{OutPoint, ScriptBuf, Txid};
use nbtc_types::{serde_hex, RedeemError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// UTXO Types
// ============================================================================

/// A UTXO as returned by `GET /address/{addr}/utxo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64, // satoshis
    #[serde(default)]
    pub status: UtxoStatus,
}

/// Status of a UTXO (confirmed or in mempool).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UtxoStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
}

/// A UTXO held by the bridge, as stored on the ledger.
///
/// Unlike [`Utxo`] it carries the locking script, since the ledger records
/// which dWallet lock script each deposit was paid to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    #[serde(with = "serde_hex")]
    pub script_pubkey: Vec<u8>,
}

/// A UTXO ready to be spent: parsed outpoint plus the script it is locked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableUtxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
}

impl SpendableUtxo {
    /// Attach a locking script to an Esplora UTXO.
    ///
    /// Esplora does not return the script; callers know it because they
    /// queried by address.
    pub fn from_esplora(utxo: &Utxo, script_pubkey: ScriptBuf) -> Result<Self> {
        Ok(Self {
            outpoint: OutPoint {
                txid: parse_txid(&utxo.txid)?,
                vout: utxo.vout,
            },
            value: utxo.value,
            script_pubkey,
        })
    }
}

impl TryFrom<&LedgerUtxo> for SpendableUtxo {
    type Error = RedeemError;

    fn try_from(utxo: &LedgerUtxo) -> Result<Self> {
        Ok(Self {
            outpoint: OutPoint {
                txid: parse_txid(&utxo.txid)?,
                vout: utxo.vout,
            },
            value: utxo.value,
            script_pubkey: ScriptBuf::from_bytes(utxo.script_pubkey.clone()),
        })
    }
}

pub fn parse_txid(txid: &str) -> Result<Txid> {
    Txid::from_str(txid).map_err(|e| RedeemError::InvalidInput(format!("invalid txid {txid}: {e}")))
}

// ============================================================================
// Network
// ============================================================================

/// Bitcoin network the bridge operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    Mainnet,
    Testnet,
    Signet,
    #[default]
    Regtest,
}

impl BitcoinNetwork {
    /// Default Esplora API base URL.
    ///
    /// Regtest points at a locally running indexer.
    pub fn default_esplora_url(&self) -> &'static str {
        match self {
            BitcoinNetwork::Mainnet => "https://blockstream.info/api",
            BitcoinNetwork::Testnet => "https://blockstream.info/testnet/api",
            BitcoinNetwork::Signet => "https://mempool.space/signet/api",
            BitcoinNetwork::Regtest => "http://localhost:3002",
        }
    }

    /// Get the bitcoin crate Network type.
    pub fn to_bitcoin_network(&self) -> bitcoin::Network {
        match self {
            BitcoinNetwork::Mainnet => bitcoin::Network::Bitcoin,
            BitcoinNetwork::Testnet => bitcoin::Network::Testnet,
            BitcoinNetwork::Signet => bitcoin::Network::Signet,
            BitcoinNetwork::Regtest => bitcoin::Network::Regtest,
        }
    }
}

impl fmt::Display for BitcoinNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitcoinNetwork::Mainnet => write!(f, "mainnet"),
            BitcoinNetwork::Testnet => write!(f, "testnet"),
            BitcoinNetwork::Signet => write!(f, "signet"),
            BitcoinNetwork::Regtest => write!(f, "regtest"),
        }
    }
}

impl FromStr for BitcoinNetwork {
    type Err = RedeemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(BitcoinNetwork::Mainnet),
            "testnet" | "test" => Ok(BitcoinNetwork::Testnet),
            "signet" => Ok(BitcoinNetwork::Signet),
            "regtest" | "reg" => Ok(BitcoinNetwork::Regtest),
            _ => Err(RedeemError::Configuration(format!("unknown network: {s}"))),
        }
    }
}
