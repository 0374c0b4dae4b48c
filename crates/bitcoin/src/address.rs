//! dWallet address metadata.
//!
//! A dWallet's public key fixes the P2WPKH address and lock script that
//! deposits are paid to and that redemption change returns to. Both are
//! derived once, when the dWallet is registered with the bridge.

use bitcoin::{Address, CompressedPublicKey, ScriptBuf};
use nbtc_types::{RedeemError, Result};
use serde::Serialize;
use std::str::FromStr;

use crate::crypto::parse_compressed_pubkey;
use crate::types::BitcoinNetwork;

/// Address data derived from a dWallet public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DWalletMetadata {
    pub address: String,
    #[serde(serialize_with = "serialize_script")]
    pub lock_script: ScriptBuf,
    #[serde(serialize_with = "serialize_pubkey")]
    pub public_key: CompressedPublicKey,
}

fn serialize_script<S: serde::Serializer>(
    script: &ScriptBuf,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(script.as_bytes()))
}

fn serialize_pubkey<S: serde::Serializer>(
    pk: &CompressedPublicKey,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(pk.to_bytes()))
}

/// Derive the P2WPKH address and lock script for a compressed public key.
pub fn p2wpkh_metadata(public_key: &[u8], network: BitcoinNetwork) -> Result<DWalletMetadata> {
    let public_key = parse_compressed_pubkey(public_key)?;
    let address = Address::p2wpkh(&public_key, network.to_bitcoin_network());

    Ok(DWalletMetadata {
        lock_script: address.script_pubkey(),
        address: address.to_string(),
        public_key,
    })
}

/// Parse an address and check that it belongs to `network`.
pub fn parse_address(address: &str, network: BitcoinNetwork) -> Result<Address> {
    Address::from_str(address)
        .map_err(|e| RedeemError::InvalidInput(format!("invalid address {address}: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| {
            RedeemError::InvalidInput(format!("address {address} is for another network: {e}"))
        })
}
