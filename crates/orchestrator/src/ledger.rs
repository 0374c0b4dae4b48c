//! Ledger contract boundary.
//!
//! The nBTC contract owns redemption requests and their UTXOs. Reads are
//! simulated ("dev-inspect") calls; writes are ledger transactions submitted
//! by whoever holds the signer identity.

use async_trait::async_trait;
use nbtc_bitcoin::LedgerUtxo;
use nbtc_types::{serde_hex, ObjectId, Result};
use serde::{Deserialize, Serialize};

/// A redemption request as stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemRecord {
    pub redeem_id: u64,
    pub dwallet_id: ObjectId,
    /// Script the redeemed BTC is paid to.
    #[serde(with = "serde_hex")]
    pub recipient_script: Vec<u8>,
    /// Amount in satoshis, before the fee.
    pub amount: u64,
    pub fee: u64,
    /// Proposed UTXOs, in the order the contract will index signatures.
    pub inputs: Vec<LedgerUtxo>,
    #[serde(with = "serde_hex")]
    pub change_script: Vec<u8>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn redeem_request(&self, redeem_id: u64) -> Result<RedeemRecord>;

    /// The message the contract expects to be signed for one input.
    async fn sig_hash(&self, redeem_id: u64, input_index: usize) -> Result<Vec<u8>>;

    /// Ask the contract to request a signature for one input, spending the
    /// presignature behind `presign_cap_id`. Returns the base64
    /// `SignRequestEvent` envelope.
    async fn request_utxo_sig(
        &self,
        redeem_id: u64,
        input_index: usize,
        presign_cap_id: ObjectId,
        message_centralized_signature: &[u8],
    ) -> Result<String>;

    /// Have the contract check and store completed signatures.
    async fn record_signature(
        &self,
        redeem_id: u64,
        input_indices: &[usize],
        sign_ids: &[ObjectId],
    ) -> Result<()>;

    /// The fully signed transaction as composed by the contract.
    async fn compose_tx(&self, redeem_id: u64) -> Result<Vec<u8>>;

    /// Top up the contract's presignature buffer. Returns how many were added.
    async fn fill_presign(&self) -> Result<u32>;

    async fn add_dwallet(
        &self,
        dwallet_id: ObjectId,
        lock_script: &[u8],
        public_key: &[u8],
    ) -> Result<()>;

    async fn set_active_dwallet(&self, dwallet_id: ObjectId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redeem_record_json() {
        let json = r#"{
            "redeem_id": 4,
            "dwallet_id": "0x6",
            "recipient_script": "00147c619b661b6511972466e25a13a3177dd048204a",
            "amount": 50000,
            "fee": 150,
            "inputs": [{"txid": "aa", "vout": 0, "value": 100000, "script_pubkey": "0014"}],
            "change_script": "0014"
        }"#;

        let record: RedeemRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.redeem_id, 4);
        assert_eq!(record.recipient_script.len(), 22);
        assert_eq!(record.inputs[0].value, 100_000);
        assert_eq!(record.change_script, vec![0x00, 0x14]);
    }
}
