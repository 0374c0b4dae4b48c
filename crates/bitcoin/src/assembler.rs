//! Redemption transaction assembly.
//!
//! Supports:
//! - Building an unsigned transaction from the bridge's UTXOs
//! - Fixed-fee change handling
//! - Installing P2WPKH witnesses one input at a time
//! - Final serialization once every input is witnessed

use bitcoin::consensus::serialize;
use bitcoin::secp256k1::ecdsa;
use bitcoin::transaction::Version;
use bitcoin::{
    absolute, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use nbtc_types::{RedeemError, Result, Signature};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{parse_compressed_pubkey, verify_ecdsa};
use crate::sighash::{compute_sighash, sighash_preimage, SIGHASH_ALL};
use crate::types::SpendableUtxo;

/// Fee policy for a redemption.
///
/// The ledger fixes the fee when the redemption is proposed, so the assembler
/// never estimates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePolicy {
    Fixed(u64),
}

impl FeePolicy {
    pub fn fee_sats(&self) -> u64 {
        match self {
            FeePolicy::Fixed(sats) => *sats,
        }
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy::Fixed(150)
    }
}

/// Per-input signing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedInput {
    pub outpoint: OutPoint,
    pub sequence: Sequence,
    pub prev_out_script: ScriptBuf,
    pub value: u64,
}

/// An unsigned redemption transaction and what is needed to sign it.
#[derive(Debug, Clone)]
pub struct UnsignedRedemptionTx {
    pub tx: Transaction,
    pub inputs: Vec<UnsignedInput>,
    pub total_input_sats: u64,
    pub send_amount_sats: u64,
    pub fee_sats: u64,
    pub change_sats: u64,
    /// `SIGHASH_ALL` digest per input, fixed at construction.
    pub sighashes: Vec<[u8; 32]>,
}

impl UnsignedRedemptionTx {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    fn input(&self, input_index: usize) -> Result<&UnsignedInput> {
        self.inputs.get(input_index).ok_or_else(|| {
            RedeemError::InvalidInput(format!(
                "input index {} out of range ({} inputs)",
                input_index,
                self.inputs.len()
            ))
        })
    }

    /// Digest for `input_index` under an arbitrary hash type.
    pub fn sighash(&self, input_index: usize, hash_type: u32) -> Result<[u8; 32]> {
        let input = self.input(input_index)?;
        compute_sighash(
            &self.tx,
            input_index,
            &input.prev_out_script,
            Amount::from_sat(input.value),
            hash_type,
        )
    }

    /// Preimage for `input_index`, the message a double-SHA256 signer hashes.
    pub fn preimage(&self, input_index: usize, hash_type: u32) -> Result<Vec<u8>> {
        let input = self.input(input_index)?;
        sighash_preimage(
            &self.tx,
            input_index,
            &input.prev_out_script,
            Amount::from_sat(input.value),
            hash_type,
        )
    }

    /// Check the witness installed on `input_index` against its digest.
    pub fn verify_input(&self, input_index: usize) -> Result<()> {
        let input = self.input(input_index)?;
        verify_witness(
            &self.tx,
            input_index,
            &input.prev_out_script,
            Amount::from_sat(input.value),
        )
    }
}

/// Builds redemption transactions paying change back to the bridge.
pub struct TransactionAssembler {
    change_script: ScriptBuf,
}

impl TransactionAssembler {
    /// Create an assembler sending change to `change_script`.
    pub fn new(change_script: ScriptBuf) -> Self {
        Self { change_script }
    }

    /// Build an unsigned transaction paying `amount` to `destination`.
    ///
    /// UTXOs are taken in the order given until they cover `fee + amount`.
    /// Input order matters: the ledger addresses signatures by input index.
    pub fn build_unsigned(
        &self,
        utxos: &[SpendableUtxo],
        destination: ScriptBuf,
        amount: u64,
        fee_policy: FeePolicy,
    ) -> Result<UnsignedRedemptionTx> {
        if amount == 0 {
            return Err(RedeemError::InvalidInput(
                "redemption amount must be positive".to_string(),
            ));
        }

        let fee_sats = fee_policy.fee_sats();
        let target = amount.checked_add(fee_sats).ok_or_else(|| {
            RedeemError::InvalidInput(format!("amount {} plus fee {} overflows", amount, fee_sats))
        })?;

        // Select UTXOs (greedy, in the ledger's order)
        let mut selected: Vec<&SpendableUtxo> = Vec::new();
        let mut total_input: u64 = 0;

        for utxo in utxos {
            if total_input >= target {
                break;
            }
            selected.push(utxo);
            total_input = total_input.saturating_add(utxo.value);
        }

        if total_input < target {
            return Err(RedeemError::InsufficientFunds {
                available: total_input,
                required: target,
            });
        }

        let change_sats = total_input - target;

        let mut tx_inputs = Vec::with_capacity(selected.len());
        let mut inputs = Vec::with_capacity(selected.len());

        for utxo in &selected {
            tx_inputs.push(TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(), // Empty for SegWit
                sequence: Sequence::MAX,
                witness: Witness::default(), // Installed per input once signed
            });

            inputs.push(UnsignedInput {
                outpoint: utxo.outpoint,
                sequence: Sequence::MAX,
                prev_out_script: utxo.script_pubkey.clone(),
                value: utxo.value,
            });
        }

        let mut tx_outputs = vec![TxOut {
            value: Amount::from_sat(amount),
            script_pubkey: destination,
        }];

        if change_sats > 0 {
            tx_outputs.push(TxOut {
                value: Amount::from_sat(change_sats),
                script_pubkey: self.change_script.clone(),
            });
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: tx_inputs,
            output: tx_outputs,
        };

        let mut sighashes = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            sighashes.push(compute_sighash(
                &tx,
                i,
                &input.prev_out_script,
                Amount::from_sat(input.value),
                SIGHASH_ALL,
            )?);
        }

        debug!(
            "Built unsigned redemption tx {} with {} inputs, amount {} sats, fee {} sats, change {} sats",
            tx.compute_txid(),
            inputs.len(),
            amount,
            fee_sats,
            change_sats
        );

        Ok(UnsignedRedemptionTx {
            tx,
            inputs,
            total_input_sats: total_input,
            send_amount_sats: amount,
            fee_sats,
            change_sats,
            sighashes,
        })
    }
}

/// Install the P2WPKH witness `[DER(sig) || hash_type, pubkey]` on one input.
///
/// Each input is witnessed exactly once; a second call for the same input is
/// rejected rather than silently replacing the first signature.
pub fn install_witness(
    tx: &mut Transaction,
    input_index: usize,
    public_key: &[u8],
    signature: &Signature,
    hash_type: u32,
) -> Result<()> {
    let input_count = tx.input.len();
    let txin = tx.input.get_mut(input_index).ok_or_else(|| {
        RedeemError::InvalidInput(format!(
            "input index {} out of range ({} inputs)",
            input_index, input_count
        ))
    })?;

    if !txin.witness.is_empty() {
        return Err(RedeemError::invalid_state(
            format!("input {} without witness", input_index),
            "witness already installed",
        ));
    }

    let hash_type_byte = u8::try_from(hash_type).map_err(|_| {
        RedeemError::InvalidInput(format!("hash type {:#x} does not fit in one byte", hash_type))
    })?;
    let pubkey = parse_compressed_pubkey(public_key)?;

    let mut sig_bytes = signature.to_der()?;
    sig_bytes.push(hash_type_byte);

    let mut witness = Witness::new();
    witness.push(sig_bytes);
    witness.push(pubkey.to_bytes());
    txin.witness = witness;

    Ok(())
}

/// Verify the P2WPKH witness on `input_index` against a freshly computed
/// digest.
pub fn verify_witness(
    tx: &Transaction,
    input_index: usize,
    prev_out_script: &ScriptBuf,
    value: Amount,
) -> Result<()> {
    let txin = tx.input.get(input_index).ok_or_else(|| {
        RedeemError::InvalidInput(format!(
            "input index {} out of range ({} inputs)",
            input_index,
            tx.input.len()
        ))
    })?;

    if txin.witness.len() != 2 {
        return Err(RedeemError::VerificationFailed(format!(
            "input {} witness has {} items, expected 2",
            input_index,
            txin.witness.len()
        )));
    }

    let (sig_item, pubkey_item) = match (txin.witness.nth(0), txin.witness.nth(1)) {
        (Some(sig), Some(pk)) if !sig.is_empty() => (sig, pk),
        _ => {
            return Err(RedeemError::VerificationFailed(format!(
                "input {} witness is malformed",
                input_index
            )))
        }
    };

    let (der, hash_type_byte) = sig_item.split_at(sig_item.len() - 1);
    let signature = ecdsa::Signature::from_der(der).map_err(|e| {
        RedeemError::VerificationFailed(format!("input {} signature is not DER: {}", input_index, e))
    })?;
    let pubkey = parse_compressed_pubkey(pubkey_item)
        .map_err(|e| RedeemError::VerificationFailed(e.to_string()))?;

    if prev_out_script.is_p2wpkh() {
        let expected = ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash());
        if &expected != prev_out_script {
            return Err(RedeemError::VerificationFailed(format!(
                "input {} witness key {} does not match the spent script",
                input_index, pubkey
            )));
        }
    }

    let digest = compute_sighash(
        tx,
        input_index,
        prev_out_script,
        value,
        u32::from(hash_type_byte[0]),
    )?;

    verify_ecdsa(&digest, &signature, &pubkey)
}

/// Serialize a fully witnessed transaction to wire format.
///
/// Idempotent: the transaction is only read.
pub fn finalize(tx: &Transaction) -> Result<Vec<u8>> {
    let missing: Vec<usize> = tx
        .input
        .iter()
        .enumerate()
        .filter(|(_, txin)| txin.witness.is_empty())
        .map(|(i, _)| i)
        .collect();

    if !missing.is_empty() {
        return Err(RedeemError::IncompleteSignatures { missing });
    }

    Ok(serialize(tx))
}
