//! Segwit v0 signature digest (BIP-143).
//!
//! The digest is consensus-critical: a single wrong byte produces a signature
//! the network rejects, or worse, one that commits to different outputs than
//! intended. The computation is therefore kept free of I/O and state so that
//! it can be checked byte-for-byte in tests.
//!
//! Preimage layout:
//!
//! ```text
//! version | hashPrevouts | hashSequence | outpoint | scriptCode | value
//!         | sequence | hashOutputs | locktime | hashType
//! ```

use bitcoin::consensus::serialize;
use bitcoin::{Amount, Script, ScriptBuf, Transaction};
use nbtc_types::{RedeemError, Result};

use crate::crypto::double_sha256;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Placeholder for hash terms excluded by the hash type.
const ZERO_HASH: [u8; 32] = [0u8; 32];

/// Mask selecting the base type (ALL / NONE / SINGLE) from a hash type.
const BASE_TYPE_MASK: u32 = 0x1f;

/// Script code signed for a segwit v0 input.
///
/// A P2WPKH program `0 <20-byte hash>` is expanded to the equivalent P2PKH
/// script. Any other script is taken to be the witness script itself.
pub fn script_code(prev_out_script: &Script) -> ScriptBuf {
    if prev_out_script.is_p2wpkh() {
        let program = &prev_out_script.as_bytes()[2..22];
        let mut code = Vec::with_capacity(25);
        code.extend_from_slice(&[0x76, 0xa9, 0x14]); // OP_DUP OP_HASH160 PUSH20
        code.extend_from_slice(program);
        code.extend_from_slice(&[0x88, 0xac]); // OP_EQUALVERIFY OP_CHECKSIG
        ScriptBuf::from_bytes(code)
    } else {
        prev_out_script.to_owned()
    }
}

/// Build the canonical preimage for `input_index`.
pub fn sighash_preimage(
    tx: &Transaction,
    input_index: usize,
    prev_out_script: &Script,
    value: Amount,
    hash_type: u32,
) -> Result<Vec<u8>> {
    let input = tx.input.get(input_index).ok_or_else(|| {
        RedeemError::InvalidInput(format!(
            "input index {} out of range ({} inputs)",
            input_index,
            tx.input.len()
        ))
    })?;

    let anyone_can_pay = hash_type & SIGHASH_ANYONECANPAY != 0;
    let base_type = hash_type & BASE_TYPE_MASK;

    let hash_prevouts = if anyone_can_pay {
        ZERO_HASH
    } else {
        let mut buf = Vec::with_capacity(36 * tx.input.len());
        for txin in &tx.input {
            buf.extend(serialize(&txin.previous_output));
        }
        double_sha256(&buf)
    };

    let hash_sequence =
        if anyone_can_pay || base_type == SIGHASH_SINGLE || base_type == SIGHASH_NONE {
            ZERO_HASH
        } else {
            let mut buf = Vec::with_capacity(4 * tx.input.len());
            for txin in &tx.input {
                buf.extend(serialize(&txin.sequence));
            }
            double_sha256(&buf)
        };

    let hash_outputs = if base_type != SIGHASH_SINGLE && base_type != SIGHASH_NONE {
        let mut buf = Vec::new();
        for txout in &tx.output {
            buf.extend(serialize(txout));
        }
        double_sha256(&buf)
    } else if base_type == SIGHASH_SINGLE && input_index < tx.output.len() {
        double_sha256(&serialize(&tx.output[input_index]))
    } else {
        // SINGLE without a matching output commits to no outputs at all.
        ZERO_HASH
    };

    let mut preimage = Vec::with_capacity(156 + prev_out_script.len());
    preimage.extend(serialize(&tx.version));
    preimage.extend_from_slice(&hash_prevouts);
    preimage.extend_from_slice(&hash_sequence);
    preimage.extend(serialize(&input.previous_output));
    preimage.extend(serialize(&script_code(prev_out_script)));
    preimage.extend_from_slice(&value.to_sat().to_le_bytes());
    preimage.extend(serialize(&input.sequence));
    preimage.extend_from_slice(&hash_outputs);
    preimage.extend(serialize(&tx.lock_time));
    preimage.extend_from_slice(&hash_type.to_le_bytes());

    Ok(preimage)
}

/// Compute the 32-byte digest to be signed for `input_index`.
pub fn compute_sighash(
    tx: &Transaction,
    input_index: usize,
    prev_out_script: &Script,
    value: Amount,
    hash_type: u32,
) -> Result<[u8; 32]> {
    let preimage = sighash_preimage(tx, input_index, prev_out_script, value, hash_type)?;
    Ok(double_sha256(&preimage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::sighash::{EcdsaSighashType, SighashCache};
    use bitcoin::transaction::Version;
    use bitcoin::{absolute, OutPoint, Sequence, TxIn, TxOut, Txid, Witness};

    fn p2wpkh(tag: u8) -> ScriptBuf {
        let mut bytes = vec![0x00, 0x14];
        bytes.extend_from_slice(&[tag; 20]);
        ScriptBuf::from_bytes(bytes)
    }

    fn input(tag: u8, sequence: u32) -> TxIn {
        TxIn {
            previous_output: OutPoint {
                txid: Txid::from_byte_array([tag; 32]),
                vout: tag as u32,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence(sequence),
            witness: Witness::default(),
        }
    }

    fn output(value: u64, tag: u8) -> TxOut {
        TxOut {
            value: Amount::from_sat(value),
            script_pubkey: p2wpkh(tag),
        }
    }

    fn sample_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: absolute::LockTime::from_consensus(101),
            input: vec![input(1, 0xffff_fffe), input(2, 0xffff_ffff), input(3, 0xffff_fffd)],
            output: vec![output(50_000, 0xa0), output(49_850, 0xb0)],
        }
    }

    const ALL_TYPES: [(u32, EcdsaSighashType); 6] = [
        (SIGHASH_ALL, EcdsaSighashType::All),
        (SIGHASH_NONE, EcdsaSighashType::None),
        (SIGHASH_SINGLE, EcdsaSighashType::Single),
        (SIGHASH_ALL | SIGHASH_ANYONECANPAY, EcdsaSighashType::AllPlusAnyoneCanPay),
        (SIGHASH_NONE | SIGHASH_ANYONECANPAY, EcdsaSighashType::NonePlusAnyoneCanPay),
        (SIGHASH_SINGLE | SIGHASH_ANYONECANPAY, EcdsaSighashType::SinglePlusAnyoneCanPay),
    ];

    #[test]
    fn test_matches_bitcoin_crate_for_every_hash_type() {
        let tx = sample_tx();
        let script = p2wpkh(0x11);
        let value = Amount::from_sat(100_000);

        // Inputs 0 and 1 have a matching output, so SINGLE is well-defined.
        for index in 0..2 {
            for (raw, typed) in ALL_TYPES {
                let ours = compute_sighash(&tx, index, &script, value, raw).unwrap();
                let reference = SighashCache::new(&tx)
                    .p2wpkh_signature_hash(index, &script, value, typed)
                    .unwrap();
                assert_eq!(
                    ours,
                    reference.to_byte_array(),
                    "mismatch for input {} hash type {:#x}",
                    index,
                    raw
                );
            }
        }
    }

    #[test]
    fn test_bip143_native_p2wpkh_vector() {
        // Second input of the native P2WPKH example in BIP-143.
        let unsigned = hex::decode(
            "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000",
        )
        .unwrap();
        let tx: Transaction = bitcoin::consensus::deserialize(&unsigned).unwrap();
        let script =
            ScriptBuf::from_bytes(hex::decode("00141d0f172a0ecb48aee1be1f2687d2963ae33f71a1").unwrap());

        let preimage =
            sighash_preimage(&tx, 1, &script, Amount::from_sat(600_000_000), SIGHASH_ALL).unwrap();
        assert_eq!(
            hex::encode(&preimage),
            "0100000096b827c8483d4e9b96712b6713a7b68d6e8003a781feba36c31143470b4efd3752b0a642eea2fb7ae638c36f6252b6750293dbe574a806984b8e4d8548339a3bef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a010000001976a9141d0f172a0ecb48aee1be1f2687d2963ae33f71a188ac0046c32300000000ffffffff863ef3e1a92afbfdb97f31ad0fc7683ee943e9abcf2501590ff8f6551f47e5e51100000001000000"
        );

        let digest =
            compute_sighash(&tx, 1, &script, Amount::from_sat(600_000_000), SIGHASH_ALL).unwrap();
        assert_eq!(
            hex::encode(digest),
            "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670"
        );
    }

    #[test]
    fn test_deterministic() {
        let tx = sample_tx();
        let script = p2wpkh(0x11);
        for (raw, _) in ALL_TYPES {
            let a = compute_sighash(&tx, 0, &script, Amount::from_sat(1), raw).unwrap();
            let b = compute_sighash(&tx, 0, &script, Amount::from_sat(1), raw).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_all_commits_to_every_output_value() {
        let tx = sample_tx();
        let script = p2wpkh(0x11);
        let value = Amount::from_sat(100_000);
        let base = compute_sighash(&tx, 0, &script, value, SIGHASH_ALL).unwrap();

        for i in 0..tx.output.len() {
            let mut changed = tx.clone();
            changed.output[i].value = changed.output[i].value + Amount::from_sat(1);
            let digest = compute_sighash(&changed, 0, &script, value, SIGHASH_ALL).unwrap();
            assert_ne!(digest, base, "output {} not committed", i);
        }
    }

    #[test]
    fn test_sequence_of_other_inputs() {
        let tx = sample_tx();
        let script = p2wpkh(0x11);
        let value = Amount::from_sat(100_000);

        let mut changed = tx.clone();
        changed.input[2].sequence = Sequence(0);

        // Covered by ALL.
        assert_ne!(
            compute_sighash(&tx, 0, &script, value, SIGHASH_ALL).unwrap(),
            compute_sighash(&changed, 0, &script, value, SIGHASH_ALL).unwrap()
        );

        // Not covered once ANYONECANPAY drops the other inputs.
        let acp = SIGHASH_ALL | SIGHASH_ANYONECANPAY;
        assert_eq!(
            compute_sighash(&tx, 0, &script, value, acp).unwrap(),
            compute_sighash(&changed, 0, &script, value, acp).unwrap()
        );
    }

    #[test]
    fn test_value_is_committed() {
        let tx = sample_tx();
        let script = p2wpkh(0x11);
        assert_ne!(
            compute_sighash(&tx, 0, &script, Amount::from_sat(100_000), SIGHASH_ALL).unwrap(),
            compute_sighash(&tx, 0, &script, Amount::from_sat(100_001), SIGHASH_ALL).unwrap()
        );
    }

    #[test]
    fn test_single_without_matching_output_zeroes_hash_outputs() {
        let tx = sample_tx();
        let script = p2wpkh(0x11);
        let value = Amount::from_sat(100_000);
        assert!(2 >= tx.output.len());

        let preimage = sighash_preimage(&tx, 2, &script, value, SIGHASH_SINGLE).unwrap();
        // version(4) + prevouts(32) + sequence(32) + outpoint(36) + scriptCode(26)
        // + value(8) + nSequence(4)
        let offset = 4 + 32 + 32 + 36 + 26 + 8 + 4;
        assert_eq!(&preimage[offset..offset + 32], &ZERO_HASH);
        assert_eq!(&preimage[36..68], &ZERO_HASH, "hashSequence must be zeroed");

        // No output is committed, so changing any of them leaves the digest alone.
        let base = compute_sighash(&tx, 2, &script, value, SIGHASH_SINGLE).unwrap();
        let mut changed = tx.clone();
        changed.output[0].value = Amount::from_sat(1);
        changed.output[1].value = Amount::from_sat(2);
        assert_eq!(
            compute_sighash(&changed, 2, &script, value, SIGHASH_SINGLE).unwrap(),
            base
        );
    }

    #[test]
    fn test_none_ignores_outputs() {
        let tx = sample_tx();
        let script = p2wpkh(0x11);
        let value = Amount::from_sat(100_000);
        let mut changed = tx.clone();
        changed.output.pop();

        assert_eq!(
            compute_sighash(&tx, 0, &script, value, SIGHASH_NONE).unwrap(),
            compute_sighash(&changed, 0, &script, value, SIGHASH_NONE).unwrap()
        );
    }

    #[test]
    fn test_input_index_out_of_range() {
        let tx = sample_tx();
        let err = compute_sighash(&tx, 3, &p2wpkh(0x11), Amount::ZERO, SIGHASH_ALL).unwrap_err();
        assert!(matches!(err, RedeemError::InvalidInput(_)));
    }

    #[test]
    fn test_script_code_expands_p2wpkh() {
        let code = script_code(&p2wpkh(0x42));
        let bytes = code.as_bytes();
        assert_eq!(bytes.len(), 25);
        assert_eq!(&bytes[..3], &[0x76, 0xa9, 0x14]);
        assert_eq!(&bytes[3..23], &[0x42; 20]);
        assert_eq!(&bytes[23..], &[0x88, 0xac]);

        let witness_script = ScriptBuf::from_bytes(vec![0x51]);
        assert_eq!(script_code(&witness_script), witness_script);
    }
}
