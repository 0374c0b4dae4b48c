//! Bitcoin side of the redemption flow.
//!
//! - [`sighash`]: segwit v0 signature digests
//! - [`assembler`]: unsigned transaction construction, witness installation
//!   and finalization
//! - [`esplora`]: UTXO discovery and broadcast
//! - [`address`]: dWallet address and lock script derivation

pub mod address;
pub mod assembler;
pub mod crypto;
pub mod esplora;
pub mod sighash;
pub mod types;

pub use address::{p2wpkh_metadata, parse_address, DWalletMetadata};
pub use assembler::{
    finalize, install_witness, verify_witness, FeePolicy, TransactionAssembler, UnsignedInput,
    UnsignedRedemptionTx,
};
pub use crypto::{double_sha256, parse_compressed_pubkey, sha256, verify_ecdsa};
pub use esplora::{spendable_utxos, EsploraClient, UtxoSource};
pub use sighash::{
    compute_sighash, script_code, sighash_preimage, SIGHASH_ALL, SIGHASH_ANYONECANPAY,
    SIGHASH_NONE, SIGHASH_SINGLE,
};
pub use types::{parse_txid, BitcoinNetwork, LedgerUtxo, SpendableUtxo, Utxo, UtxoStatus};
