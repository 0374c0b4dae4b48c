//! Test fixtures: redemption records, the dWallet and a wired-up pipeline.

use super::mock_services::*;
use bitcoin::{Address, Network, ScriptBuf, WPubkeyHash};
use bitcoin::hashes::Hash;
use nbtc_bitcoin::{FeePolicy, LedgerUtxo, SpendableUtxo, TransactionAssembler, SIGHASH_ALL};
use nbtc_orchestrator::{
    network_message, ManualClock, RedeemConfig, RedeemRecord, RedemptionPipeline, SessionWatcher,
    SigningOrchestrator,
};
use nbtc_types::{DWallet, DWalletState, HashScheme, ObjectId};
use std::sync::Arc;

pub const DWALLET: ObjectId = ObjectId::new([0x30; 32]);

pub fn bridge_script() -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&network_public_key().wpubkey_hash())
}

pub fn bridge_address() -> String {
    Address::from_script(&bridge_script(), Network::Regtest)
        .unwrap()
        .to_string()
}

pub fn recipient_script() -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([0x07; 20]))
}

pub fn txid_hex(tag: u8) -> String {
    format!("{:02x}", tag).repeat(32)
}

pub fn dwallet(state: DWalletState) -> DWallet {
    DWallet {
        id: DWALLET,
        cap_id: ObjectId::new([0x31; 32]),
        public_key: network_public_key().to_bytes().to_vec(),
        public_output: vec![0xee; 8],
        state,
    }
}

/// A redemption spending one bridge UTXO per entry of `values`.
pub fn record(redeem_id: u64, values: &[u64], amount: u64, fee: u64) -> RedeemRecord {
    RedeemRecord {
        redeem_id,
        dwallet_id: DWALLET,
        recipient_script: recipient_script().to_bytes(),
        amount,
        fee,
        inputs: values
            .iter()
            .enumerate()
            .map(|(i, value)| LedgerUtxo {
                txid: txid_hex(i as u8 + 1),
                vout: i as u32,
                value: *value,
                script_pubkey: bridge_script().to_bytes(),
            })
            .collect(),
        change_script: bridge_script().to_bytes(),
    }
}

/// The per-input messages the contract reports for `record`.
pub fn ledger_messages(record: &RedeemRecord, scheme: HashScheme) -> Vec<Vec<u8>> {
    let utxos: Vec<SpendableUtxo> = record
        .inputs
        .iter()
        .map(|u| SpendableUtxo::try_from(u).unwrap())
        .collect();
    let unsigned = match TransactionAssembler::new(bridge_script()).build_unsigned(
        &utxos,
        recipient_script(),
        record.amount,
        FeePolicy::Fixed(record.fee),
    ) {
        Ok(unsigned) => unsigned,
        Err(_) => return Vec::new(),
    };

    (0..unsigned.inputs.len())
        .map(|i| network_message(scheme, &unsigned.preimage(i, SIGHASH_ALL).unwrap()))
        .collect()
}

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub esplora: Arc<MockEsplora>,
    pub clock: Arc<ManualClock>,
    pub pipeline: RedemptionPipeline<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RedeemConfig::default())
    }

    pub fn with_config(config: RedeemConfig) -> Self {
        let chain = Arc::new(MockChain::new(config.hash_scheme));
        chain.add_dwallet(dwallet(DWalletState::Active));
        let esplora = Arc::new(MockEsplora::default());
        let clock = Arc::new(ManualClock::new());

        let orchestrator = Arc::new(SigningOrchestrator::with_watcher(
            &config,
            chain.clone(),
            chain.clone(),
            Arc::new(PassthroughSigner),
            SessionWatcher::with_clock(clock.clone()),
        ));
        let pipeline = RedemptionPipeline::new(config, chain.clone(), esplora.clone(), orchestrator);

        Self {
            chain,
            esplora,
            clock,
            pipeline,
        }
    }

    /// Put `record` on the ledger and its UTXOs on the Bitcoin side.
    pub fn add_redeem(&self, record: RedeemRecord) {
        for utxo in &record.inputs {
            self.esplora
                .add_utxo(&bridge_address(), &utxo.txid, utxo.vout, utxo.value);
        }
        let messages = ledger_messages(&record, self.pipeline.config().hash_scheme);
        self.chain.add_redeem(record, messages);
    }
}
