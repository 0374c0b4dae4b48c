//! In-memory stand-ins for the ledger, the signing network, the user share
//! signer and Esplora.
//!
//! [`MockChain`] plays the ledger and the network at once so that a sign
//! request submitted through the ledger shows up as a network sign session.
//! The network "signs" with a fixed secp256k1 key.

use async_trait::async_trait;
use bitcoin::consensus::deserialize;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::{CompressedPublicKey, Transaction, Txid};
use nbtc_bitcoin::{double_sha256, sha256, Utxo, UtxoSource, UtxoStatus};
use nbtc_orchestrator::{
    DWalletSessionEvent, EnvelopeCodec, Ledger, PresignRequestEvent, RedeemRecord, SessionType,
    SignRequestEvent, SigningNetwork, UserShareSigner,
};
use nbtc_types::{
    Curve, DWallet, DWalletState, HashScheme, ObjectId, PresignState, Presignature, RedeemError,
    Result, SignSessionRecord, SignSessionState, Signature, SignatureAlgorithm,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;

pub const NETWORK_KEY: [u8; 32] = [0x42; 32];

pub fn network_secret() -> SecretKey {
    SecretKey::from_slice(&NETWORK_KEY).unwrap()
}

pub fn network_public_key() -> CompressedPublicKey {
    CompressedPublicKey(network_secret().public_key(&Secp256k1::new()))
}

#[derive(Debug, Clone)]
struct PresignEntry {
    cap_id: ObjectId,
    polls_left: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedSign {
    pub redeem_id: u64,
    pub input_index: usize,
    pub presign_id: ObjectId,
    pub sign_id: ObjectId,
}

#[derive(Default)]
struct ChainState {
    redeems: HashMap<u64, RedeemRecord>,
    sig_hashes: HashMap<(u64, usize), Vec<u8>>,
    dwallets: HashMap<ObjectId, DWallet>,
    presigns: HashMap<ObjectId, PresignEntry>,
    sessions: HashMap<ObjectId, SignSessionRecord>,
    submitted: Vec<SubmittedSign>,
    recorded: Vec<(u64, usize, ObjectId)>,
    registered: Vec<(ObjectId, Vec<u8>, Vec<u8>)>,
    active_dwallet: Option<ObjectId>,
    composed: HashMap<u64, Vec<u8>>,
    reject_sign_for: Option<(u64, usize)>,
}

/// Ledger plus signing network, sharing one state.
pub struct MockChain {
    state: Mutex<ChainState>,
    hash_scheme: HashScheme,
    next_id: AtomicU8,
    /// Polls a new presignature stays `Requested` before completing.
    pub presign_delay: AtomicU32,
    /// Presignatures never complete.
    pub stall_presigns: AtomicBool,
    /// Sign request events come back cut short.
    pub truncate_sign_events: AtomicBool,
    pub presign_requests: AtomicU32,
}

impl MockChain {
    pub fn new(hash_scheme: HashScheme) -> Self {
        Self {
            state: Mutex::new(ChainState::default()),
            hash_scheme,
            next_id: AtomicU8::new(0x80),
            presign_delay: AtomicU32::new(0),
            stall_presigns: AtomicBool::new(false),
            truncate_sign_events: AtomicBool::new(false),
            presign_requests: AtomicU32::new(0),
        }
    }

    fn fresh_id(&self) -> ObjectId {
        ObjectId::new([self.next_id.fetch_add(1, Ordering::SeqCst); 32])
    }

    pub fn add_dwallet(&self, dwallet: DWallet) {
        self.state.lock().unwrap().dwallets.insert(dwallet.id, dwallet);
    }

    pub fn set_dwallet_state(&self, dwallet_id: ObjectId, state: DWalletState) {
        if let Some(d) = self.state.lock().unwrap().dwallets.get_mut(&dwallet_id) {
            d.state = state;
        }
    }

    pub fn add_redeem(&self, record: RedeemRecord, sig_hashes: Vec<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        for (i, message) in sig_hashes.into_iter().enumerate() {
            state.sig_hashes.insert((record.redeem_id, i), message);
        }
        state.redeems.insert(record.redeem_id, record);
    }

    pub fn set_sig_hash(&self, redeem_id: u64, input_index: usize, message: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .sig_hashes
            .insert((redeem_id, input_index), message);
    }

    pub fn set_composed(&self, redeem_id: u64, raw: Vec<u8>) {
        self.state.lock().unwrap().composed.insert(redeem_id, raw);
    }

    pub fn reject_sign_for(&self, target: Option<(u64, usize)>) {
        self.state.lock().unwrap().reject_sign_for = target;
    }

    pub fn submitted(&self) -> Vec<SubmittedSign> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn recorded(&self) -> Vec<(u64, usize, ObjectId)> {
        self.state.lock().unwrap().recorded.clone()
    }

    pub fn registered(&self) -> Vec<(ObjectId, Vec<u8>, Vec<u8>)> {
        self.state.lock().unwrap().registered.clone()
    }

    pub fn active_dwallet(&self) -> Option<ObjectId> {
        self.state.lock().unwrap().active_dwallet
    }

    /// Digest the network signs for `message` under this chain's scheme.
    fn signed_digest(&self, message: &[u8]) -> [u8; 32] {
        match self.hash_scheme {
            HashScheme::DoubleSha256 => double_sha256(message),
            HashScheme::Sha256 => sha256(message),
        }
    }

    fn session_event<E>(&self, event_data: E) -> DWalletSessionEvent<E> {
        DWalletSessionEvent {
            epoch: 1,
            session_object_id: self.fresh_id(),
            session_type: SessionType::User,
            session_sequence_number: 1,
            session_identifier_preimage: vec![0x01; 32],
            event_data,
        }
    }
}

#[async_trait]
impl Ledger for MockChain {
    async fn redeem_request(&self, redeem_id: u64) -> Result<RedeemRecord> {
        self.state
            .lock()
            .unwrap()
            .redeems
            .get(&redeem_id)
            .cloned()
            .ok_or_else(|| RedeemError::InvalidInput(format!("no redeem request {}", redeem_id)))
    }

    async fn sig_hash(&self, redeem_id: u64, input_index: usize) -> Result<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .sig_hashes
            .get(&(redeem_id, input_index))
            .cloned()
            .ok_or_else(|| RedeemError::InvalidInput("no such input".to_string()))
    }

    async fn request_utxo_sig(
        &self,
        redeem_id: u64,
        input_index: usize,
        presign_cap_id: ObjectId,
        message_centralized_signature: &[u8],
    ) -> Result<String> {
        let sign_id = self.fresh_id();
        let mut state = self.state.lock().unwrap();

        let presign_id = state
            .presigns
            .iter()
            .find(|(_, p)| p.cap_id == presign_cap_id)
            .map(|(id, _)| *id)
            .ok_or_else(|| RedeemError::invalid_state("known presign cap", presign_cap_id))?;
        if state.submitted.iter().any(|s| s.presign_id == presign_id) {
            return Err(RedeemError::invalid_state("unused presignature", "spent"));
        }
        let dwallet_id = state
            .redeems
            .get(&redeem_id)
            .map(|r| r.dwallet_id)
            .ok_or_else(|| RedeemError::InvalidInput(format!("no redeem request {}", redeem_id)))?;

        // The user signer hands the message through as its centralized signature
        let message = message_centralized_signature.to_vec();
        let digest = self.signed_digest(&message);
        let sig = Secp256k1::new().sign_ecdsa(&Message::from_digest(digest), &network_secret());

        let session_state = if state.reject_sign_for == Some((redeem_id, input_index)) {
            SignSessionState::Rejected
        } else {
            SignSessionState::Completed {
                signature: EnvelopeCodec::encode_signature(&Signature::from(sig))?,
            }
        };
        state.sessions.insert(
            sign_id,
            SignSessionRecord {
                sign_id,
                dwallet_id,
                state: session_state,
            },
        );
        state.submitted.push(SubmittedSign {
            redeem_id,
            input_index,
            presign_id,
            sign_id,
        });
        drop(state);

        let event = self.session_event(SignRequestEvent {
            sign_id,
            dwallet_id,
            presign_id,
            curve: Curve::Secp256k1,
            signature_algorithm: SignatureAlgorithm::Ecdsa,
            hash_scheme: self.hash_scheme,
            message: message.clone(),
            message_centralized_signature: message,
            is_future_sign: false,
        });
        let mut bytes = EnvelopeCodec::encode(&event)?;
        if self.truncate_sign_events.load(Ordering::SeqCst) {
            bytes.truncate(bytes.len() / 2);
        }
        Ok(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            bytes,
        ))
    }

    async fn record_signature(
        &self,
        redeem_id: u64,
        input_indices: &[usize],
        sign_ids: &[ObjectId],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for (input_index, sign_id) in input_indices.iter().zip(sign_ids) {
            state.recorded.push((redeem_id, *input_index, *sign_id));
        }
        Ok(())
    }

    async fn compose_tx(&self, redeem_id: u64) -> Result<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .composed
            .get(&redeem_id)
            .cloned()
            .ok_or_else(|| RedeemError::invalid_state("all signatures recorded", "missing"))
    }

    async fn fill_presign(&self) -> Result<u32> {
        Ok(3)
    }

    async fn add_dwallet(
        &self,
        dwallet_id: ObjectId,
        lock_script: &[u8],
        public_key: &[u8],
    ) -> Result<()> {
        self.state.lock().unwrap().registered.push((
            dwallet_id,
            lock_script.to_vec(),
            public_key.to_vec(),
        ));
        Ok(())
    }

    async fn set_active_dwallet(&self, dwallet_id: ObjectId) -> Result<()> {
        self.state.lock().unwrap().active_dwallet = Some(dwallet_id);
        Ok(())
    }
}

#[async_trait]
impl SigningNetwork for MockChain {
    async fn request_global_presign(
        &self,
        curve: Curve,
        algorithm: SignatureAlgorithm,
    ) -> Result<String> {
        self.presign_requests.fetch_add(1, Ordering::SeqCst);
        let presign_id = self.fresh_id();
        let cap_id = self.fresh_id();
        self.state.lock().unwrap().presigns.insert(
            presign_id,
            PresignEntry {
                cap_id,
                polls_left: self.presign_delay.load(Ordering::SeqCst),
            },
        );

        let event = self.session_event(PresignRequestEvent {
            presign_id,
            dwallet_id: None,
            curve,
            signature_algorithm: algorithm,
            dwallet_network_encryption_key_id: ObjectId::new([0x0e; 32]),
        });
        EnvelopeCodec::encode_base64(&event)
    }

    async fn get_presign(&self, presign_id: ObjectId) -> Result<Presignature> {
        let stalled = self.stall_presigns.load(Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let entry = state
            .presigns
            .get_mut(&presign_id)
            .ok_or_else(|| RedeemError::NetworkRequestFailed("object not found".to_string()))?;

        let presign_state = if stalled || entry.polls_left > 0 {
            entry.polls_left = entry.polls_left.saturating_sub(1);
            PresignState::Requested
        } else {
            PresignState::Completed
        };

        Ok(Presignature {
            presign_id,
            cap_id: entry.cap_id,
            state: presign_state,
            output: (presign_state == PresignState::Completed).then(|| vec![0xcc; 16]),
        })
    }

    async fn get_dwallet(&self, dwallet_id: ObjectId) -> Result<DWallet> {
        self.state
            .lock()
            .unwrap()
            .dwallets
            .get(&dwallet_id)
            .cloned()
            .ok_or_else(|| RedeemError::NetworkRequestFailed("object not found".to_string()))
    }

    async fn get_sign_session(&self, sign_id: ObjectId) -> Result<SignSessionRecord> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(&sign_id)
            .cloned()
            .ok_or_else(|| RedeemError::NetworkRequestFailed("object not found".to_string()))
    }
}

/// Returns the message itself as the centralized signature.
pub struct PassthroughSigner;

#[async_trait]
impl UserShareSigner for PassthroughSigner {
    async fn create_user_sign_message(
        &self,
        _dwallet: &DWallet,
        presign_output: &[u8],
        message: &[u8],
        _hash_scheme: HashScheme,
        _algorithm: SignatureAlgorithm,
        _curve: Curve,
    ) -> Result<Vec<u8>> {
        assert!(!presign_output.is_empty());
        Ok(message.to_vec())
    }
}

/// Esplora stand-in holding UTXOs per address and recording broadcasts.
#[derive(Default)]
pub struct MockEsplora {
    utxos: Mutex<HashMap<String, Vec<Utxo>>>,
    broadcasts: Mutex<Vec<Vec<u8>>>,
}

impl MockEsplora {
    pub fn add_utxo(&self, address: &str, txid: &str, vout: u32, value: u64) {
        self.utxos
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push(Utxo {
                txid: txid.to_string(),
                vout,
                value,
                status: UtxoStatus {
                    confirmed: true,
                    block_height: Some(800_000),
                },
            });
    }

    pub fn clear(&self, address: &str) {
        self.utxos.lock().unwrap().remove(address);
    }

    pub fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl UtxoSource for MockEsplora {
    async fn fetch_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid> {
        let tx: Transaction = deserialize(raw_tx)
            .map_err(|e| RedeemError::NetworkRequestFailed(format!("rejected: {}", e)))?;
        self.broadcasts.lock().unwrap().push(raw_tx.to_vec());
        Ok(tx.compute_txid())
    }
}
