//! Redemption Pipeline
//!
//! Ties the pieces together for one redemption request:
//!
//! 1. **Load**: read the request from the ledger and rebuild the unsigned
//!    transaction locally, fixing every input's digest
//! 2. **Sign**: run the signing flow for each input, one at a time
//! 3. **Finalize**: install the witnesses, verify them, serialize, broadcast
//!
//! A [`RedemptionRequest`] keeps every verified signature it has been given,
//! so a failed run can be resumed without signing anything twice. Requests on
//! the same dWallet are serialised; requests on different dWallets may run
//! side by side.

use bitcoin::{Address, ScriptBuf, Txid};
use nbtc_bitcoin::{
    finalize, install_witness, p2wpkh_metadata, parse_compressed_pubkey, spendable_utxos,
    DWalletMetadata, FeePolicy, SpendableUtxo, TransactionAssembler, UnsignedRedemptionTx,
    UtxoSource, SIGHASH_ALL,
};
use nbtc_types::{ObjectId, RedeemError, Result, SigningSession};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::RedeemConfig;
use crate::ledger::{Ledger, RedeemRecord};
use crate::presign_pool::PresignPool;
use crate::signing::{network_message, ExpectedSignature, InputSignature, SignContext, SigningOrchestrator};

// ============================================================================
// Redemption request
// ============================================================================

/// A redemption being signed, with whatever signatures it has so far.
#[derive(Debug, Clone)]
pub struct RedemptionRequest {
    pub redeem_id: u64,
    pub dwallet_id: ObjectId,
    pub destination: ScriptBuf,
    pub unsigned: UnsignedRedemptionTx,
    signatures: Vec<Option<InputSignature>>,
    sessions: Vec<Option<SigningSession>>,
    /// Presignatures a failed run obtained but never submitted.
    unspent_presigns: Vec<Option<ObjectId>>,
}

impl RedemptionRequest {
    pub fn new(
        redeem_id: u64,
        dwallet_id: ObjectId,
        destination: ScriptBuf,
        unsigned: UnsignedRedemptionTx,
    ) -> Self {
        let inputs = unsigned.inputs.len();
        Self {
            redeem_id,
            dwallet_id,
            destination,
            unsigned,
            signatures: vec![None; inputs],
            sessions: vec![None; inputs],
            unspent_presigns: vec![None; inputs],
        }
    }

    pub fn input_count(&self) -> usize {
        self.signatures.len()
    }

    /// Digest input `input_index` must be signed over.
    pub fn digest(&self, input_index: usize) -> Result<[u8; 32]> {
        self.unsigned
            .sighashes
            .get(input_index)
            .copied()
            .ok_or_else(|| {
                RedeemError::InvalidInput(format!(
                    "input index {} out of range ({} inputs)",
                    input_index,
                    self.input_count()
                ))
            })
    }

    pub fn signature(&self, input_index: usize) -> Option<&InputSignature> {
        self.signatures.get(input_index).and_then(Option::as_ref)
    }

    /// The last signing session run for an input, if any.
    pub fn session(&self, input_index: usize) -> Option<&SigningSession> {
        self.sessions.get(input_index).and_then(Option::as_ref)
    }

    /// The presignature a failed run left unsubmitted for an input.
    pub fn unspent_presign(&self, input_index: usize) -> Option<ObjectId> {
        self.unspent_presigns.get(input_index).copied().flatten()
    }

    fn take_unspent_presign(&mut self, input_index: usize) -> Option<ObjectId> {
        self.unspent_presigns.get_mut(input_index).and_then(Option::take)
    }

    fn keep_unspent_presign(&mut self, input_index: usize, presign_id: ObjectId) {
        if let Some(slot) = self.unspent_presigns.get_mut(input_index) {
            *slot = Some(presign_id);
        }
    }

    fn record_session(&mut self, session: SigningSession) {
        if let Some(slot) = self.sessions.get_mut(session.input_index) {
            *slot = Some(session);
        }
    }

    /// Attach a verified signature to its input.
    ///
    /// The signature must have been verified against the digest fixed when
    /// the request was loaded, and each input takes one signature only.
    pub fn attach(&mut self, input_index: usize, signature: InputSignature) -> Result<()> {
        let digest = self.digest(input_index)?;
        if signature.digest != digest {
            return Err(RedeemError::VerificationFailed(format!(
                "signature for input {} covers digest {}, expected {}",
                input_index,
                hex::encode(signature.digest),
                hex::encode(digest)
            )));
        }

        let slot = &mut self.signatures[input_index];
        if slot.is_some() {
            return Err(RedeemError::invalid_state(
                format!("input {} unsigned", input_index),
                "signature already attached",
            ));
        }
        *slot = Some(signature);
        Ok(())
    }

    pub fn missing_inputs(&self) -> Vec<usize> {
        self.signatures
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.signatures.iter().all(Option::is_some)
    }

    /// Install every witness, verify each input, and serialize.
    pub fn finalize(&self, public_key: &[u8]) -> Result<Vec<u8>> {
        let missing = self.missing_inputs();
        if !missing.is_empty() {
            return Err(RedeemError::IncompleteSignatures { missing });
        }

        let mut signed = self.unsigned.clone();
        for (i, slot) in self.signatures.iter().enumerate() {
            if let Some(input) = slot {
                install_witness(&mut signed.tx, i, public_key, &input.signature, SIGHASH_ALL)?;
            }
        }
        for i in 0..signed.inputs.len() {
            signed.verify_input(i)?;
        }

        finalize(&signed.tx)
    }
}

/// Outcome of the first half of a split signing flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignatureRequested {
    pub presign_id: ObjectId,
    pub sign_id: ObjectId,
}

/// Raw transaction composed by the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct ComposedTx {
    pub hex: String,
    pub txid: Option<Txid>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Redemption Pipeline
pub struct RedemptionPipeline<C: Clock = TokioClock> {
    config: RedeemConfig,
    ledger: Arc<dyn Ledger>,
    utxo_source: Arc<dyn UtxoSource>,
    orchestrator: Arc<SigningOrchestrator<C>>,
    presign_pool: Option<Arc<PresignPool<C>>>,
    dwallet_locks: Mutex<HashMap<ObjectId, Arc<AsyncMutex<()>>>>,
}

impl<C: Clock> RedemptionPipeline<C> {
    pub fn new(
        config: RedeemConfig,
        ledger: Arc<dyn Ledger>,
        utxo_source: Arc<dyn UtxoSource>,
        orchestrator: Arc<SigningOrchestrator<C>>,
    ) -> Self {
        Self {
            config,
            ledger,
            utxo_source,
            orchestrator,
            presign_pool: None,
            dwallet_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Draw presignatures from `pool` before requesting new ones.
    pub fn with_presign_pool(mut self, pool: Arc<PresignPool<C>>) -> Self {
        self.presign_pool = Some(pool);
        self
    }

    pub fn config(&self) -> &RedeemConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<SigningOrchestrator<C>> {
        &self.orchestrator
    }

    /// Hold the signing slot of `dwallet_id` until the guard drops.
    pub async fn lock_dwallet(&self, dwallet_id: ObjectId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.dwallet_locks.lock().unwrap_or_else(|e| e.into_inner());
            // Guards and waiters hold clones; an entry only the map holds is idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(dwallet_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// dWallets whose lock entry is still tracked.
    pub fn tracked_dwallets(&self) -> usize {
        self.dwallet_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Read a redemption request and rebuild its unsigned transaction.
    pub async fn load(&self, redeem_id: u64) -> Result<RedemptionRequest> {
        let record = self.ledger.redeem_request(redeem_id).await?;
        if record.redeem_id != redeem_id {
            return Err(RedeemError::invalid_state(
                format!("redeem request {}", redeem_id),
                format!("redeem request {}", record.redeem_id),
            ));
        }

        let utxos = record
            .inputs
            .iter()
            .map(SpendableUtxo::try_from)
            .collect::<Result<Vec<_>>>()?;

        if self.config.verify_utxos_unspent {
            self.ensure_unspent(&utxos).await?;
        }

        let unsigned = self.assemble(&record, &utxos)?;

        info!(
            redeem_id,
            inputs = unsigned.inputs.len(),
            txid = %unsigned.txid(),
            "Loaded redemption request"
        );

        Ok(RedemptionRequest::new(
            redeem_id,
            record.dwallet_id,
            ScriptBuf::from_bytes(record.recipient_script),
            unsigned,
        ))
    }

    fn assemble(&self, record: &RedeemRecord, utxos: &[SpendableUtxo]) -> Result<UnsignedRedemptionTx> {
        // The ledger fixes the fee; the configured policy covers records without one
        let fee_policy = if record.fee > 0 {
            FeePolicy::Fixed(record.fee)
        } else {
            self.config.fee_policy
        };

        let assembler = TransactionAssembler::new(ScriptBuf::from_bytes(record.change_script.clone()));
        let unsigned = assembler.build_unsigned(
            utxos,
            ScriptBuf::from_bytes(record.recipient_script.clone()),
            record.amount,
            fee_policy,
        )?;

        // Signatures are indexed by the ledger's input order
        if unsigned.inputs.len() != utxos.len() {
            return Err(RedeemError::invalid_state(
                format!("all {} proposed inputs spent", utxos.len()),
                format!("{} needed", unsigned.inputs.len()),
            ));
        }

        Ok(unsigned)
    }

    /// Check every ledger UTXO against the Bitcoin network's view.
    ///
    /// Each outpoint must still be unspent and carry the value the ledger
    /// reports, since that value is committed to by the input's digest.
    async fn ensure_unspent(&self, utxos: &[SpendableUtxo]) -> Result<()> {
        let network = self.config.network.to_bitcoin_network();
        let mut scripts: Vec<&ScriptBuf> = Vec::new();
        for utxo in utxos {
            if !scripts.contains(&&utxo.script_pubkey) {
                scripts.push(&utxo.script_pubkey);
            }
        }

        let mut unspent = HashMap::new();
        for script in scripts {
            let address = Address::from_script(script, network).map_err(|e| {
                RedeemError::InvalidInput(format!("ledger UTXO script has no address: {}", e))
            })?;
            for utxo in spendable_utxos(self.utxo_source.as_ref(), &address).await? {
                unspent.insert(utxo.outpoint, utxo.value);
            }
        }

        for utxo in utxos {
            match unspent.get(&utxo.outpoint) {
                None => {
                    return Err(RedeemError::invalid_state(
                        format!("unspent output {}", utxo.outpoint),
                        "spent or unknown",
                    ))
                }
                Some(value) if *value != utxo.value => {
                    return Err(RedeemError::invalid_state(
                        format!("{} sats at {}", utxo.value, utxo.outpoint),
                        format!("{} sats", value),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    // ========================================================================
    // Signing stages
    // ========================================================================

    async fn next_presign_id(&self) -> Result<ObjectId> {
        if let Some(pool) = &self.presign_pool {
            if let Some(presign) = pool.acquire().await {
                return Ok(presign.presign_id);
            }
            debug!("Presignature pool empty, requesting a new one");
        }
        self.orchestrator
            .request_global_presign(self.config.curve, self.config.signature_algorithm)
            .await
    }

    /// The message for `input_index`, checked against the ledger when enabled.
    async fn message_for(&self, request: &RedemptionRequest, input_index: usize) -> Result<Vec<u8>> {
        let preimage = request.unsigned.preimage(input_index, SIGHASH_ALL)?;
        let message = network_message(self.orchestrator.hash_scheme(), &preimage);

        if self.config.verify_ledger_sighash {
            let ledger_message = self.ledger.sig_hash(request.redeem_id, input_index).await?;
            if ledger_message != message {
                return Err(RedeemError::VerificationFailed(format!(
                    "ledger message for input {} is {}, computed {}",
                    input_index,
                    hex::encode(&ledger_message),
                    hex::encode(&message)
                )));
            }
        }
        Ok(message)
    }

    /// Request a signature for one input without waiting for it.
    pub async fn request_signature(&self, redeem_id: u64, input_index: usize) -> Result<SignatureRequested> {
        let request = self.load(redeem_id).await?;
        let _guard = self.lock_dwallet(request.dwallet_id).await;

        request.digest(input_index)?;
        let message = self.message_for(&request, input_index).await?;
        self.orchestrator.active_dwallet(request.dwallet_id).await?;

        let presign_id = self.next_presign_id().await?;
        let presign = self
            .orchestrator
            .wait_presign_completed(presign_id, self.orchestrator.presign_timeout())
            .await?;

        let central = self
            .orchestrator
            .create_signature_message(request.dwallet_id, &presign, &message)
            .await?;

        let ctx = SignContext {
            redeem_id,
            input_index,
            presign_id,
            presign_cap_id: presign.cap_id,
        };
        let sign_id = self.orchestrator.request_sign(&ctx, &central).await?;

        Ok(SignatureRequested { presign_id, sign_id })
    }

    /// Wait for a requested signature, verify it and record it on the ledger.
    pub async fn verify_sign(
        &self,
        redeem_id: u64,
        input_index: usize,
        sign_id: ObjectId,
    ) -> Result<InputSignature> {
        let request = self.load(redeem_id).await?;
        let digest = request.digest(input_index)?;

        let dwallet = self.orchestrator.active_dwallet(request.dwallet_id).await?;
        let expected = ExpectedSignature {
            digest,
            public_key: parse_compressed_pubkey(&dwallet.public_key)?,
        };

        let signature = self
            .orchestrator
            .wait_sign_completed(sign_id, self.orchestrator.sign_timeout())
            .await?;
        self.orchestrator
            .verify(redeem_id, input_index, sign_id, &signature, &expected)
            .await?;

        Ok(InputSignature {
            sign_id,
            signature,
            digest,
        })
    }

    /// Run the full signing flow for one input and attach the result.
    ///
    /// A presignature left unsubmitted by an earlier failure on this input
    /// is used again; a new one is obtained only when there is none.
    pub async fn sign_input(&self, request: &mut RedemptionRequest, input_index: usize) -> Result<()> {
        if request.signature(input_index).is_some() {
            debug!(redeem_id = request.redeem_id, input_index, "Input already signed");
            return Ok(());
        }

        let digest = request.digest(input_index)?;
        let preimage = request.unsigned.preimage(input_index, SIGHASH_ALL)?;
        self.message_for(request, input_index).await?;
        self.orchestrator.active_dwallet(request.dwallet_id).await?;

        let presign_id = match request.take_unspent_presign(input_index) {
            Some(id) if !self.orchestrator.is_consumed(&id) => {
                info!(
                    redeem_id = request.redeem_id,
                    input_index,
                    presign_id = %id,
                    "Resuming with presignature from the previous attempt"
                );
                id
            }
            _ => self.next_presign_id().await?,
        };
        let mut session =
            self.orchestrator
                .new_session(request.redeem_id, input_index, request.dwallet_id, presign_id);

        let result = self
            .orchestrator
            .sign_input(&mut session, &preimage, digest)
            .await;
        request.record_session(session);

        match result {
            Ok(signature) => request.attach(input_index, signature),
            Err(e) => {
                if self.presign_reusable(presign_id, &e) {
                    request.keep_unspent_presign(input_index, presign_id);
                }
                Err(e)
            }
        }
    }

    /// Whether a presignature can still be used after `err` ended its run.
    fn presign_reusable(&self, presign_id: ObjectId, err: &RedeemError) -> bool {
        if self.orchestrator.is_consumed(&presign_id) {
            return false;
        }
        !matches!(err, RedeemError::SessionAborted { object_id, .. } if *object_id == presign_id.to_string())
    }

    /// Sign every input still missing a signature, in order.
    ///
    /// Stops at the first failure; signatures attached before it are kept.
    pub async fn run(&self, request: &mut RedemptionRequest) -> Result<()> {
        let _guard = self.lock_dwallet(request.dwallet_id).await;

        for input_index in request.missing_inputs() {
            if let Err(e) = self.sign_input(request, input_index).await {
                let reached = request
                    .session(input_index)
                    .map(|s| s.state().to_string())
                    .unwrap_or_else(|| "not started".to_string());
                error!(
                    redeem_id = request.redeem_id,
                    input_index,
                    signed = request.input_count() - request.missing_inputs().len(),
                    "Redemption stopped at input {} ({}): {}",
                    input_index,
                    reached,
                    e
                );
                return Err(e);
            }
        }

        info!(redeem_id = request.redeem_id, "All inputs signed");
        Ok(())
    }

    /// Finalize locally and broadcast.
    pub async fn finalize_and_broadcast(&self, request: &RedemptionRequest) -> Result<Txid> {
        let dwallet = self.orchestrator.active_dwallet(request.dwallet_id).await?;
        let raw = request.finalize(&dwallet.public_key)?;

        let txid = self.utxo_source.broadcast(&raw).await?;
        info!(redeem_id = request.redeem_id, txid = %txid, "Redemption broadcast");
        Ok(txid)
    }

    /// Load, sign every input, finalize and broadcast.
    pub async fn redeem(&self, redeem_id: u64) -> Result<Txid> {
        let mut request = self.load(redeem_id).await?;
        self.run(&mut request).await?;
        self.finalize_and_broadcast(&request).await
    }

    /// Fetch the transaction the ledger composed from recorded signatures.
    pub async fn raw_redeem_tx(&self, redeem_id: u64, broadcast: bool) -> Result<ComposedTx> {
        let raw = self.ledger.compose_tx(redeem_id).await?;
        let hex = hex::encode(&raw);

        let txid = if broadcast {
            Some(self.utxo_source.broadcast(&raw).await?)
        } else {
            None
        };

        Ok(ComposedTx { hex, txid })
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Wait for a dWallet to become active and register it with the contract.
    pub async fn init_dwallet(&self, dwallet_id: ObjectId) -> Result<DWalletMetadata> {
        let dwallet = self
            .orchestrator
            .wait_dwallet_active(dwallet_id, self.config.dwallet_poll)
            .await?;

        let metadata = p2wpkh_metadata(&dwallet.public_key, self.config.network)?;
        info!(
            dwallet_id = %dwallet_id,
            address = %metadata.address,
            "dWallet active"
        );

        self.ledger
            .add_dwallet(
                dwallet_id,
                metadata.lock_script.as_bytes(),
                &metadata.public_key.to_bytes(),
            )
            .await?;
        self.ledger.set_active_dwallet(dwallet_id).await?;

        info!(dwallet_id = %dwallet_id, "dWallet registered and activated");
        Ok(metadata)
    }

    /// Top up the contract's presignature buffer.
    pub async fn fill_presign(&self) -> Result<u32> {
        let added = self.ledger.fill_presign().await?;
        if added == 0 {
            warn!("Contract presign buffer already full");
        } else {
            info!("Added {} presignatures to the contract buffer", added);
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
    use bitcoin::{CompressedPublicKey, OutPoint};
    use nbtc_types::Signature;

    fn key() -> (SecretKey, CompressedPublicKey) {
        let sk = SecretKey::from_slice(&[0x42; 32]).unwrap();
        (sk, CompressedPublicKey(sk.public_key(&Secp256k1::new())))
    }

    fn request(values: &[u64], amount: u64) -> RedemptionRequest {
        let (_, pk) = key();
        let script = ScriptBuf::new_p2wpkh(&pk.wpubkey_hash());
        let utxos: Vec<SpendableUtxo> = values
            .iter()
            .enumerate()
            .map(|(i, value)| SpendableUtxo {
                outpoint: OutPoint {
                    txid: bitcoin::Txid::from_byte_array([i as u8 + 1; 32]),
                    vout: 0,
                },
                value: *value,
                script_pubkey: script.clone(),
            })
            .collect();
        let destination = ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([7; 20]));
        let unsigned = TransactionAssembler::new(script)
            .build_unsigned(&utxos, destination.clone(), amount, FeePolicy::Fixed(150))
            .unwrap();
        RedemptionRequest::new(9, ObjectId::new([0x30; 32]), destination, unsigned)
    }

    fn signed(request: &RedemptionRequest, index: usize) -> InputSignature {
        let (sk, _) = key();
        let digest = request.unsigned.sighashes[index];
        let sig = Secp256k1::new().sign_ecdsa(&Message::from_digest(digest), &sk);
        InputSignature {
            sign_id: ObjectId::new([index as u8 + 0x20; 32]),
            signature: Signature::from(sig),
            digest,
        }
    }

    #[test]
    fn test_attach_rejects_wrong_digest() {
        let mut req = request(&[30_000, 30_000], 50_000);
        let mut sig = signed(&req, 0);
        sig.digest = req.unsigned.sighashes[1];

        assert!(matches!(
            req.attach(0, sig),
            Err(RedeemError::VerificationFailed(_))
        ));
        assert_eq!(req.missing_inputs(), vec![0, 1]);
    }

    #[test]
    fn test_attach_twice_is_rejected() {
        let mut req = request(&[100_000], 50_000);
        let sig = signed(&req, 0);

        req.attach(0, sig.clone()).unwrap();
        assert!(req.is_complete());
        assert!(matches!(
            req.attach(0, sig),
            Err(RedeemError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_attach_out_of_range() {
        let mut req = request(&[100_000], 50_000);
        let sig = signed(&req, 0);
        assert!(matches!(req.attach(3, sig), Err(RedeemError::InvalidInput(_))));
    }

    #[test]
    fn test_finalize_reports_missing_inputs() {
        let mut req = request(&[30_000, 30_000, 30_000], 50_000);
        let sig = signed(&req, 1);
        req.attach(1, sig).unwrap();

        let (_, pk) = key();
        match req.finalize(&pk.to_bytes()) {
            Err(RedeemError::IncompleteSignatures { missing }) => assert_eq!(missing, vec![0]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_finalize_is_repeatable() {
        let mut req = request(&[30_000, 30_000], 50_000);
        for i in 0..2 {
            let sig = signed(&req, i);
            req.attach(i, sig).unwrap();
        }

        let (_, pk) = key();
        let first = req.finalize(&pk.to_bytes()).unwrap();
        let second = req.finalize(&pk.to_bytes()).unwrap();
        assert_eq!(first, second);
        assert!(req.unsigned.tx.input.iter().all(|i| i.witness.is_empty()));
    }

    #[test]
    fn test_finalize_rejects_foreign_key() {
        let mut req = request(&[100_000], 50_000);
        let sig = signed(&req, 0);
        req.attach(0, sig).unwrap();

        let other = SecretKey::from_slice(&[0x43; 32]).unwrap();
        let other_pk = CompressedPublicKey(other.public_key(&Secp256k1::new()));
        assert!(req.finalize(&other_pk.to_bytes()).is_err());
    }
}
