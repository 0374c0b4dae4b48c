//! Signing Orchestrator
//!
//! Drives one input through the two-party signing protocol:
//!
//! 1. **Presign**: wait for a presignature to complete on the network
//! 2. **Message**: combine it with the dWallet's user share
//! 3. **Sign**: ask the ledger to request the network signature, spending
//!    the presignature
//! 4. **Verify**: check the signature locally, then have the ledger record it
//!
//! Each step is gated on the previous one having reached its terminal state.
//! Submissions cost network fees, so nothing here is retried automatically.
//!
//! # Presignature consumption
//!
//! A presignature may be spent exactly once. The orchestrator reserves the
//! presignature before submitting the sign request and never releases it,
//! even when the submission fails: whether the network saw the request is
//! unknown at that point.

use bitcoin::CompressedPublicKey;
use nbtc_bitcoin::{parse_compressed_pubkey, sha256, verify_ecdsa};
use nbtc_types::{
    Curve, DWallet, DWalletState, HashScheme, ObjectId, PresignState, Presignature, RedeemError,
    Result, SessionState, SignSessionState, Signature, SignatureAlgorithm, SigningSession,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::{PollPolicy, RedeemConfig};
use crate::envelope::{DWalletSessionEvent, EnvelopeCodec, PresignRequestEvent, SignRequestEvent};
use crate::ledger::Ledger;
use crate::session_watcher::SessionWatcher;
use crate::signing_network::{SigningNetwork, UserShareSigner};

/// The bytes handed to the network so that its signed digest equals the
/// segwit sighash of `preimage`.
///
/// A double-SHA256 signer receives the preimage itself. A single-SHA256
/// signer receives the preimage hashed once, so its own hash completes the
/// double hash.
pub fn network_message(scheme: HashScheme, preimage: &[u8]) -> Vec<u8> {
    match scheme {
        HashScheme::DoubleSha256 => preimage.to_vec(),
        HashScheme::Sha256 => sha256(preimage).to_vec(),
    }
}

/// Identifies the sign request being submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignContext {
    pub redeem_id: u64,
    pub input_index: usize,
    pub presign_id: ObjectId,
    /// Capability authorising the spend of `presign_id`.
    pub presign_cap_id: ObjectId,
}

/// What a signature must verify against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedSignature {
    pub digest: [u8; 32],
    pub public_key: CompressedPublicKey,
}

/// A verified signature for one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSignature {
    pub sign_id: ObjectId,
    pub signature: Signature,
    /// The digest the signature was verified against.
    pub digest: [u8; 32],
}

/// Protocol parameters for new sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProtocolParams {
    curve: Curve,
    algorithm: SignatureAlgorithm,
    hash_scheme: HashScheme,
}

/// Signing Orchestrator
pub struct SigningOrchestrator<C: Clock = TokioClock> {
    ledger: Arc<dyn Ledger>,
    network: Arc<dyn SigningNetwork>,
    user_signer: Arc<dyn UserShareSigner>,
    watcher: SessionWatcher<C>,
    params: ProtocolParams,
    presign_poll: PollPolicy,
    sign_poll: PollPolicy,
    /// Presignatures already submitted in a sign request
    consumed: Mutex<HashSet<ObjectId>>,
}

impl SigningOrchestrator<TokioClock> {
    pub fn new(
        config: &RedeemConfig,
        ledger: Arc<dyn Ledger>,
        network: Arc<dyn SigningNetwork>,
        user_signer: Arc<dyn UserShareSigner>,
    ) -> Self {
        Self::with_watcher(config, ledger, network, user_signer, SessionWatcher::new())
    }
}

impl<C: Clock> SigningOrchestrator<C> {
    pub fn with_watcher(
        config: &RedeemConfig,
        ledger: Arc<dyn Ledger>,
        network: Arc<dyn SigningNetwork>,
        user_signer: Arc<dyn UserShareSigner>,
        watcher: SessionWatcher<C>,
    ) -> Self {
        Self {
            ledger,
            network,
            user_signer,
            watcher,
            params: ProtocolParams {
                curve: config.curve,
                algorithm: config.signature_algorithm,
                hash_scheme: config.hash_scheme,
            },
            presign_poll: config.presign_poll,
            sign_poll: config.sign_poll,
            consumed: Mutex::new(HashSet::new()),
        }
    }

    pub fn watcher(&self) -> &SessionWatcher<C> {
        &self.watcher
    }

    pub fn hash_scheme(&self) -> HashScheme {
        self.params.hash_scheme
    }

    pub fn presign_timeout(&self) -> Duration {
        self.presign_poll.timeout
    }

    pub fn sign_timeout(&self) -> Duration {
        self.sign_poll.timeout
    }

    /// A fresh session for one input using the configured protocol.
    pub fn new_session(
        &self,
        redeem_id: u64,
        input_index: usize,
        dwallet_id: ObjectId,
        presign_id: ObjectId,
    ) -> SigningSession {
        SigningSession::new(
            redeem_id,
            input_index,
            dwallet_id,
            presign_id,
            self.params.curve,
            self.params.hash_scheme,
            self.params.algorithm,
        )
    }

    /// Whether `presign_id` has been submitted in a sign request.
    pub fn is_consumed(&self, presign_id: &ObjectId) -> bool {
        self.consumed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(presign_id)
    }

    // ========================================================================
    // Presign
    // ========================================================================

    /// Request a global presignature and return its id.
    pub async fn request_global_presign(
        &self,
        curve: Curve,
        algorithm: SignatureAlgorithm,
    ) -> Result<ObjectId> {
        let envelope = self.network.request_global_presign(curve, algorithm).await?;
        let event: DWalletSessionEvent<PresignRequestEvent> = EnvelopeCodec::decode(&envelope)?;

        let presign_id = event.event_data.presign_id;
        info!(
            presign_id = %presign_id,
            session = %event.session_object_id,
            "Requested global presignature ({}, {})",
            curve,
            algorithm
        );
        Ok(presign_id)
    }

    async fn read_presign(&self, presign_id: ObjectId) -> Result<Presignature> {
        let presign = self.network.get_presign(presign_id).await?;
        if presign.state == PresignState::Failed {
            return Err(RedeemError::SessionAborted {
                object_id: presign_id.to_string(),
                reason: "presignature failed on the network".to_string(),
            });
        }
        Ok(presign)
    }

    /// Wait until the presignature is `Completed`.
    pub async fn wait_presign_completed(
        &self,
        presign_id: ObjectId,
        timeout: Duration,
    ) -> Result<Presignature> {
        let policy = PollPolicy::new(self.presign_poll.interval.min(timeout), timeout);
        self.watcher
            .poll_until(
                presign_id,
                || self.read_presign(presign_id),
                |p| p.state == PresignState::Completed,
                policy,
            )
            .await
    }

    // ========================================================================
    // Message
    // ========================================================================

    /// Read a dWallet and check that it can sign.
    pub async fn active_dwallet(&self, dwallet_id: ObjectId) -> Result<DWallet> {
        let dwallet = self.network.get_dwallet(dwallet_id).await?;
        dwallet.ensure_active()?;
        Ok(dwallet)
    }

    async fn read_dwallet(&self, dwallet_id: ObjectId) -> Result<DWallet> {
        let dwallet = self.network.get_dwallet(dwallet_id).await?;
        if dwallet.state == DWalletState::Rejected {
            return Err(RedeemError::SessionAborted {
                object_id: dwallet_id.to_string(),
                reason: "dwallet rejected by the network".to_string(),
            });
        }
        Ok(dwallet)
    }

    /// Wait until a freshly created dWallet becomes `Active`.
    pub async fn wait_dwallet_active(
        &self,
        dwallet_id: ObjectId,
        policy: PollPolicy,
    ) -> Result<DWallet> {
        self.watcher
            .poll_until(
                dwallet_id,
                || self.read_dwallet(dwallet_id),
                |d| d.state == DWalletState::Active,
                policy,
            )
            .await
    }

    /// Build the centralized signature over `message`.
    pub async fn create_signature_message(
        &self,
        dwallet_id: ObjectId,
        presignature: &Presignature,
        message: &[u8],
    ) -> Result<Vec<u8>> {
        let dwallet = self.active_dwallet(dwallet_id).await?;
        self.user_sign_message(&dwallet, presignature, message, self.params)
            .await
    }

    async fn user_sign_message(
        &self,
        dwallet: &DWallet,
        presignature: &Presignature,
        message: &[u8],
        params: ProtocolParams,
    ) -> Result<Vec<u8>> {
        let presign_output = presignature.completed_output()?;
        self.user_signer
            .create_user_sign_message(
                dwallet,
                presign_output,
                message,
                params.hash_scheme,
                params.algorithm,
                params.curve,
            )
            .await
    }

    // ========================================================================
    // Sign
    // ========================================================================

    /// Submit the sign request, spending the presignature.
    ///
    /// Fails with `PresignatureAlreadyConsumed` if this presignature was
    /// submitted before, whatever the outcome of that submission.
    pub async fn request_sign(
        &self,
        ctx: &SignContext,
        message_centralized_signature: &[u8],
    ) -> Result<ObjectId> {
        {
            let mut consumed = self.consumed.lock().unwrap_or_else(|e| e.into_inner());
            if !consumed.insert(ctx.presign_id) {
                warn!(
                    redeem_id = ctx.redeem_id,
                    input_index = ctx.input_index,
                    presign_id = %ctx.presign_id,
                    "Refusing to reuse presignature"
                );
                return Err(RedeemError::PresignatureAlreadyConsumed(ctx.presign_id));
            }
        }

        let envelope = self
            .ledger
            .request_utxo_sig(
                ctx.redeem_id,
                ctx.input_index,
                ctx.presign_cap_id,
                message_centralized_signature,
            )
            .await?;
        let event: DWalletSessionEvent<SignRequestEvent> = EnvelopeCodec::decode(&envelope)?;
        let request = event.event_data;

        if request.presign_id != ctx.presign_id {
            error!(
                redeem_id = ctx.redeem_id,
                input_index = ctx.input_index,
                presign_id = %ctx.presign_id,
                sign_id = %request.sign_id,
                "Sign request event reports presignature {}",
                request.presign_id
            );
            return Err(RedeemError::VerificationFailed(format!(
                "sign request {} used presignature {}, submitted {}",
                request.sign_id, request.presign_id, ctx.presign_id
            )));
        }

        info!(
            redeem_id = ctx.redeem_id,
            input_index = ctx.input_index,
            sign_id = %request.sign_id,
            "Sign requested"
        );
        Ok(request.sign_id)
    }

    async fn read_sign_session(&self, sign_id: ObjectId) -> Result<SignSessionState> {
        let record = self.network.get_sign_session(sign_id).await?;
        if record.state == SignSessionState::Rejected {
            return Err(RedeemError::SessionAborted {
                object_id: sign_id.to_string(),
                reason: "sign session rejected by the network".to_string(),
            });
        }
        Ok(record.state)
    }

    /// Wait for the sign session to complete and decode its signature.
    pub async fn wait_sign_completed(&self, sign_id: ObjectId, timeout: Duration) -> Result<Signature> {
        let policy = PollPolicy::new(self.sign_poll.interval.min(timeout), timeout);
        let state = self
            .watcher
            .poll_until(
                sign_id,
                || self.read_sign_session(sign_id),
                |s| matches!(s, SignSessionState::Completed { .. }),
                policy,
            )
            .await?;

        match state {
            SignSessionState::Completed { signature } => EnvelopeCodec::decode_signature(&signature),
            other => Err(RedeemError::invalid_state("completed", other)),
        }
    }

    // ========================================================================
    // Verify
    // ========================================================================

    /// Verify locally, then record the signature on the ledger.
    pub async fn verify(
        &self,
        redeem_id: u64,
        input_index: usize,
        sign_id: ObjectId,
        signature: &Signature,
        expected: &ExpectedSignature,
    ) -> Result<()> {
        let ecdsa = signature
            .to_ecdsa()
            .map_err(|e| RedeemError::VerificationFailed(e.to_string()))?;
        verify_ecdsa(&expected.digest, &ecdsa, &expected.public_key)?;

        debug!(redeem_id, input_index, sign_id = %sign_id, "Signature verified locally");

        self.ledger
            .record_signature(redeem_id, &[input_index], &[sign_id])
            .await?;

        info!(redeem_id, input_index, sign_id = %sign_id, "Signature recorded");
        Ok(())
    }

    // ========================================================================
    // Full flow
    // ========================================================================

    /// Run the whole presign → sign → verify flow for one input.
    ///
    /// `session` is advanced through every state and left in `Failed` or
    /// `TimedOut` on error, so the caller can report how far it got.
    pub async fn sign_input(
        &self,
        session: &mut SigningSession,
        preimage: &[u8],
        digest: [u8; 32],
    ) -> Result<InputSignature> {
        match self.drive_session(session, preimage, digest).await {
            Ok(signature) => Ok(signature),
            Err(e) => {
                let reached = session.state();
                session.abort(&e);
                error!(
                    redeem_id = session.redeem_id,
                    input_index = session.input_index,
                    presign_id = %session.presign_id,
                    state = %session.state(),
                    "Signing failed after reaching {}: {}",
                    reached,
                    e
                );
                Err(e)
            }
        }
    }

    async fn drive_session(
        &self,
        session: &mut SigningSession,
        preimage: &[u8],
        digest: [u8; 32],
    ) -> Result<InputSignature> {
        let params = ProtocolParams {
            curve: session.curve,
            algorithm: session.signature_algorithm,
            hash_scheme: session.hash_scheme,
        };

        let dwallet = self.active_dwallet(session.dwallet_id).await?;
        let public_key = parse_compressed_pubkey(&dwallet.public_key)?;

        let presign = self
            .wait_presign_completed(session.presign_id, self.presign_poll.timeout)
            .await?;
        transition(session, SessionState::PresignCompleted)?;

        let message = network_message(params.hash_scheme, preimage);
        let central = self
            .user_sign_message(&dwallet, &presign, &message, params)
            .await?;
        transition(session, SessionState::MessageCreated)?;

        let ctx = SignContext {
            redeem_id: session.redeem_id,
            input_index: session.input_index,
            presign_id: presign.presign_id,
            presign_cap_id: presign.cap_id,
        };
        let sign_id = self.request_sign(&ctx, &central).await?;
        session.session_id = Some(sign_id);
        transition(session, SessionState::SignRequested)?;

        let signature = self
            .wait_sign_completed(sign_id, self.sign_poll.timeout)
            .await?;
        transition(session, SessionState::SignCompleted)?;

        let expected = ExpectedSignature { digest, public_key };
        self.verify(session.redeem_id, session.input_index, sign_id, &signature, &expected)
            .await?;
        transition(session, SessionState::Verified)?;

        Ok(InputSignature {
            sign_id,
            signature,
            digest,
        })
    }
}

fn transition(session: &mut SigningSession, next: SessionState) -> Result<()> {
    session.advance(next)?;
    info!(
        redeem_id = session.redeem_id,
        input_index = session.input_index,
        presign_id = %session.presign_id,
        sign_id = ?session.session_id,
        state = %next,
        "Signing session advanced"
    );
    Ok(())
}
