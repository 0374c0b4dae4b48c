//! Lifecycle states of dWallets, presignatures and signing sessions.
//!
//! Transitions on the remote side are observed, never forced. The only state
//! owned locally is [`SigningSession`], which records how far one input's
//! signing flow has progressed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RedeemError, Result};
use crate::ids::ObjectId;
use crate::protocol::{Curve, HashScheme, SignatureAlgorithm};
use crate::serde_hex;

// ============================================================================
// dWallet
// ============================================================================

/// Lifecycle of a dWallet on the signing network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DWalletState {
    AwaitingKeyGeneration,
    AwaitingUserVerification,
    Active,
    Rejected,
}

impl fmt::Display for DWalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DWalletState::AwaitingKeyGeneration => "awaiting_key_generation",
            DWalletState::AwaitingUserVerification => "awaiting_user_verification",
            DWalletState::Active => "active",
            DWalletState::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// A threshold key managed by the signing network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DWallet {
    pub id: ObjectId,
    pub cap_id: ObjectId,
    /// Compressed secp256k1 public key (33 bytes).
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,
    /// Public output of the key generation, needed to build the user share.
    #[serde(with = "serde_hex")]
    pub public_output: Vec<u8>,
    pub state: DWalletState,
}

impl DWallet {
    /// Fail with `InvalidState` unless the dWallet can sign.
    pub fn ensure_active(&self) -> Result<()> {
        if self.state != DWalletState::Active {
            return Err(RedeemError::invalid_state(
                format!("dwallet {} active", self.id),
                self.state,
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Presignature
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresignState {
    Requested,
    Completed,
    Failed,
}

impl fmt::Display for PresignState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresignState::Requested => write!(f, "requested"),
            PresignState::Completed => write!(f, "completed"),
            PresignState::Failed => write!(f, "failed"),
        }
    }
}

/// A single-use precomputed signing artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presignature {
    pub presign_id: ObjectId,
    /// Capability object that authorises spending the presignature.
    pub cap_id: ObjectId,
    pub state: PresignState,
    /// Network output, present once `Completed`.
    #[serde(default, with = "serde_hex::option")]
    pub output: Option<Vec<u8>>,
}

impl Presignature {
    /// Output bytes of a completed presignature, or `InvalidState`.
    pub fn completed_output(&self) -> Result<&[u8]> {
        match (self.state, self.output.as_deref()) {
            (PresignState::Completed, Some(output)) => Ok(output),
            (PresignState::Completed, None) => Err(RedeemError::invalid_state(
                format!("presign {} with output", self.presign_id),
                "completed without output",
            )),
            (state, _) => Err(RedeemError::invalid_state(
                format!("presign {} completed", self.presign_id),
                state,
            )),
        }
    }
}

// ============================================================================
// Sign session (network view)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignSessionState {
    Requested,
    Completed {
        /// Versioned signature output, BCS-encoded.
        #[serde(with = "serde_hex")]
        signature: Vec<u8>,
    },
    Rejected,
}

impl fmt::Display for SignSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignSessionState::Requested => write!(f, "requested"),
            SignSessionState::Completed { .. } => write!(f, "completed"),
            SignSessionState::Rejected => write!(f, "rejected"),
        }
    }
}

/// A sign session as reported by the signing network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignSessionRecord {
    pub sign_id: ObjectId,
    pub dwallet_id: ObjectId,
    pub state: SignSessionState,
}

// ============================================================================
// Signing session (local view)
// ============================================================================

/// Progress of one input's presign → sign → verify flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Requested,
    PresignCompleted,
    MessageCreated,
    SignRequested,
    SignCompleted,
    Verified,
    Failed,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Verified | SessionState::Failed | SessionState::TimedOut
        )
    }

    /// The forward successor, if any.
    pub fn next(self) -> Option<SessionState> {
        match self {
            SessionState::Requested => Some(SessionState::PresignCompleted),
            SessionState::PresignCompleted => Some(SessionState::MessageCreated),
            SessionState::MessageCreated => Some(SessionState::SignRequested),
            SessionState::SignRequested => Some(SessionState::SignCompleted),
            SessionState::SignCompleted => Some(SessionState::Verified),
            SessionState::Verified | SessionState::Failed | SessionState::TimedOut => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Requested => "requested",
            SessionState::PresignCompleted => "presign_completed",
            SessionState::MessageCreated => "message_created",
            SessionState::SignRequested => "sign_requested",
            SessionState::SignCompleted => "sign_completed",
            SessionState::Verified => "verified",
            SessionState::Failed => "failed",
            SessionState::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSession {
    pub redeem_id: u64,
    pub input_index: usize,
    pub dwallet_id: ObjectId,
    pub presign_id: ObjectId,
    /// Sign session id, known once the sign request has been submitted.
    pub session_id: Option<ObjectId>,
    pub curve: Curve,
    pub hash_scheme: HashScheme,
    pub signature_algorithm: SignatureAlgorithm,
    state: SessionState,
}

impl SigningSession {
    pub fn new(
        redeem_id: u64,
        input_index: usize,
        dwallet_id: ObjectId,
        presign_id: ObjectId,
        curve: Curve,
        hash_scheme: HashScheme,
        signature_algorithm: SignatureAlgorithm,
    ) -> Self {
        Self {
            redeem_id,
            input_index,
            dwallet_id,
            presign_id,
            session_id: None,
            curve,
            hash_scheme,
            signature_algorithm,
            state: SessionState::Requested,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`.
    ///
    /// Only the immediate forward successor is accepted, plus `Failed` or
    /// `TimedOut` from any non-terminal state.
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        let allowed = match next {
            SessionState::Failed | SessionState::TimedOut => !self.state.is_terminal(),
            _ => self.state.next() == Some(next),
        };

        if !allowed {
            return Err(RedeemError::invalid_state(
                format!("transition from {} to {}", self.state, next),
                self.state,
            ));
        }

        self.state = next;
        Ok(())
    }

    /// Record an abort caused by `err`, mapping timeouts to `TimedOut`.
    pub fn abort(&mut self, err: &RedeemError) {
        if self.state.is_terminal() {
            return;
        }
        self.state = match err {
            RedeemError::Timeout { .. } => SessionState::TimedOut,
            _ => SessionState::Failed,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SigningSession {
        SigningSession::new(
            7,
            0,
            ObjectId::new([1; 32]),
            ObjectId::new([2; 32]),
            Curve::Secp256k1,
            HashScheme::DoubleSha256,
            SignatureAlgorithm::Ecdsa,
        )
    }

    #[test]
    fn test_full_forward_walk() {
        let mut s = session();
        for next in [
            SessionState::PresignCompleted,
            SessionState::MessageCreated,
            SessionState::SignRequested,
            SessionState::SignCompleted,
            SessionState::Verified,
        ] {
            s.advance(next).unwrap();
        }
        assert_eq!(s.state(), SessionState::Verified);
        assert!(s.state().is_terminal());
    }

    #[test]
    fn test_cannot_skip_steps() {
        let mut s = session();
        let err = s.advance(SessionState::SignRequested).unwrap_err();
        assert!(matches!(err, RedeemError::InvalidState { .. }));
        assert_eq!(s.state(), SessionState::Requested);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut s = session();
        s.abort(&RedeemError::Timeout {
            object_id: "0x2".into(),
            waited: std::time::Duration::from_secs(60),
        });
        assert_eq!(s.state(), SessionState::TimedOut);

        s.abort(&RedeemError::VerificationFailed("bad".into()));
        assert_eq!(s.state(), SessionState::TimedOut);
        assert!(s.advance(SessionState::Failed).is_err());
    }

    #[test]
    fn test_dwallet_must_be_active() {
        let mut dwallet = DWallet {
            id: ObjectId::new([3; 32]),
            cap_id: ObjectId::new([4; 32]),
            public_key: vec![2; 33],
            public_output: vec![],
            state: DWalletState::AwaitingKeyGeneration,
        };
        assert!(matches!(
            dwallet.ensure_active(),
            Err(RedeemError::InvalidState { .. })
        ));
        dwallet.state = DWalletState::Active;
        assert!(dwallet.ensure_active().is_ok());
    }

    #[test]
    fn test_presign_output_requires_completion() {
        let mut presign = Presignature {
            presign_id: ObjectId::new([5; 32]),
            cap_id: ObjectId::new([6; 32]),
            state: PresignState::Requested,
            output: None,
        };
        assert!(presign.completed_output().is_err());

        presign.state = PresignState::Completed;
        presign.output = Some(vec![9, 9]);
        assert_eq!(presign.completed_output().unwrap(), &[9, 9]);
    }

    #[test]
    fn test_sign_session_state_json() {
        let state = SignSessionState::Completed {
            signature: vec![0xde, 0xad],
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["signature"], "dead");
    }
}
