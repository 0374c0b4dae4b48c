//! Error taxonomy for the redemption pipeline.

use std::time::Duration;

use crate::ids::ObjectId;

/// Errors surfaced by every stage of a redemption.
#[derive(Debug, thiserror::Error)]
pub enum RedeemError {
    #[error("Insufficient funds: available {available} sats, required {required} sats")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Presignature {0} has already been consumed")]
    PresignatureAlreadyConsumed(ObjectId),

    #[error("Timed out after {waited:?} waiting for {object_id}")]
    Timeout { object_id: String, waited: Duration },

    #[error("Session {object_id} aborted: {reason}")]
    SessionAborted { object_id: String, reason: String },

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("Incomplete signatures: inputs {missing:?} have no witness")]
    IncompleteSignatures { missing: Vec<usize> },

    #[error("Network request failed: {0}")]
    NetworkRequestFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RedeemError {
    /// Build an `InvalidState` from anything displayable.
    pub fn invalid_state(expected: impl std::fmt::Display, actual: impl std::fmt::Display) -> Self {
        RedeemError::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Whether a poll that failed with this error may be retried.
    ///
    /// Only transport failures qualify. Anything else is either a caller bug,
    /// corrupt data, or a terminal answer from the remote side.
    pub fn is_transient(&self) -> bool {
        matches!(self, RedeemError::NetworkRequestFailed(_))
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, RedeemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_failures_are_transient() {
        assert!(RedeemError::NetworkRequestFailed("reset".into()).is_transient());
        assert!(!RedeemError::MalformedEnvelope("short".into()).is_transient());
        assert!(!RedeemError::SessionAborted {
            object_id: "0x1".into(),
            reason: "rejected".into(),
        }
        .is_transient());
        assert!(!RedeemError::Timeout {
            object_id: "0x1".into(),
            waited: Duration::from_secs(1),
        }
        .is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = RedeemError::InsufficientFunds {
            available: 100_000,
            required: 100_050,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: available 100000 sats, required 100050 sats"
        );

        let err = RedeemError::invalid_state("active", "awaiting_key_generation");
        assert_eq!(
            err.to_string(),
            "Invalid state: expected active, got awaiting_key_generation"
        );
    }
}
