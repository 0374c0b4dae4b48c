//! BCS envelopes exchanged with the ledger and the signing network.
//!
//! Events arrive as base64-encoded BCS. Each event kind has its own typed
//! schema below, and every decode is strict: unknown enum tags, short
//! buffers, bad length prefixes and trailing bytes are all rejected with
//! `MalformedEnvelope`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use nbtc_types::{Curve, HashScheme, ObjectId, RedeemError, Result, Signature, SignatureAlgorithm};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Length of each ECDSA scalar in a signature output.
const SCALAR_LENGTH: usize = 32;

// ============================================================================
// Schemas
// ============================================================================

/// Whether a session was opened by a user or by the network itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    User,
    System,
}

/// Wrapper the signing network puts around every session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DWalletSessionEvent<E> {
    pub epoch: u64,
    pub session_object_id: ObjectId,
    pub session_type: SessionType,
    pub session_sequence_number: u64,
    pub session_identifier_preimage: Vec<u8>,
    pub event_data: E,
}

/// Emitted when a presignature is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignRequestEvent {
    pub presign_id: ObjectId,
    /// `None` for global presignatures usable by any dWallet.
    pub dwallet_id: Option<ObjectId>,
    #[serde(with = "as_code")]
    pub curve: Curve,
    #[serde(with = "as_code")]
    pub signature_algorithm: SignatureAlgorithm,
    pub dwallet_network_encryption_key_id: ObjectId,
}

/// Emitted when the ledger asks the network to sign an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequestEvent {
    pub sign_id: ObjectId,
    pub dwallet_id: ObjectId,
    pub presign_id: ObjectId,
    #[serde(with = "as_code")]
    pub curve: Curve,
    #[serde(with = "as_code")]
    pub signature_algorithm: SignatureAlgorithm,
    #[serde(with = "as_code")]
    pub hash_scheme: HashScheme,
    pub message: Vec<u8>,
    pub message_centralized_signature: Vec<u8>,
    pub is_future_sign: bool,
}

/// Signature output of a completed sign session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionedSignOutput {
    /// BCS-encoded [`SignatureTuple`].
    V1(Vec<u8>),
}

/// Raw `(r, s)` scalars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureTuple(pub Vec<u8>, pub Vec<u8>);

// Protocol parameters travel as their u32 network codes.
trait ProtocolCode: Sized {
    fn to_code(&self) -> u32;
    fn parse_code(code: u32) -> Result<Self>;
}

impl ProtocolCode for Curve {
    fn to_code(&self) -> u32 {
        self.code()
    }
    fn parse_code(code: u32) -> Result<Self> {
        Curve::from_code(code)
    }
}

impl ProtocolCode for SignatureAlgorithm {
    fn to_code(&self) -> u32 {
        self.code()
    }
    fn parse_code(code: u32) -> Result<Self> {
        SignatureAlgorithm::from_code(code)
    }
}

impl ProtocolCode for HashScheme {
    fn to_code(&self) -> u32 {
        self.code()
    }
    fn parse_code(code: u32) -> Result<Self> {
        HashScheme::from_code(code)
    }
}

mod as_code {
    use super::ProtocolCode;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T: ProtocolCode, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(value.to_code())
    }

    pub fn deserialize<'de, T: ProtocolCode, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        let code = u32::deserialize(deserializer)?;
        T::parse_code(code).map_err(de::Error::custom)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Strict BCS codec for envelopes.
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Decode a base64 BCS envelope.
    pub fn decode<T: DeserializeOwned>(envelope: &str) -> Result<T> {
        let bytes = STANDARD
            .decode(envelope.trim())
            .map_err(|e| RedeemError::MalformedEnvelope(format!("invalid base64: {}", e)))?;
        Self::decode_bytes(&bytes)
    }

    pub fn decode_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bcs::from_bytes(bytes).map_err(|e| {
            RedeemError::MalformedEnvelope(format!(
                "cannot decode {}: {}",
                std::any::type_name::<T>(),
                e
            ))
        })
    }

    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        bcs::to_bytes(value).map_err(|e| {
            RedeemError::MalformedEnvelope(format!(
                "cannot encode {}: {}",
                std::any::type_name::<T>(),
                e
            ))
        })
    }

    pub fn encode_base64<T: Serialize>(value: &T) -> Result<String> {
        Ok(STANDARD.encode(Self::encode(value)?))
    }

    /// Decode a versioned sign output into its `(r, s)` signature.
    pub fn decode_signature(output: &[u8]) -> Result<Signature> {
        let VersionedSignOutput::V1(inner) = Self::decode_bytes(output)?;
        let SignatureTuple(r, s) = Self::decode_bytes(&inner)?;

        if r.len() != SCALAR_LENGTH || s.len() != SCALAR_LENGTH {
            return Err(RedeemError::MalformedEnvelope(format!(
                "signature scalars must be {} bytes, got r={} s={}",
                SCALAR_LENGTH,
                r.len(),
                s.len()
            )));
        }

        Ok(Signature::new(r, s))
    }

    /// Build the versioned sign output for a signature.
    pub fn encode_signature(signature: &Signature) -> Result<Vec<u8>> {
        let inner = Self::encode(&SignatureTuple(signature.r.clone(), signature.s.clone()))?;
        Self::encode(&VersionedSignOutput::V1(inner))
    }
}
