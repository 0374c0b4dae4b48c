//! Hashing and ECDSA helpers shared by the assembler and the orchestrator.

use bitcoin::secp256k1::{ecdsa, Message, Secp256k1};
use bitcoin::CompressedPublicKey;
use nbtc_types::{RedeemError, Result};
use sha2::{Digest, Sha256};

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let hash = Sha256::digest(data);

    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    result
}

/// Double SHA-256 (Bitcoin's hash256).
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);

    let mut result = [0u8; 32];
    result.copy_from_slice(&second_hash);
    result
}

/// Parse a 33-byte compressed secp256k1 public key.
///
/// P2WPKH only admits compressed keys, so uncompressed encodings are
/// rejected even though they describe valid points.
pub fn parse_compressed_pubkey(pubkey: &[u8]) -> Result<CompressedPublicKey> {
    if pubkey.len() != 33 {
        return Err(RedeemError::InvalidInput(format!(
            "invalid public key length: expected 33, got {}",
            pubkey.len()
        )));
    }

    CompressedPublicKey::from_slice(pubkey)
        .map_err(|e| RedeemError::InvalidInput(format!("invalid public key: {}", e)))
}

/// Verify an ECDSA signature over a 32-byte digest.
///
/// Fails with `VerificationFailed` on mismatch. High-S signatures are
/// rejected by libsecp256k1, so callers normalise first.
pub fn verify_ecdsa(
    digest: &[u8; 32],
    signature: &ecdsa::Signature,
    pubkey: &CompressedPublicKey,
) -> Result<()> {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*digest);

    secp.verify_ecdsa(&message, signature, &pubkey.0).map_err(|e| {
        RedeemError::VerificationFailed(format!(
            "signature does not match digest {} under key {}: {}",
            hex::encode(digest),
            pubkey,
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;

    #[test]
    fn test_double_sha256_of_empty() {
        assert_eq!(
            hex::encode(double_sha256(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_round_trip() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x33; 32]).unwrap();
        let pk = CompressedPublicKey(sk.public_key(&secp));
        let digest = [0x44; 32];
        let sig = secp.sign_ecdsa(&Message::from_digest(digest), &sk);

        assert!(verify_ecdsa(&digest, &sig, &pk).is_ok());
        assert!(matches!(
            verify_ecdsa(&[0x45; 32], &sig, &pk),
            Err(RedeemError::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_uncompressed_key_rejected() {
        assert!(parse_compressed_pubkey(&[0x04; 65]).is_err());
        assert!(parse_compressed_pubkey(&[0x05; 33]).is_err());
    }
}
