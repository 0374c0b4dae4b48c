//! Threshold signature produced by the signing network.

use bitcoin::secp256k1::ecdsa;
use serde::{Deserialize, Serialize};

use crate::error::{RedeemError, Result};
use crate::serde_hex;

/// An ECDSA signature as the raw `(r, s)` scalar pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(with = "serde_hex")]
    pub r: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub s: Vec<u8>,
}

impl Signature {
    pub fn new(r: Vec<u8>, s: Vec<u8>) -> Self {
        Self { r, s }
    }

    /// 64-byte `r || s` encoding. Both scalars must be exactly 32 bytes.
    pub fn to_compact(&self) -> Result<[u8; 64]> {
        if self.r.len() != 32 || self.s.len() != 32 {
            return Err(RedeemError::InvalidInput(format!(
                "signature scalars must be 32 bytes, got r={} s={}",
                self.r.len(),
                self.s.len()
            )));
        }
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r);
        out[32..].copy_from_slice(&self.s);
        Ok(out)
    }

    /// Parse into a low-S normalised secp256k1 signature.
    ///
    /// Relay policy rejects high-S signatures, and the network does not
    /// guarantee which of the two equivalent forms it returns.
    pub fn to_ecdsa(&self) -> Result<ecdsa::Signature> {
        let compact = self.to_compact()?;
        let mut sig = ecdsa::Signature::from_compact(&compact)
            .map_err(|e| RedeemError::InvalidInput(format!("invalid signature scalars: {e}")))?;
        sig.normalize_s();
        Ok(sig)
    }

    /// Strict DER encoding of the low-S form.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_ecdsa()?.serialize_der().to_vec())
    }
}

impl From<ecdsa::Signature> for Signature {
    fn from(sig: ecdsa::Signature) -> Self {
        let compact = sig.serialize_compact();
        Self {
            r: compact[..32].to_vec(),
            s: compact[32..].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};

    fn sample() -> ecdsa::Signature {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        secp.sign_ecdsa(&Message::from_digest([0x22; 32]), &sk)
    }

    #[test]
    fn test_from_ecdsa_keeps_scalars() {
        let sig = Signature::from(sample());
        assert_eq!(sig.r.len(), 32);
        assert_eq!(sig.s.len(), 32);
        assert_eq!(sig.to_ecdsa().unwrap(), sample());
    }

    #[test]
    fn test_high_s_is_normalised() {
        let low = Signature::from(sample());

        // n - s flips a low-S signature to its high-S twin.
        const ORDER: [u8; 32] = [
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c,
            0xd0, 0x36, 0x41, 0x41,
        ];
        let mut high_s = [0u8; 32];
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let mut d = ORDER[i] as i16 - low.s[i] as i16 - borrow;
            borrow = if d < 0 { 1 } else { 0 };
            if d < 0 {
                d += 256;
            }
            high_s[i] = d as u8;
        }
        let high = Signature::new(low.r.clone(), high_s.to_vec());

        assert_ne!(high, low);
        assert_eq!(high.to_der().unwrap(), low.to_der().unwrap());
    }

    #[test]
    fn test_wrong_scalar_length_rejected() {
        let sig = Signature::new(vec![1; 31], vec![1; 32]);
        assert!(matches!(sig.to_compact(), Err(RedeemError::InvalidInput(_))));
    }
}
