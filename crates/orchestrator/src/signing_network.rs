//! Signing network boundary.

use async_trait::async_trait;
use nbtc_types::{
    Curve, DWallet, HashScheme, ObjectId, Presignature, Result, SignSessionRecord,
    SignatureAlgorithm,
};

/// State reads and presign requests against the threshold signing network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SigningNetwork: Send + Sync {
    /// Request a presignature not bound to any dWallet. Returns the base64
    /// `PresignRequestEvent` envelope.
    async fn request_global_presign(
        &self,
        curve: Curve,
        algorithm: SignatureAlgorithm,
    ) -> Result<String>;

    async fn get_presign(&self, presign_id: ObjectId) -> Result<Presignature>;

    async fn get_dwallet(&self, dwallet_id: ObjectId) -> Result<DWallet>;

    async fn get_sign_session(&self, sign_id: ObjectId) -> Result<SignSessionRecord>;
}

/// The user side of the two-party signature.
///
/// Combines the dWallet's public user share with a completed presignature to
/// produce the centralized signature the network finishes. Opaque to this
/// crate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserShareSigner: Send + Sync {
    async fn create_user_sign_message(
        &self,
        dwallet: &DWallet,
        presign_output: &[u8],
        message: &[u8],
        hash_scheme: HashScheme,
        algorithm: SignatureAlgorithm,
        curve: Curve,
    ) -> Result<Vec<u8>>;
}
