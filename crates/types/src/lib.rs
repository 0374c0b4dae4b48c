//! Shared types for the nBTC redemption signer.
//!
//! Everything that crosses a crate boundary lives here: the error taxonomy,
//! ledger object identifiers, lifecycle states of dWallets, presignatures and
//! signing sessions, and the protocol parameter enums sent to the signing
//! network.

pub mod error;
pub mod ids;
pub mod protocol;
pub mod serde_hex;
pub mod session;
pub mod signature;

pub use error::{RedeemError, Result};
pub use ids::ObjectId;
pub use protocol::{Curve, HashScheme, SignatureAlgorithm};
pub use session::{
    DWallet, DWalletState, PresignState, Presignature, SessionState, SignSessionRecord,
    SignSessionState, SigningSession,
};
pub use signature::Signature;
