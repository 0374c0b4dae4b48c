//! Redemption Orchestration Service
//!
//! Coordinates signing a Bitcoin redemption with a threshold dWallet, from
//! reading the request on the ledger to broadcasting the finished
//! transaction.
//!
//! # Components
//!
//! - [`pipeline`]: the end-to-end redemption flow
//! - [`signing`]: presign, sign and verify for a single input
//! - [`session_watcher`]: bounded polling of remote objects
//! - [`envelope`]: BCS event envelopes returned by ledger calls
//! - [`presign_pool`]: presignatures prepared ahead of time
//! - [`gateway`]: HTTP client for the ledger and signing network
//!
//! # Safety Rules
//!
//! 1. **Consume once**: a presignature is never submitted twice
//! 2. **Verify before use**: every signature is checked locally against the
//!    digest fixed at load time before it is recorded or installed
//! 3. **Fail closed**: nothing that costs fees is retried automatically

pub mod clock;
pub mod config;
pub mod envelope;
pub mod gateway;
pub mod ledger;
pub mod pipeline;
pub mod presign_pool;
pub mod session_watcher;
pub mod signing;
pub mod signing_network;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{PollPolicy, RedeemConfig, RedeemConfigBuilder};
pub use envelope::{
    DWalletSessionEvent, EnvelopeCodec, PresignRequestEvent, SessionType, SignRequestEvent,
};
pub use gateway::GatewayClient;
pub use ledger::{Ledger, RedeemRecord};
pub use pipeline::{ComposedTx, RedemptionPipeline, RedemptionRequest, SignatureRequested};
pub use presign_pool::{PresignPool, PresignatureStats, MAX_PRESIGNS};
pub use session_watcher::SessionWatcher;
pub use signing::{
    network_message, ExpectedSignature, InputSignature, SignContext, SigningOrchestrator,
};
pub use signing_network::{SigningNetwork, UserShareSigner};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::RedeemConfig;
    pub use crate::gateway::GatewayClient;
    pub use crate::pipeline::{RedemptionPipeline, RedemptionRequest};
    pub use crate::signing::SigningOrchestrator;
    pub use nbtc_types::{RedeemError, Result};
}
