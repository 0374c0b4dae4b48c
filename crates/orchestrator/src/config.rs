//! Configuration for the redemption pipeline

use nbtc_bitcoin::{BitcoinNetwork, FeePolicy};
use nbtc_types::{Curve, HashScheme, ObjectId, RedeemError, Result, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::presign_pool::MAX_PRESIGNS;

/// Interval and deadline for watching a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.interval.is_zero() {
            return Err(RedeemError::Configuration(format!(
                "{} poll interval must be positive",
                name
            )));
        }
        if self.interval > self.timeout {
            return Err(RedeemError::Configuration(format!(
                "{} poll interval {:?} exceeds timeout {:?}",
                name, self.interval, self.timeout
            )));
        }
        Ok(())
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Configuration for the redemption pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemConfig {
    /// nBTC contract object on the ledger
    pub nbtc_object_id: ObjectId,

    /// dWallet holding the bridge's Bitcoin key
    pub dwallet_id: ObjectId,

    /// dWallet coordinator object on the ledger
    pub dwallet_coordinator_id: ObjectId,

    /// Bitcoin network the bridge's UTXOs live on
    pub network: BitcoinNetwork,

    /// Esplora API base URL
    pub esplora_url: String,

    /// Bridge gateway base URL
    pub gateway_url: String,

    pub curve: Curve,
    pub signature_algorithm: SignatureAlgorithm,
    pub hash_scheme: HashScheme,

    /// Waiting for a presignature to complete
    pub presign_poll: PollPolicy,

    /// Waiting for a sign session to complete
    pub sign_poll: PollPolicy,

    /// Waiting for a dWallet to become active
    pub dwallet_poll: PollPolicy,

    /// Fee used when assembling locally
    pub fee_policy: FeePolicy,

    /// Compare the ledger's per-input message with the locally derived one
    pub verify_ledger_sighash: bool,

    /// Check that ledger UTXOs are still unspent before signing
    pub verify_utxos_unspent: bool,

    /// Number of completed presignatures to keep buffered
    pub presign_buffer_target: usize,

    /// Timeout for individual HTTP requests
    pub request_timeout: Duration,
}

impl Default for RedeemConfig {
    fn default() -> Self {
        let network = BitcoinNetwork::default();
        Self {
            nbtc_object_id: ObjectId::default(),
            dwallet_id: ObjectId::default(),
            dwallet_coordinator_id: ObjectId::default(),
            network,
            esplora_url: network.default_esplora_url().to_string(),
            gateway_url: "http://localhost:8080".to_string(),
            curve: Curve::Secp256k1,
            signature_algorithm: SignatureAlgorithm::Ecdsa,
            hash_scheme: HashScheme::DoubleSha256,
            presign_poll: PollPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
            sign_poll: PollPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
            dwallet_poll: PollPolicy::new(Duration::from_secs(1), Duration::from_secs(30)),
            fee_policy: FeePolicy::default(),
            verify_ledger_sighash: true,
            verify_utxos_unspent: true,
            presign_buffer_target: MAX_PRESIGNS,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RedeemConfig {
    pub fn builder() -> RedeemConfigBuilder {
        RedeemConfigBuilder::new()
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.presign_poll.validate("presign")?;
        self.sign_poll.validate("sign")?;
        self.dwallet_poll.validate("dwallet")?;

        if self.signature_algorithm != SignatureAlgorithm::Ecdsa {
            return Err(RedeemError::Configuration(format!(
                "signature algorithm {} cannot spend P2WPKH outputs",
                self.signature_algorithm
            )));
        }
        if self.presign_buffer_target > MAX_PRESIGNS {
            return Err(RedeemError::Configuration(format!(
                "presign buffer target {} exceeds maximum {}",
                self.presign_buffer_target, MAX_PRESIGNS
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(RedeemError::Configuration(
                "request timeout must be positive".to_string(),
            ));
        }
        if self.esplora_url.is_empty() || self.gateway_url.is_empty() {
            return Err(RedeemError::Configuration(
                "esplora and gateway URLs must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for RedeemConfig
pub struct RedeemConfigBuilder {
    config: RedeemConfig,
}

impl RedeemConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RedeemConfig::default(),
        }
    }

    pub fn nbtc_object_id(mut self, id: ObjectId) -> Self {
        self.config.nbtc_object_id = id;
        self
    }

    pub fn dwallet_id(mut self, id: ObjectId) -> Self {
        self.config.dwallet_id = id;
        self
    }

    pub fn dwallet_coordinator_id(mut self, id: ObjectId) -> Self {
        self.config.dwallet_coordinator_id = id;
        self
    }

    /// Set the network. Also resets the Esplora URL to that network's default.
    pub fn network(mut self, network: BitcoinNetwork) -> Self {
        self.config.network = network;
        self.config.esplora_url = network.default_esplora_url().to_string();
        self
    }

    pub fn esplora_url(mut self, url: impl Into<String>) -> Self {
        self.config.esplora_url = url.into();
        self
    }

    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.config.gateway_url = url.into();
        self
    }

    pub fn curve(mut self, curve: Curve) -> Self {
        self.config.curve = curve;
        self
    }

    pub fn signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.config.signature_algorithm = algorithm;
        self
    }

    pub fn hash_scheme(mut self, scheme: HashScheme) -> Self {
        self.config.hash_scheme = scheme;
        self
    }

    pub fn presign_poll(mut self, policy: PollPolicy) -> Self {
        self.config.presign_poll = policy;
        self
    }

    pub fn sign_poll(mut self, policy: PollPolicy) -> Self {
        self.config.sign_poll = policy;
        self
    }

    pub fn dwallet_poll(mut self, policy: PollPolicy) -> Self {
        self.config.dwallet_poll = policy;
        self
    }

    pub fn fee_policy(mut self, policy: FeePolicy) -> Self {
        self.config.fee_policy = policy;
        self
    }

    pub fn verify_ledger_sighash(mut self, enable: bool) -> Self {
        self.config.verify_ledger_sighash = enable;
        self
    }

    pub fn verify_utxos_unspent(mut self, enable: bool) -> Self {
        self.config.verify_utxos_unspent = enable;
        self
    }

    pub fn presign_buffer_target(mut self, target: usize) -> Self {
        self.config.presign_buffer_target = target;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Build and validate.
    pub fn build(self) -> Result<RedeemConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for RedeemConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
