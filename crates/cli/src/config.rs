//! Configuration management for the redemption CLI.
//!
//! Handles loading and saving configuration from ~/.nbtc-redeem/config.toml

use anyhow::{Context, Result};
use nbtc_bitcoin::{BitcoinNetwork, FeePolicy};
use nbtc_orchestrator::{PollPolicy, RedeemConfig, MAX_PRESIGNS};
use nbtc_types::{HashScheme, ObjectId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bridge gateway endpoint
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Esplora endpoint; the network's public instance when unset
    #[serde(default)]
    pub esplora_url: Option<String>,

    #[serde(default)]
    pub network: BitcoinNetwork,

    /// nBTC contract object
    #[serde(default)]
    pub nbtc_object_id: ObjectId,

    /// dWallet holding the bridge funds
    #[serde(default)]
    pub dwallet_id: ObjectId,

    #[serde(default)]
    pub dwallet_coordinator_id: ObjectId,

    #[serde(default)]
    pub hash_scheme: HashScheme,

    /// Seconds between state reads while waiting on the network
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds to wait for a presignature or signature
    #[serde(default = "default_sign_timeout")]
    pub sign_timeout_secs: u64,

    /// Fee used when the ledger record carries none
    #[serde(default = "default_fee")]
    pub fee_sats: u64,

    #[serde(default = "default_true")]
    pub verify_ledger_sighash: bool,

    #[serde(default = "default_true")]
    pub verify_utxos_unspent: bool,

    /// Presignatures `redeem --prefetch` may hold at once
    #[serde(default = "default_presign_buffer")]
    pub presign_buffer_target: usize,

    /// Default timeout for HTTP requests (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Output format (table, json)
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Enable colored output
    #[serde(default = "default_true")]
    pub colored: bool,
}

fn default_gateway_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    1
}

fn default_sign_timeout() -> u64 {
    60
}

fn default_fee() -> u64 {
    FeePolicy::default().fee_sats()
}

fn default_presign_buffer() -> usize {
    MAX_PRESIGNS
}

fn default_timeout() -> u64 {
    30
}

fn default_output_format() -> String {
    "table".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            esplora_url: None,
            network: BitcoinNetwork::default(),
            nbtc_object_id: ObjectId::default(),
            dwallet_id: ObjectId::default(),
            dwallet_coordinator_id: ObjectId::default(),
            hash_scheme: HashScheme::default(),
            poll_interval_secs: default_poll_interval(),
            sign_timeout_secs: default_sign_timeout(),
            fee_sats: default_fee(),
            verify_ledger_sighash: true,
            verify_utxos_unspent: true,
            presign_buffer_target: default_presign_buffer(),
            timeout_secs: default_timeout(),
            output_format: default_output_format(),
            colored: true,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the path to the config directory
    pub fn config_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Could not determine home directory")?;

        Ok(home_dir.join(".nbtc-redeem"))
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;

            toml::from_str(&contents).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(Self::config_dir()?)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(Self::config_path()?, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Update gateway endpoint
    pub fn set_gateway_url(&mut self, url: String) -> Result<()> {
        self.gateway_url = url;
        self.save()
    }

    /// Update the dWallet used for signing
    pub fn set_dwallet_id(&mut self, dwallet_id: ObjectId) -> Result<()> {
        self.dwallet_id = dwallet_id;
        self.save()
    }

    /// Update output format
    pub fn set_output_format(&mut self, format: String) -> Result<()> {
        if format != "table" && format != "json" {
            anyhow::bail!("Invalid output format. Must be 'table' or 'json'");
        }
        self.output_format = format;
        self.save()
    }

    /// Build the pipeline configuration.
    pub fn to_redeem_config(&self) -> Result<RedeemConfig> {
        let interval = Duration::from_secs(self.poll_interval_secs);
        let wait = PollPolicy::new(interval, Duration::from_secs(self.sign_timeout_secs));

        let mut builder = RedeemConfig::builder()
            .nbtc_object_id(self.nbtc_object_id)
            .dwallet_id(self.dwallet_id)
            .dwallet_coordinator_id(self.dwallet_coordinator_id)
            .network(self.network)
            .gateway_url(self.gateway_url.clone())
            .hash_scheme(self.hash_scheme)
            .presign_poll(wait)
            .sign_poll(wait)
            .fee_policy(FeePolicy::Fixed(self.fee_sats))
            .verify_ledger_sighash(self.verify_ledger_sighash)
            .verify_utxos_unspent(self.verify_utxos_unspent)
            .presign_buffer_target(self.presign_buffer_target)
            .request_timeout(Duration::from_secs(self.timeout_secs));

        if let Some(url) = &self.esplora_url {
            builder = builder.esplora_url(url.clone());
        }

        builder.build().context("Invalid configuration")
    }
}
