//! Bitcoin network access (Esplora compatible).
//!
//! Provides async access to:
//! - UTXOs by address
//! - Transaction broadcasting

use async_trait::async_trait;
use bitcoin::{Address, Txid};
use nbtc_types::{RedeemError, Result};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{BitcoinNetwork, SpendableUtxo, Utxo};

/// Read and write access to a Bitcoin network view.
#[async_trait]
pub trait UtxoSource: Send + Sync {
    /// Unspent outputs currently paying to `address`.
    async fn fetch_utxos(&self, address: &str) -> Result<Vec<Utxo>>;

    /// Broadcast a fully signed transaction and return its txid.
    async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid>;
}

/// Fetch the UTXOs of `address` with its locking script attached.
pub async fn spendable_utxos(
    source: &dyn UtxoSource,
    address: &Address,
) -> Result<Vec<SpendableUtxo>> {
    let script = address.script_pubkey();
    source
        .fetch_utxos(&address.to_string())
        .await?
        .iter()
        .map(|utxo| SpendableUtxo::from_esplora(utxo, script.clone()))
        .collect()
}

/// Async client for an Esplora HTTP API.
pub struct EsploraClient {
    api_base: String,
    client: reqwest::Client,
}

impl EsploraClient {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RedeemError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Client for the network's default Esplora endpoint.
    pub fn for_network(network: BitcoinNetwork, timeout: Duration) -> Result<Self> {
        Self::new(network.default_esplora_url(), timeout)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn error_from_response(context: &str, response: reqwest::Response) -> RedeemError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        RedeemError::NetworkRequestFailed(format!("{} {}: {}", context, status, body))
    }
}

#[async_trait]
impl UtxoSource for EsploraClient {
    async fn fetch_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let url = format!("{}/address/{}/utxo", self.api_base, address);
        debug!("Fetching UTXOs from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            RedeemError::NetworkRequestFailed(format!("UTXO request failed: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(Self::error_from_response("UTXO query error", response).await);
        }

        let utxos: Vec<Utxo> = response.json().await.map_err(|e| {
            RedeemError::NetworkRequestFailed(format!("failed to parse UTXOs: {}", e))
        })?;

        debug!("Found {} UTXOs for {}", utxos.len(), address);
        Ok(utxos)
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid> {
        let url = format!("{}/tx", self.api_base);

        let response = self
            .client
            .post(&url)
            .body(hex::encode(raw_tx))
            .send()
            .await
            .map_err(|e| RedeemError::NetworkRequestFailed(format!("broadcast failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response("broadcast error", response).await);
        }

        // Response is just the txid as plain text
        let body = response.text().await.map_err(|e| {
            RedeemError::NetworkRequestFailed(format!("failed to read txid: {}", e))
        })?;

        let txid = Txid::from_str(body.trim()).map_err(|e| {
            RedeemError::NetworkRequestFailed(format!("broadcast returned invalid txid {:?}: {}", body, e))
        })?;

        info!("Broadcast transaction {}", txid);
        Ok(txid)
    }
}
