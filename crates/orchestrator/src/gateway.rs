//! REST client for the bridge gateway.
//!
//! The gateway holds the ledger signer identity. It submits ledger
//! transactions on our behalf, answers dev-inspect reads, and proxies state
//! reads of the signing network. Byte fields travel as hex strings and event
//! envelopes as base64 strings.

use async_trait::async_trait;
use nbtc_types::{
    serde_hex, Curve, DWallet, HashScheme, ObjectId, Presignature, RedeemError, Result,
    SignSessionRecord, SignatureAlgorithm,
};
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::RedeemConfig;
use crate::ledger::{Ledger, RedeemRecord};
use crate::signing_network::{SigningNetwork, UserShareSigner};

/// Gateway client implementing every external boundary of the pipeline.
#[derive(Clone)]
pub struct GatewayClient {
    base_url: String,
    client: HttpClient,
    nbtc: ObjectId,
    dwallet_coordinator: ObjectId,
}

impl GatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        nbtc: ObjectId,
        dwallet_coordinator: ObjectId,
    ) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RedeemError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            nbtc,
            dwallet_coordinator,
        })
    }

    pub fn from_config(config: &RedeemConfig) -> Result<Self> {
        Self::new(
            config.gateway_url.clone(),
            config.request_timeout,
            config.nbtc_object_id,
            config.dwallet_coordinator_id,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("nbtc", self.nbtc.to_string())])
            .send()
            .await
            .map_err(|e| RedeemError::NetworkRequestFailed(format!("GET {} failed: {}", path, e)))?;

        Self::handle_response(path, response, false).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send_post(path, body).await?;
        Self::handle_response(path, response, false).await
    }

    async fn send_post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RedeemError::NetworkRequestFailed(format!("POST {} failed: {}", path, e)))
    }

    /// Post and ignore the response body.
    async fn post_unit<B: Serialize>(&self, path: &str, body: &B, verification: bool) -> Result<()> {
        let response = self.send_post(path, body).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(Self::status_error(path, status, error_text, verification))
    }

    async fn handle_response<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
        verification: bool,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response.json::<T>().await.map_err(|e| {
                RedeemError::NetworkRequestFailed(format!("failed to parse {} response: {}", path, e))
            })
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(Self::status_error(path, status, error_text, verification))
        }
    }

    fn status_error(
        path: &str,
        status: StatusCode,
        error_text: String,
        verification: bool,
    ) -> RedeemError {
        match status {
            // Freshly created objects can lag behind on the gateway's node
            StatusCode::NOT_FOUND => {
                RedeemError::NetworkRequestFailed(format!("{} not found: {}", path, error_text))
            }
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY if verification => {
                RedeemError::VerificationFailed(format!("ledger rejected signature: {}", error_text))
            }
            s if s.is_client_error() => RedeemError::InvalidState {
                expected: format!("{} accepted", path),
                actual: format!("{}: {}", s, error_text),
            },
            s => RedeemError::NetworkRequestFailed(format!("{} ({}): {}", path, s, error_text)),
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SigHashResponse {
    #[serde(with = "serde_hex")]
    pub sighash: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestUtxoSigRequest {
    pub nbtc: ObjectId,
    pub dwallet_coordinator: ObjectId,
    pub presign_cap_id: ObjectId,
    #[serde(with = "serde_hex")]
    pub message_centralized_signature: Vec<u8>,
}

/// A base64 BCS event emitted by a submitted transaction.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    pub event: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordSignatureRequest {
    pub nbtc: ObjectId,
    pub dwallet_coordinator: ObjectId,
    pub input_ids: Vec<usize>,
    pub sign_ids: Vec<ObjectId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComposeTxResponse {
    #[serde(with = "serde_hex")]
    pub tx: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FillPresignRequest {
    pub nbtc: ObjectId,
    pub dwallet_coordinator: ObjectId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FillPresignResponse {
    pub added: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddDWalletRequest {
    pub nbtc: ObjectId,
    #[serde(with = "serde_hex")]
    pub lock_script: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateDWalletRequest {
    pub nbtc: ObjectId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GlobalPresignRequest {
    pub curve: Curve,
    pub signature_algorithm: SignatureAlgorithm,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserSignMessageRequest {
    pub dwallet_id: ObjectId,
    #[serde(with = "serde_hex")]
    pub public_output: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub presign_output: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub message: Vec<u8>,
    pub hash_scheme: HashScheme,
    pub signature_algorithm: SignatureAlgorithm,
    pub curve: Curve,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserSignMessageResponse {
    #[serde(with = "serde_hex")]
    pub message_centralized_signature: Vec<u8>,
}

// ============================================================================
// Boundaries
// ============================================================================

#[async_trait]
impl Ledger for GatewayClient {
    async fn redeem_request(&self, redeem_id: u64) -> Result<RedeemRecord> {
        self.get(&format!("/api/v1/redeem/{}", redeem_id)).await
    }

    async fn sig_hash(&self, redeem_id: u64, input_index: usize) -> Result<Vec<u8>> {
        let response: SigHashResponse = self
            .get(&format!(
                "/api/v1/redeem/{}/inputs/{}/sighash",
                redeem_id, input_index
            ))
            .await?;
        Ok(response.sighash)
    }

    async fn request_utxo_sig(
        &self,
        redeem_id: u64,
        input_index: usize,
        presign_cap_id: ObjectId,
        message_centralized_signature: &[u8],
    ) -> Result<String> {
        let request = RequestUtxoSigRequest {
            nbtc: self.nbtc,
            dwallet_coordinator: self.dwallet_coordinator,
            presign_cap_id,
            message_centralized_signature: message_centralized_signature.to_vec(),
        };
        let response: EventResponse = self
            .post(
                &format!("/api/v1/redeem/{}/inputs/{}/sign", redeem_id, input_index),
                &request,
            )
            .await?;
        Ok(response.event)
    }

    async fn record_signature(
        &self,
        redeem_id: u64,
        input_indices: &[usize],
        sign_ids: &[ObjectId],
    ) -> Result<()> {
        let request = RecordSignatureRequest {
            nbtc: self.nbtc,
            dwallet_coordinator: self.dwallet_coordinator,
            input_ids: input_indices.to_vec(),
            sign_ids: sign_ids.to_vec(),
        };
        self.post_unit(
            &format!("/api/v1/redeem/{}/signatures", redeem_id),
            &request,
            true,
        )
        .await
    }

    async fn compose_tx(&self, redeem_id: u64) -> Result<Vec<u8>> {
        let response: ComposeTxResponse =
            self.get(&format!("/api/v1/redeem/{}/tx", redeem_id)).await?;
        Ok(response.tx)
    }

    async fn fill_presign(&self) -> Result<u32> {
        let request = FillPresignRequest {
            nbtc: self.nbtc,
            dwallet_coordinator: self.dwallet_coordinator,
        };
        let response: FillPresignResponse = self.post("/api/v1/presign/fill", &request).await?;
        Ok(response.added)
    }

    async fn add_dwallet(
        &self,
        dwallet_id: ObjectId,
        lock_script: &[u8],
        public_key: &[u8],
    ) -> Result<()> {
        let request = AddDWalletRequest {
            nbtc: self.nbtc,
            lock_script: lock_script.to_vec(),
            public_key: public_key.to_vec(),
        };
        self.post_unit(&format!("/api/v1/dwallet/{}", dwallet_id), &request, false)
            .await
    }

    async fn set_active_dwallet(&self, dwallet_id: ObjectId) -> Result<()> {
        let request = ActivateDWalletRequest { nbtc: self.nbtc };
        self.post_unit(
            &format!("/api/v1/dwallet/{}/activate", dwallet_id),
            &request,
            false,
        )
        .await
    }
}

#[async_trait]
impl SigningNetwork for GatewayClient {
    async fn request_global_presign(
        &self,
        curve: Curve,
        algorithm: SignatureAlgorithm,
    ) -> Result<String> {
        let request = GlobalPresignRequest {
            curve,
            signature_algorithm: algorithm,
        };
        let response: EventResponse = self.post("/api/v1/presign", &request).await?;
        Ok(response.event)
    }

    async fn get_presign(&self, presign_id: ObjectId) -> Result<Presignature> {
        self.get(&format!("/api/v1/presign/{}", presign_id)).await
    }

    async fn get_dwallet(&self, dwallet_id: ObjectId) -> Result<DWallet> {
        self.get(&format!("/api/v1/dwallet/{}", dwallet_id)).await
    }

    async fn get_sign_session(&self, sign_id: ObjectId) -> Result<SignSessionRecord> {
        self.get(&format!("/api/v1/sign/{}", sign_id)).await
    }
}

#[async_trait]
impl UserShareSigner for GatewayClient {
    async fn create_user_sign_message(
        &self,
        dwallet: &DWallet,
        presign_output: &[u8],
        message: &[u8],
        hash_scheme: HashScheme,
        algorithm: SignatureAlgorithm,
        curve: Curve,
    ) -> Result<Vec<u8>> {
        let request = UserSignMessageRequest {
            dwallet_id: dwallet.id,
            public_output: dwallet.public_output.clone(),
            presign_output: presign_output.to_vec(),
            message: message.to_vec(),
            hash_scheme,
            signature_algorithm: algorithm,
            curve,
        };
        let response: UserSignMessageResponse = self.post("/api/v1/sign/message", &request).await?;
        Ok(response.message_centralized_signature)
    }
}
