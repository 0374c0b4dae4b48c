//! Command implementations.

pub mod dwallet;
pub mod presign;
pub mod redeem;
pub mod sign;

use anyhow::{Context, Result};
use nbtc_bitcoin::EsploraClient;
use nbtc_orchestrator::{GatewayClient, RedeemConfig, RedemptionPipeline, SigningOrchestrator};
use std::sync::Arc;

/// Wire the pipeline to the gateway and Esplora.
pub fn build_pipeline(config: RedeemConfig) -> Result<RedemptionPipeline> {
    let gateway = Arc::new(GatewayClient::from_config(&config).context("Failed to create gateway client")?);
    let esplora = Arc::new(
        EsploraClient::new(config.esplora_url.clone(), config.request_timeout)
            .context("Failed to create Esplora client")?,
    );

    let orchestrator = Arc::new(SigningOrchestrator::new(
        &config,
        gateway.clone(),
        gateway.clone(),
        gateway.clone(),
    ));

    Ok(RedemptionPipeline::new(config, gateway, esplora, orchestrator))
}
