//! dWallet registration.

use anyhow::{Context, Result};
use nbtc_orchestrator::RedemptionPipeline;

use crate::output::OutputFormatter;

/// Wait for a dWallet to activate and register it with the contract
pub async fn init_dwallet(
    pipeline: &RedemptionPipeline,
    formatter: &OutputFormatter,
    dwallet_id: Option<String>,
) -> Result<()> {
    let dwallet_id = match dwallet_id {
        Some(id) => id.parse().context("Invalid dWallet id")?,
        None => pipeline.config().dwallet_id,
    };

    if !formatter.json_mode {
        formatter.info(&format!("Waiting for dWallet {} to become active...", dwallet_id));
    }

    let metadata = pipeline
        .init_dwallet(dwallet_id)
        .await
        .context("Failed to initialise dWallet")?;

    if formatter.json_mode {
        return formatter.json(&metadata);
    }

    formatter.success("dWallet registered and activated");
    formatter.kv("dWallet", &dwallet_id.to_string());
    formatter.kv("Address", &metadata.address);
    formatter.kv("Lock script", &hex::encode(metadata.lock_script.as_bytes()));
    formatter.kv("Public key", &hex::encode(metadata.public_key.to_bytes()));

    Ok(())
}
