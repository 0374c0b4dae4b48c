//! Presignature buffer commands.

use anyhow::{Context, Result};
use nbtc_orchestrator::RedemptionPipeline;
use serde_json::json;

use crate::output::OutputFormatter;

/// Top up the contract's presignature buffer
pub async fn fill_presign(pipeline: &RedemptionPipeline, formatter: &OutputFormatter) -> Result<()> {
    let added = pipeline
        .fill_presign()
        .await
        .context("Failed to fill presignature buffer")?;

    if formatter.json_mode {
        return formatter.json(&json!({ "added": added }));
    }

    if added == 0 {
        formatter.warning("Presignature buffer already full");
    } else {
        formatter.success(&format!("Added {} presignature(s)", added));
    }

    Ok(())
}
