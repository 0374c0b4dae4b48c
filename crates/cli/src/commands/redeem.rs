//! Redemption commands.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use nbtc_orchestrator::{PresignPool, RedemptionPipeline};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::output::{InputRow, OutputFormatter};

#[derive(Serialize)]
struct RedeemResult {
    redeem_id: u64,
    txid: String,
    inputs: Vec<InputRow>,
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

/// Sign every input of a redemption and broadcast it
pub async fn redeem(
    pipeline: RedemptionPipeline,
    formatter: &OutputFormatter,
    redeem_id: u64,
    prefetch: bool,
) -> Result<()> {
    let mut request = pipeline
        .load(redeem_id)
        .await
        .context("Failed to load redemption request")?;

    if !formatter.json_mode {
        formatter.redemption(&request);
        println!();
    }

    let pipeline = if prefetch {
        let pool = Arc::new(PresignPool::from_config(
            pipeline.orchestrator().clone(),
            pipeline.config(),
        ));
        let added = pool
            .fill_up_to(request.missing_inputs().len())
            .await
            .context("Failed to prefetch presignatures")?;
        if !formatter.json_mode {
            formatter.info(&format!("Prefetched {} presignature(s)", added));
        }
        pipeline.with_presign_pool(pool)
    } else {
        pipeline
    };

    let pb = (!formatter.json_mode)
        .then(|| spinner("Signing inputs..."))
        .transpose()?;
    let outcome = pipeline.run(&mut request).await;
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    if let Err(e) = outcome {
        if !formatter.json_mode {
            formatter.inputs(&request);
        }
        return Err(e).context("Signing stopped");
    }

    let txid = pipeline
        .finalize_and_broadcast(&request)
        .await
        .context("Failed to broadcast redemption")?;

    if formatter.json_mode {
        return formatter.json(&RedeemResult {
            redeem_id,
            txid: txid.to_string(),
            inputs: formatter.input_rows(&request),
        });
    }

    formatter.inputs(&request);
    println!();
    formatter.success(&format!("Redemption broadcast: {}", txid));

    Ok(())
}

/// Fetch the transaction composed by the ledger
pub async fn raw_redeem_tx(
    pipeline: &RedemptionPipeline,
    formatter: &OutputFormatter,
    redeem_id: u64,
    broadcast: bool,
) -> Result<()> {
    let composed = pipeline
        .raw_redeem_tx(redeem_id, broadcast)
        .await
        .context("Failed to compose redemption transaction")?;

    if formatter.json_mode {
        return formatter.json(&composed);
    }

    formatter.header("Raw Redemption Transaction");
    println!("{}", composed.hex);
    println!();
    match composed.txid {
        Some(txid) => formatter.success(&format!("Broadcast: {}", txid)),
        None => formatter.info("Not broadcast"),
    }

    Ok(())
}
