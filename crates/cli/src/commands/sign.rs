//! Split signing: request a signature now, verify it later.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::output::OutputFormatter;
use nbtc_orchestrator::RedemptionPipeline;

#[derive(Serialize)]
struct VerifiedSignature {
    redeem_id: u64,
    input_index: usize,
    sign_id: String,
    r: String,
    s: String,
    digest: String,
}

/// Request the network signature for one input
pub async fn request_signature(
    pipeline: &RedemptionPipeline,
    formatter: &OutputFormatter,
    redeem_id: u64,
    input_index: usize,
) -> Result<()> {
    if !formatter.json_mode {
        formatter.header("Request Signature");
        formatter.kv("Redeem ID", &redeem_id.to_string());
        formatter.kv("Input", &input_index.to_string());
        println!();
        formatter.info("Waiting for a presignature...");
    }

    let requested = pipeline
        .request_signature(redeem_id, input_index)
        .await
        .context("Failed to request signature")?;

    if formatter.json_mode {
        return formatter.json(&requested);
    }

    formatter.success("Sign request submitted");
    formatter.kv("Presign ID", &requested.presign_id.to_string());
    formatter.kv("Sign ID", &requested.sign_id.to_string());
    println!();
    formatter.info(&format!(
        "Verify with: nbtc-redeem verify-sign {} {} {}",
        redeem_id, input_index, requested.sign_id
    ));

    Ok(())
}

/// Wait for a requested signature, verify it and record it
pub async fn verify_sign(
    pipeline: &RedemptionPipeline,
    formatter: &OutputFormatter,
    redeem_id: u64,
    input_index: usize,
    sign_id: String,
) -> Result<()> {
    let sign_id = sign_id.parse().context("Invalid sign id")?;

    let input = pipeline
        .verify_sign(redeem_id, input_index, sign_id)
        .await
        .context("Signature verification failed")?;

    let verified = VerifiedSignature {
        redeem_id,
        input_index,
        sign_id: input.sign_id.to_string(),
        r: hex::encode(&input.signature.r),
        s: hex::encode(&input.signature.s),
        digest: hex::encode(input.digest),
    };

    if formatter.json_mode {
        return formatter.json(&verified);
    }

    formatter.success("Signature verified and recorded");
    formatter.kv("Sign ID", &verified.sign_id);
    formatter.kv("Digest", &verified.digest);
    formatter.kv("r", &verified.r);
    formatter.kv("s", &verified.s);

    Ok(())
}
