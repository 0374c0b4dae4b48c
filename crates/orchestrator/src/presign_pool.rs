//! Presignature Pool
//!
//! Keeps completed global presignatures on hand so that a redemption does not
//! wait for presigning on its critical path.
//!
//! # Sizing
//!
//! - Target pool size: 30 presignatures, the same cap the contract applies
//!   to its own buffer
//! - Healthy: at least half the target available
//! - Critical: under a tenth of the target available
//!
//! Handing a presignature out of the pool does not spend it. Spending is
//! checked by the orchestrator when the sign request is submitted.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use nbtc_types::{Curve, ObjectId, Presignature, RedeemError, Result, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::RedeemConfig;
use crate::signing::SigningOrchestrator;

/// Maximum number of buffered presignatures.
pub const MAX_PRESIGNS: usize = 30;

/// Presignature pool statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignatureStats {
    /// Current number of available presignatures
    pub current_size: usize,
    /// Target pool size
    pub target_size: usize,
    /// Pool utilization percentage (0-100)
    pub utilization: f64,
    /// Total presignatures added to the pool
    pub total_generated: u64,
    /// Total presignatures handed out
    pub total_used: u64,
    pub last_fill: Option<DateTime<Utc>>,
}

impl PresignatureStats {
    /// At least half the target is available.
    pub fn is_healthy(&self) -> bool {
        self.current_size * 2 >= self.target_size
    }

    /// Fewer than a tenth of the target is available.
    pub fn is_critical(&self) -> bool {
        self.current_size * 10 < self.target_size
    }

    pub fn calculate_utilization(&self) -> f64 {
        if self.target_size == 0 {
            0.0
        } else {
            (self.current_size as f64 / self.target_size as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone)]
struct PresignatureEntry {
    presignature: Presignature,
    added_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct GenerationStats {
    total_generated: u64,
    total_used: u64,
    last_fill: Option<DateTime<Utc>>,
}

/// Presignature Pool
pub struct PresignPool<C: Clock = TokioClock> {
    orchestrator: Arc<SigningOrchestrator<C>>,
    pool: RwLock<VecDeque<PresignatureEntry>>,
    target_size: usize,
    curve: Curve,
    algorithm: SignatureAlgorithm,
    stats: RwLock<GenerationStats>,
}

impl<C: Clock> PresignPool<C> {
    pub fn new(
        orchestrator: Arc<SigningOrchestrator<C>>,
        target_size: usize,
        curve: Curve,
        algorithm: SignatureAlgorithm,
    ) -> Self {
        Self {
            orchestrator,
            pool: RwLock::new(VecDeque::new()),
            target_size: target_size.min(MAX_PRESIGNS),
            curve,
            algorithm,
            stats: RwLock::new(GenerationStats::default()),
        }
    }

    /// A pool sized by `presign_buffer_target`, presigning with the
    /// configured protocol.
    pub fn from_config(orchestrator: Arc<SigningOrchestrator<C>>, config: &RedeemConfig) -> Self {
        Self::new(
            orchestrator,
            config.presign_buffer_target,
            config.curve,
            config.signature_algorithm,
        )
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    /// Request presignatures until the pool reaches its target, then wait
    /// for them to complete.
    ///
    /// All requests are submitted before any wait, and the waits run
    /// concurrently. Returns how many were added.
    pub async fn fill(&self) -> Result<usize> {
        self.fill_up_to(self.target_size).await
    }

    /// Like [`fill`](Self::fill), adding at most `count` presignatures.
    pub async fn fill_up_to(&self, count: usize) -> Result<usize> {
        let current_size = self.pool.read().await.len();
        if current_size >= self.target_size {
            info!(
                "Presignature pool full ({}/{}), nothing to do",
                current_size, self.target_size
            );
            return Ok(0);
        }

        let wanted = (self.target_size - current_size).min(count);
        if wanted == 0 {
            return Ok(0);
        }
        info!("Requesting {} presignatures...", wanted);

        let mut requested: Vec<ObjectId> = Vec::with_capacity(wanted);
        let mut request_error: Option<RedeemError> = None;

        for i in 0..wanted {
            match self
                .orchestrator
                .request_global_presign(self.curve, self.algorithm)
                .await
            {
                Ok(presign_id) => requested.push(presign_id),
                Err(e) => {
                    error!("Presignature request {}/{} failed: {}", i + 1, wanted, e);
                    request_error = Some(e);
                    break;
                }
            }
        }

        let timeout = self.orchestrator.presign_timeout();
        let waits = requested.iter().map(|presign_id| {
            self.orchestrator
                .wait_presign_completed(*presign_id, timeout)
        });
        let results = join_all(waits).await;

        let mut added = 0;
        for (presign_id, result) in requested.iter().zip(results) {
            match result {
                Ok(presignature) => {
                    self.pool.write().await.push_back(PresignatureEntry {
                        presignature,
                        added_at: Utc::now(),
                    });
                    added += 1;
                }
                Err(e) => {
                    warn!(presign_id = %presign_id, "Presignature did not complete: {}", e);
                }
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.total_generated += added as u64;
            stats.last_fill = Some(Utc::now());
        }

        info!(
            "Added {} presignatures (pool: {}/{})",
            added,
            self.pool.read().await.len(),
            self.target_size
        );

        match request_error {
            Some(e) if added == 0 => Err(e),
            _ => Ok(added),
        }
    }

    /// Take the oldest presignature not yet spent.
    pub async fn acquire(&self) -> Option<Presignature> {
        let mut pool = self.pool.write().await;

        while let Some(entry) = pool.pop_front() {
            if self
                .orchestrator
                .is_consumed(&entry.presignature.presign_id)
            {
                warn!(
                    presign_id = %entry.presignature.presign_id,
                    "Dropping spent presignature from pool"
                );
                continue;
            }

            self.stats.write().await.total_used += 1;
            info!(
                presign_id = %entry.presignature.presign_id,
                "Acquired presignature pooled at {} (remaining: {}/{})",
                entry.added_at.to_rfc3339(),
                pool.len(),
                self.target_size
            );
            return Some(entry.presignature);
        }

        None
    }

    pub async fn get_stats(&self) -> PresignatureStats {
        let current_size = self.pool.read().await.len();
        let gen_stats = self.stats.read().await;

        let mut stats = PresignatureStats {
            current_size,
            target_size: self.target_size,
            utilization: 0.0,
            total_generated: gen_stats.total_generated,
            total_used: gen_stats.total_used,
            last_fill: gen_stats.last_fill,
        };
        stats.utilization = stats.calculate_utilization();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(current_size: usize) -> PresignatureStats {
        let mut stats = PresignatureStats {
            current_size,
            target_size: 30,
            utilization: 0.0,
            total_generated: 30,
            total_used: 0,
            last_fill: None,
        };
        stats.utilization = stats.calculate_utilization();
        stats
    }

    #[test]
    fn test_presignature_stats() {
        let s = stats(15);
        assert!(s.is_healthy());
        assert!(!s.is_critical());
        assert_eq!(s.utilization, 50.0);
    }

    #[test]
    fn test_presignature_stats_critical() {
        let s = stats(2);
        assert!(!s.is_healthy());
        assert!(s.is_critical());
    }

    #[test]
    fn test_empty_target_has_zero_utilization() {
        let mut s = stats(0);
        s.target_size = 0;
        assert_eq!(s.calculate_utilization(), 0.0);
    }
}
