//! Bounded polling of remote session objects.
//!
//! The ledger and the signing network only answer point-in-time reads, so
//! every wait for a remote state change is a fixed-interval poll with a hard
//! deadline:
//!
//! - The first read happens immediately
//! - Transport failures are retried until the deadline
//! - Any other error ends the wait at once
//! - The last read happens exactly at the deadline, never after it
//! - A read is cut off when the deadline passes, even if it never answers

use nbtc_types::{RedeemError, Result};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::PollPolicy;

/// Watches remote objects until they reach a wanted state.
pub struct SessionWatcher<C: Clock = TokioClock> {
    clock: Arc<C>,
}

impl<C: Clock> Clone for SessionWatcher<C> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock.clone(),
        }
    }
}

impl SessionWatcher<TokioClock> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TokioClock::new()))
    }
}

impl Default for SessionWatcher<TokioClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SessionWatcher<C> {
    pub fn with_clock(clock: Arc<C>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &Arc<C> {
        &self.clock
    }

    /// Read `object_id` until `predicate` accepts the value.
    ///
    /// Returns the accepted value, the first non-transient error, or
    /// `Timeout` once `policy.timeout` has elapsed.
    pub async fn poll_until<T, F, Fut, P>(
        &self,
        object_id: impl Display,
        mut read: F,
        predicate: P,
        policy: PollPolicy,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&T) -> bool,
    {
        let start = self.clock.now();
        let deadline = start + policy.timeout;
        let mut attempts: u32 = 0;
        let mut last_error: Option<RedeemError> = None;

        loop {
            attempts += 1;
            let budget = deadline.saturating_sub(self.clock.now());
            let outcome = match tokio::time::timeout(budget, read()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RedeemError::NetworkRequestFailed(format!(
                    "read of {} unanswered after {:?}",
                    object_id, budget
                ))),
            };

            match outcome {
                Ok(value) if predicate(&value) => {
                    debug!(
                        object_id = %object_id,
                        attempts,
                        "Object reached expected state"
                    );
                    return Ok(value);
                }
                Ok(_) => {
                    debug!(object_id = %object_id, attempts, "Object not ready yet");
                }
                Err(e) if e.is_transient() => {
                    debug!(object_id = %object_id, attempts, error = %e, "Transient poll failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            let now = self.clock.now();
            if now >= deadline {
                let waited = now - start;
                match &last_error {
                    Some(e) => warn!(
                        object_id = %object_id,
                        attempts,
                        "Gave up after {:?}, last error: {}",
                        waited,
                        e
                    ),
                    None => warn!(object_id = %object_id, attempts, "Gave up after {:?}", waited),
                }
                return Err(RedeemError::Timeout {
                    object_id: object_id.to_string(),
                    waited,
                });
            }

            self.clock.sleep(policy.interval.min(deadline - now)).await;
        }
    }
}
