//! Rate-limited transport shared by every outbound API call.
//!
//! Quota state lives behind a mutex and is shared by cloning, so all
//! concurrent callers in the process observe the same remaining-points
//! budget. State is refreshed from `x-ratelimit-*` headers after every
//! response.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::context::Context;
use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
struct QuotaState {
    remaining: Option<i64>,
    reset_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<QuotaState>>,
    min_points: i64,
    max_wait: Duration,
    max_retries: u32,
    retry_base: Duration,
}

fn jitter(cap_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..cap_ms.max(1)))
}

impl RateLimiter {
    pub fn new(ctx: &Context) -> Self {
        RateLimiter {
            state: Arc::new(Mutex::new(QuotaState::default())),
            min_points: ctx.min_rate_points,
            max_wait: ctx.max_rate_wait,
            max_retries: ctx.max_retries,
            retry_base: ctx.retry_base,
        }
    }

    /// Record quota headers from a response.
    pub async fn record(&self, remaining: Option<i64>, reset_epoch: Option<i64>) {
        let mut st = self.state.lock().await;
        if remaining.is_some() {
            st.remaining = remaining;
        }
        if let Some(ts) = reset_epoch {
            st.reset_at = DateTime::from_timestamp(ts, 0);
        }
    }

    /// Wait for permission to issue a request.
    ///
    /// Suspends until the reported reset time (plus up to 500ms of jitter)
    /// when the remaining quota is below the configured floor. Errors with
    /// `RateLimited` instead of waiting longer than the configured ceiling.
    pub async fn acquire(&self) -> Result<()> {
        let wait = {
            let st = self.state.lock().await;
            match (st.remaining, st.reset_at) {
                (Some(remaining), Some(reset_at)) if remaining < self.min_points => {
                    let now = Utc::now();
                    if reset_at > now {
                        Some((reset_at - now).to_std().unwrap_or_default())
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(wait) = wait {
            if wait > self.max_wait {
                return Err(SyncError::RateLimited { retry_after: wait });
            }
            let pause = wait + jitter(500);
            info!("rate limit exhausted, waiting {:?} for reset", pause);
            tokio::time::sleep(pause).await;
            // Quota is unknown until the next response reports it.
            self.state.lock().await.remaining = None;
        }

        Ok(())
    }

    /// Run a request closure under the retry policy.
    ///
    /// Transient errors back off exponentially with jitter up to the retry
    /// cap. Rate-limit rejections sleep until the server-reported reset and
    /// retry, bounded by the same cap and the wait ceiling. Everything else
    /// propagates immediately.
    pub async fn execute_with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.retry_base;
        let mut attempt = 0u32;
        loop {
            self.acquire().await?;
            match op().await {
                Ok(v) => return Ok(v),
                Err(SyncError::RateLimited { retry_after }) => {
                    attempt += 1;
                    if retry_after > self.max_wait || attempt > self.max_retries {
                        return Err(SyncError::RateLimited { retry_after });
                    }
                    let pause = retry_after + jitter(500);
                    warn!("request rate limited, sleeping {:?} until reset", pause);
                    tokio::time::sleep(pause).await;
                }
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(err);
                    }
                    let pause = delay + jitter(delay.as_millis().max(1) as u64);
                    warn!(
                        "transient error ({}), retry {}/{} in {:?}",
                        err, attempt, self.max_retries, pause
                    );
                    tokio::time::sleep(pause).await;
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
