//! Per-client rate limiting for credential-bearing routes.
//!
//! One governor limiter per client IP, created on first use.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;

use crate::error::ApiError;

/// Rate limiter state for a single client.
type ClientLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-IP rate limiter.
pub struct IpRateLimiter {
    limiters: RwLock<HashMap<IpAddr, Arc<ClientLimiter>>>,
    quota: Quota,
}

impl IpRateLimiter {
    /// Allow `per_minute` requests per IP, with a burst of a third of that.
    #[must_use]
    pub fn per_minute(per_minute: NonZeroU32) -> Self {
        let burst = NonZeroU32::new(per_minute.get() / 3).unwrap_or(NonZeroU32::MIN);
        Self::with_quota(Quota::per_minute(per_minute).allow_burst(burst))
    }

    #[must_use]
    pub fn with_quota(quota: Quota) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            quota,
        }
    }

    /// Check if a request from `ip` is allowed.
    pub async fn check_ip(&self, ip: IpAddr) -> Result<(), ApiError> {
        let limiter = {
            let read_guard = self.limiters.read().await;
            if let Some(limiter) = read_guard.get(&ip) {
                limiter.clone()
            } else {
                drop(read_guard);

                let mut write_guard = self.limiters.write().await;
                // Double-check after acquiring write lock
                if let Some(limiter) = write_guard.get(&ip) {
                    limiter.clone()
                } else {
                    let limiter = Arc::new(RateLimiter::direct(self.quota));
                    write_guard.insert(ip, limiter.clone());
                    limiter
                }
            }
        };

        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait_time = not_until.wait_time_from(DefaultClock::default().now());
                tracing::debug!(%ip, wait_secs = wait_time.as_secs(), "Rate limit hit");
                Err(ApiError::RateLimited {
                    // Round up so clients never retry too early
                    retry_after_secs: wait_time.as_secs().max(1),
                })
            }
        }
    }

    /// Drop limiters that are back at full capacity.
    pub async fn retain_recent(&self) {
        let mut write_guard = self.limiters.write().await;
        let burst = self.quota.burst_size();
        // Only limiters below full capacity are still tracking anything
        write_guard.retain(|_, limiter| !matches!(limiter.check_n(burst), Ok(Ok(()))));
    }

    /// Get the number of tracked clients.
    pub async fn limiter_count(&self) -> usize {
        self.limiters.read().await.len()
    }
}

impl std::fmt::Debug for IpRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpRateLimiter")
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}
