//! Signing key set cache
//!
//! The current [`SigningKeySet`] is an immutable snapshot held behind an
//! `Arc`. Refreshing builds a whole new set and swaps it in; readers holding
//! the old snapshot are unaffected.
//!
//! Refreshes are coalesced by the generation of the snapshot that triggered
//! them: every caller that saw generation `g` as stale or missing a key waits
//! on the same fetch, which publishes the next generation.
//!
//! A kid that is still missing after a fetch is remembered for the refresh
//! cooldown and rejected without another fetch until that passes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::DecodingKey;
use moka::future::Cache;

use crate::clock::{saturating_add, Clock};
use crate::error::TokenError;
use crate::provider::{IdentityProvider, KeySet, ProviderError};
use crate::retry::{with_retry_and_timeout, RetryConfig};

const CURRENT: &str = "jwks";

/// Immutable set of verification keys
#[derive(Clone)]
pub struct SigningKeySet {
    keys: HashMap<String, Arc<DecodingKey>>,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
    generation: u64,
}

impl SigningKeySet {
    /// Build a key set from a published JWKS, skipping unusable keys
    pub fn from_jwks(
        jwks: &KeySet,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
        generation: u64,
    ) -> Self {
        let mut keys = HashMap::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            if jwk.kty != "RSA" || jwk.alg.as_deref().is_some_and(|alg| alg != "RS256") {
                tracing::debug!(kid = %jwk.kid, kty = %jwk.kty, "Skipping non-RS256 key");
                continue;
            }
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid.clone(), Arc::new(key));
                }
                Err(e) => tracing::warn!(kid = %jwk.kid, "Skipping malformed JWK: {}", e),
            }
        }
        Self {
            keys,
            fetched_at,
            ttl,
            generation,
        }
    }

    /// Key for `kid`
    pub fn get(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Monotonic counter, bumped on every successful refresh and never reused
    /// for the lifetime of the cache
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the set has outlived its TTL
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= saturating_add(self.fetched_at, self.ttl)
    }
}

impl std::fmt::Debug for SigningKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kids: Vec<&String> = self.keys.keys().collect();
        kids.sort();
        f.debug_struct("SigningKeySet")
            .field("kids", &kids)
            .field("fetched_at", &self.fetched_at)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Shared cache of the provider's signing keys
pub struct KeyCache<P: IdentityProvider> {
    provider: Arc<P>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    refresh_cooldown: Duration,
    retry: RetryConfig,
    fetch_timeout: Duration,
    /// Single entry: "jwks" -> current snapshot
    current: Cache<String, Arc<SigningKeySet>>,
    /// Observed generation -> snapshot that replaced it
    refreshes: Cache<u64, Arc<SigningKeySet>>,
    /// Kid -> when a fetch last came back without it
    missing: Cache<String, DateTime<Utc>>,
    /// Highest generation published so far
    last_generation: AtomicU64,
}

impl<P: IdentityProvider> KeyCache<P> {
    pub fn new(
        provider: Arc<P>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        refresh_cooldown: Duration,
    ) -> Self {
        Self {
            provider,
            clock,
            ttl,
            refresh_cooldown,
            retry: RetryConfig::default(),
            fetch_timeout: Duration::from_secs(10),
            current: Cache::builder().max_capacity(1).build(),
            refreshes: Cache::builder()
                .max_capacity(64)
                .time_to_live(Duration::from_secs(60))
                .build(),
            missing: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(refresh_cooldown.clamp(Duration::from_secs(1), Duration::from_secs(24 * 60 * 60)))
                .build(),
            last_generation: AtomicU64::new(0),
        }
    }

    /// Set the retry policy and per-attempt timeout for key fetches
    pub fn with_fetch_policy(mut self, retry: RetryConfig, fetch_timeout: Duration) -> Self {
        self.retry = retry;
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Decoding key for `kid`, refreshing the set at most once per call
    ///
    /// A kid the cache has not seen triggers one coalesced refresh. A kid
    /// that a fetch already came back without is rejected until the refresh
    /// cooldown passes, so a flood of made-up kids cannot turn into a flood
    /// of fetches.
    pub async fn key_for(&self, kid: &str) -> Result<Arc<DecodingKey>, TokenError> {
        let now = self.clock.now();

        let observed = match self.current.get(CURRENT).await {
            Some(set) if !set.is_stale(now) => {
                if let Some(key) = set.get(kid) {
                    return Ok(key);
                }
                if self.recently_missing(kid, now).await {
                    tracing::debug!(kid, generation = set.generation(), "Unknown key id within refresh cooldown");
                    return Err(TokenError::UnknownKey);
                }
                set.generation()
            }
            Some(set) => set.generation(),
            None => 0,
        };

        let refreshed = self.refresh(observed).await?;
        match refreshed.get(kid) {
            Some(key) => Ok(key),
            None => {
                tracing::debug!(kid, generation = refreshed.generation(), "Key id not in refreshed JWKS");
                self.missing
                    .insert(kid.to_string(), refreshed.fetched_at())
                    .await;
                Err(TokenError::UnknownKey)
            }
        }
    }

    async fn recently_missing(&self, kid: &str, now: DateTime<Utc>) -> bool {
        match self.missing.get(kid).await {
            Some(seen_at) => now < saturating_add(seen_at, self.refresh_cooldown),
            None => false,
        }
    }

    /// Replace the snapshot that had generation `observed`
    ///
    /// Concurrent callers passing the same generation share one fetch.
    async fn refresh(&self, observed: u64) -> Result<Arc<SigningKeySet>, TokenError> {
        self.refreshes
            .try_get_with(observed, async {
                let provider: &P = &self.provider;
                let jwks = with_retry_and_timeout(self.retry.clone(), self.fetch_timeout, move || {
                    provider.fetch_signing_keys()
                })
                .await?;

                let generation = self.last_generation.fetch_add(1, Ordering::SeqCst) + 1;
                let set = Arc::new(SigningKeySet::from_jwks(
                    &jwks,
                    self.clock.now(),
                    self.ttl,
                    generation,
                ));
                tracing::info!(
                    generation = set.generation(),
                    keys = set.len(),
                    "Signing key set refreshed"
                );
                metrics::counter!("authgate_key_fetches_total").increment(1);
                self.current.insert(CURRENT.to_string(), Arc::clone(&set)).await;
                Ok::<_, ProviderError>(set)
            })
            .await
            .map_err(|e| {
                tracing::error!("Failed to refresh signing keys: {}", e);
                TokenError::KeyFetchFailed
            })
    }

    /// Current snapshot, if any
    pub async fn snapshot(&self) -> Option<Arc<SigningKeySet>> {
        self.current.get(CURRENT).await
    }

    /// Fetch keys if no fresh snapshot exists (readiness, warm-up)
    pub async fn warm(&self) -> Result<Arc<SigningKeySet>, TokenError> {
        let now = self.clock.now();
        match self.current.get(CURRENT).await {
            Some(set) if !set.is_stale(now) => Ok(set),
            Some(set) => self.refresh(set.generation()).await,
            None => self.refresh(0).await,
        }
    }

    /// Drop every snapshot, forcing a fetch on the next lookup
    ///
    /// Generations keep counting up from the last published one.
    pub async fn invalidate(&self) {
        self.current.invalidate_all();
        self.refreshes.invalidate_all();
        self.missing.invalidate_all();
    }
}

impl<P: IdentityProvider> std::fmt::Debug for KeyCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("ttl", &self.ttl)
            .field("refresh_cooldown", &self.refresh_cooldown)
            .finish_non_exhaustive()
    }
}
