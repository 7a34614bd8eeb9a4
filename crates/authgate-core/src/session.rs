//! Session management with HMAC-signed handles
//!
//! A session is created only from a [`ValidatedToken`]. Clients hold an
//! opaque handle of the form `base64url(session_id).base64url(hmac)`; the
//! signature is checked in constant time before the store is consulted, so a
//! forged handle costs no lookup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use authgate_types::SessionId;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::clock::{saturating_add, saturating_sub, Clock};
use crate::config::GatewayConfig;
use crate::crypto::{hash_token, HmacKey, HmacKeyError};
use crate::error::{GatewayError, TokenError};
use crate::provider::TokenSet;
use crate::token::ValidatedToken;

/// Gateway-issued session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Provider subject of the backing token
    pub subject: String,
    /// Provider username, needed to refresh
    pub username: String,
    /// SHA-256 of the backing access token
    pub token_digest: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set once, never cleared
    pub revoked_at: Option<DateTime<Utc>>,
    /// Backing provider tokens (Debug output is redacted)
    pub tokens: TokenSet,
}

impl Session {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }
}

/// What a client receives when a session is issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    /// Opaque signed handle
    pub handle: String,
    pub session_id: SessionId,
    pub subject: String,
    pub expires_at: DateTime<Utc>,
}

/// Session persistence
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn insert(&self, session: Session) -> Result<(), GatewayError>;

    async fn get(&self, id: SessionId) -> Result<Option<Session>, GatewayError>;

    /// Mark a session revoked, keeping the first revocation time
    ///
    /// Returns the session as stored after the call, or `None` if unknown.
    async fn revoke(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, GatewayError>;

    /// Delete sessions revoked or expired at or before `cutoff`
    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<usize, GatewayError>;
}

/// Process-local session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session) -> Result<(), GatewayError> {
        self.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<Session>, GatewayError> {
        Ok(self.sessions.get(&id).map(|s| s.value().clone()))
    }

    async fn revoke(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, GatewayError> {
        Ok(self.sessions.get_mut(&id).map(|mut session| {
            if session.revoked_at.is_none() {
                session.revoked_at = Some(at);
            }
            session.value().clone()
        }))
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> Result<usize, GatewayError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            let revoked_long_ago = session.revoked_at.is_some_and(|at| at <= cutoff);
            let expired_long_ago = session.expires_at <= cutoff;
            !(revoked_long_ago || expired_long_ago)
        });
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

/// Session manager handles issuing, validating and revoking sessions
pub struct SessionManager<S: SessionStore> {
    /// Pre-validated HMAC key for efficient signing
    hmac_key: HmacKey,
    max_duration: Duration,
    audit_retention: Duration,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    /// One lock per session currently being rotated
    rotations: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl<S: SessionStore> SessionManager<S> {
    /// Create a new session manager
    ///
    /// # Errors
    /// Returns error if the session secret is shorter than 32 bytes.
    pub fn new(
        config: &GatewayConfig,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HmacKeyError> {
        Ok(Self {
            hmac_key: HmacKey::new(config.session_secret.as_bytes())?,
            max_duration: config.session_max_duration,
            audit_retention: config.session_audit_retention,
            store,
            clock,
            rotations: DashMap::new(),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Issue a session backed by a validated token
    ///
    /// The session expires at the earlier of the token expiry and the local
    /// maximum duration.
    pub async fn issue(
        &self,
        token: &ValidatedToken,
        tokens: TokenSet,
    ) -> Result<SessionGrant, GatewayError> {
        let now = self.clock.now();
        let expires_at = token.expires_at().min(saturating_add(now, self.max_duration));
        if expires_at <= now {
            // Accepted within clock skew but already past its expiry
            return Err(GatewayError::TokenInvalid(TokenError::Expired));
        }

        let session = Session {
            id: SessionId::new(),
            subject: token.subject().to_string(),
            username: token.username().to_string(),
            token_digest: hash_token(&token.raw),
            issued_at: now,
            expires_at,
            revoked_at: None,
            tokens,
        };
        let grant = SessionGrant {
            handle: self.handle_for(session.id),
            session_id: session.id,
            subject: session.subject.clone(),
            expires_at,
        };

        tracing::info!(session_id = %session.id, subject = %session.subject, %expires_at, "Session issued");
        self.store.insert(session).await?;
        Ok(grant)
    }

    /// Resolve a handle to an active session
    pub async fn validate(&self, handle: &str) -> Result<Session, GatewayError> {
        let id = self.verify_handle(handle)?;
        let session = self.store.get(id).await?.ok_or_else(|| {
            // Correctly signed but unknown: purged or from another deployment
            tracing::warn!(session_id = %id, "Signed session handle not found in store");
            GatewayError::SessionRevoked
        })?;

        if session.is_revoked() {
            tracing::debug!(session_id = %id, "Session has been revoked");
            return Err(GatewayError::SessionRevoked);
        }
        if session.is_expired(self.clock.now()) {
            tracing::debug!(session_id = %id, "Session expired");
            return Err(GatewayError::TokenInvalid(TokenError::Expired));
        }
        Ok(session)
    }

    /// Revoke a session by ID
    ///
    /// Revoking an already revoked session succeeds and keeps the original
    /// revocation time.
    pub async fn revoke(&self, id: SessionId) -> Result<(), GatewayError> {
        match self.store.revoke(id, self.clock.now()).await? {
            Some(session) => {
                tracing::info!(session_id = %id, subject = %session.subject, "Session revoked");
                Ok(())
            }
            None => Err(GatewayError::SessionNotFound),
        }
    }

    /// Revoke the session behind a handle
    pub async fn revoke_handle(&self, handle: &str) -> Result<SessionId, GatewayError> {
        let id = self.verify_handle(handle)?;
        self.revoke(id).await?;
        Ok(id)
    }

    /// Whether the session exists, is not revoked and has not expired
    pub async fn is_active(&self, id: SessionId) -> bool {
        match self.store.get(id).await {
            Ok(Some(session)) => session.is_active(self.clock.now()),
            Ok(None) => false,
            Err(e) => {
                tracing::error!(session_id = %id, "Failed to load session: {}", e);
                false
            }
        }
    }

    /// Replace `old` with a session on freshly issued tokens
    pub async fn rotate(
        &self,
        old: &Session,
        token: &ValidatedToken,
        tokens: TokenSet,
    ) -> Result<SessionGrant, GatewayError> {
        let grant = self.issue(token, tokens).await?;
        self.revoke(old.id).await?;
        tracing::debug!(old = %old.id, new = %grant.session_id, "Session rotated");
        Ok(grant)
    }

    /// Serialize rotations of one session
    ///
    /// Holders must re-validate the session after acquiring the guard, then
    /// pass it to [`Self::release_rotation`].
    pub async fn lock_rotation(&self, id: SessionId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.rotations.entry(id).or_default().value());
        lock.lock_owned().await
    }

    /// Release a rotation guard, dropping the lock once nobody waits on it
    pub fn release_rotation(&self, id: SessionId, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.rotations
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Drop sessions revoked or expired longer ago than the audit window
    pub async fn purge_expired(&self) -> Result<usize, GatewayError> {
        let cutoff = saturating_sub(self.clock.now(), self.audit_retention);
        let purged = self.store.purge(cutoff).await?;
        if purged > 0 {
            tracing::debug!(purged, "Purged sessions");
        }
        Ok(purged)
    }

    /// Signed handle for a session ID
    pub fn handle_for(&self, id: SessionId) -> String {
        let signature = self.hmac_key.sign(id.as_bytes());
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(id.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Check a handle's signature and extract the session ID
    pub fn verify_handle(&self, handle: &str) -> Result<SessionId, GatewayError> {
        let malformed = || GatewayError::TokenInvalid(TokenError::Malformed);

        let (id_b64, signature_b64) = handle.split_once('.').ok_or_else(malformed)?;
        let id_bytes = URL_SAFE_NO_PAD.decode(id_b64).map_err(|_| malformed())?;
        let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|_| malformed())?;

        if !self.hmac_key.verify(&id_bytes, &signature) {
            tracing::debug!("Session handle signature mismatch");
            return Err(GatewayError::TokenInvalid(TokenError::BadSignature));
        }

        Uuid::from_slice(&id_bytes)
            .map(SessionId::from)
            .map_err(|_| malformed())
    }
}

impl<S: SessionStore> std::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_duration", &self.max_duration)
            .field("audit_retention", &self.audit_retention)
            .finish_non_exhaustive()
    }
}
