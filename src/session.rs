//! Authenticated Session
//!
//! Single responsibility: own the credential pair and hand out an access
//! token that is still valid.
//!
//! # Token lifecycle
//!
//! - Both tokens are decoded when the session is built and again after every
//!   refresh. A token that does not decode fails with `MalformedCredential`.
//! - `current_token(true)` refreshes an expired access token first, as long
//!   as the refresh token is still valid and auto-refresh is on.
//! - An expired refresh token fails with `CredentialExhausted` before any
//!   network call. The only way out is to authenticate again.
//!
//! Refresh is single-flight: callers racing on the same expired token queue
//! on one lock, and whoever gets it second finds a fresh token and returns.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{RpcResult, SessionTokens, UnaryApi};
use crate::error::{ClientError, Result};
use crate::realtime::{Socket, SocketEndpoint};
use crate::token::{decode_access, decode_refresh_expiry, AccessClaims};

/// The decoded credential pair.
#[derive(Debug, Clone)]
struct Credentials {
    token: String,
    refresh_token: String,
    claims: AccessClaims,
    refresh_expires_at: DateTime<Utc>,
}

impl Credentials {
    fn decode(token: String, refresh_token: String) -> Result<Self> {
        let claims = decode_access(&token)?;
        let refresh_expires_at = decode_refresh_expiry(&refresh_token)?;
        Ok(Self {
            token,
            refresh_token,
            claims,
            refresh_expires_at,
        })
    }
}

/// An authenticated session.
pub struct Session {
    api: Arc<dyn UnaryApi>,
    credentials: RwLock<Credentials>,
    created: bool,
    auto_refresh: AtomicBool,
    refresh_lock: Mutex<()>,
}

impl Session {
    /// Build a session from the tokens an authenticate call returned.
    pub fn new(api: Arc<dyn UnaryApi>, tokens: SessionTokens) -> Result<Self> {
        let credentials = Credentials::decode(tokens.token, tokens.refresh_token)?;
        debug!(
            user_id = %credentials.claims.user_id,
            expires_at = %credentials.claims.expires_at,
            "Session decoded"
        );

        Ok(Self {
            api,
            credentials: RwLock::new(credentials),
            created: tokens.created,
            auto_refresh: AtomicBool::new(true),
            refresh_lock: Mutex::new(()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Credentials> {
        self.credentials.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn token(&self) -> String {
        self.read().token.clone()
    }

    pub fn refresh_token(&self) -> String {
        self.read().refresh_token.clone()
    }

    pub fn user_id(&self) -> String {
        self.read().claims.user_id.clone()
    }

    pub fn username(&self) -> String {
        self.read().claims.username.clone()
    }

    pub fn vars(&self) -> HashMap<String, String> {
        self.read().claims.vars.clone()
    }

    pub fn var(&self, name: &str) -> Option<String> {
        self.read().claims.vars.get(name).cloned()
    }

    /// Whether authenticating created the account.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.read().claims.expires_at
    }

    pub fn refresh_expires_at(&self) -> DateTime<Utc> {
        self.read().refresh_expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at() < Utc::now()
    }

    pub fn is_refresh_expired(&self) -> bool {
        self.refresh_expires_at() < Utc::now()
    }

    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh.load(Ordering::SeqCst)
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.auto_refresh.store(enabled, Ordering::SeqCst);
    }

    /// An access token fit for use, refreshing it first when allowed.
    pub async fn current_token(&self, allow_refresh: bool) -> Result<String> {
        if self.is_refresh_expired() {
            return Err(ClientError::CredentialExhausted);
        }

        if allow_refresh && self.auto_refresh() && self.is_expired() {
            let _guard = self.refresh_lock.lock().await;
            // Another caller may have refreshed while we waited
            if self.is_expired() {
                self.exchange().await?;
            }
        }

        Ok(self.token())
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// On failure the current pair stays in place.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.exchange().await
    }

    async fn exchange(&self) -> Result<()> {
        let (refresh_token, vars) = {
            let credentials = self.read();
            (credentials.refresh_token.clone(), credentials.claims.vars.clone())
        };

        let tokens = self.api.session_refresh(&refresh_token, &vars).await.map_err(|e| {
            warn!(error = %e, "Session refresh failed");
            e
        })?;

        // Some servers only rotate the access token
        let next_refresh = if tokens.refresh_token.is_empty() {
            refresh_token
        } else {
            tokens.refresh_token
        };
        let fresh = Credentials::decode(tokens.token, next_refresh)?;

        info!(
            user_id = %fresh.claims.user_id,
            expires_at = %fresh.claims.expires_at,
            "Session refreshed"
        );
        *self
            .credentials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
        Ok(())
    }

    /// Invalidate both tokens on the server. Drop the session afterwards.
    pub async fn logout(&self) -> Result<()> {
        let bearer = self.current_token(true).await?;
        let (token, refresh_token) = {
            let credentials = self.read();
            (credentials.token.clone(), credentials.refresh_token.clone())
        };
        self.api.session_logout(&bearer, &token, &refresh_token).await?;
        info!(user_id = %self.user_id(), "Session logged out");
        Ok(())
    }

    /// Call a server function over the unary channel.
    pub async fn rpc(&self, id: &str, payload: &str) -> Result<RpcResult> {
        let bearer = self.current_token(true).await?;
        self.api.rpc(&bearer, id, payload).await
    }

    /// Open a realtime socket authenticated as this session.
    ///
    /// `status` asks the server to publish presence to followers.
    pub async fn connect(&self, endpoint: &SocketEndpoint, status: bool) -> Result<Socket> {
        let token = self.current_token(true).await?;
        Socket::dial(endpoint, &token, status).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let credentials = self.read();
        f.debug_struct("Session")
            .field("user_id", &credentials.claims.user_id)
            .field("username", &credentials.claims.username)
            .field("expires_at", &credentials.claims.expires_at)
            .field("refresh_expires_at", &credentials.refresh_expires_at)
            .finish_non_exhaustive()
    }
}
