//! Token management with on-demand refresh.
//!
//! [`TokenManager`] is the only reader and writer of the token store once a session
//! exists. Every refresh, logout and post-sign-in write runs under one async guard, so
//! at most one refresh request is in flight and a logout cannot be undone by a refresh
//! that lands after it.

use crate::auth::oauth::{OAuth2Client, TokenTypeHint};
use crate::auth::pending::AuthorizationSlot;
use crate::clock::Clock;
use crate::error::{AuthError, StoreError};
use crate::store::{TokenSet, TokenStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Manages the access token lifecycle.
pub struct TokenManager {
    oauth_client: Arc<OAuth2Client>,
    store: Arc<dyn TokenStore>,
    pending: Arc<AuthorizationSlot>,
    clock: Arc<dyn Clock>,
    /// Refresh once the token has this much life left or less.
    refresh_window: Duration,
    /// Single-flight guard for every write to the store.
    refresh_guard: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        oauth_client: Arc<OAuth2Client>,
        store: Arc<dyn TokenStore>,
        pending: Arc<AuthorizationSlot>,
        clock: Arc<dyn Clock>,
        refresh_window: Duration,
    ) -> Self {
        Self {
            oauth_client,
            store,
            pending,
            clock,
            refresh_window,
            refresh_guard: Mutex::new(()),
        }
    }

    /// The access token to send with an outbound request.
    ///
    /// Returns `None` when there is no session. Refreshes transparently when the token
    /// is inside the refresh window; concurrent callers share one refresh. A failed
    /// refresh ends the session.
    pub async fn access_token(&self) -> Option<Zeroizing<String>> {
        let tokens = self.store.get()?;
        if !tokens.needs_refresh(self.clock.now(), self.refresh_window) {
            return Some(Zeroizing::new(tokens.access_token.clone()));
        }

        let _guard = self.refresh_guard.lock().await;

        // Another caller may have refreshed or signed out while we waited
        let tokens = self.store.get()?;
        if !tokens.needs_refresh(self.clock.now(), self.refresh_window) {
            debug!("Token already refreshed by a concurrent caller");
            return Some(Zeroizing::new(tokens.access_token.clone()));
        }

        self.refresh_or_end_session(&tokens).await
    }

    /// Refresh after the resource server rejected `rejected_access_token`.
    ///
    /// If the stored token has already been replaced since that request was made, the
    /// replacement is returned without another refresh.
    pub async fn force_refresh(&self, rejected_access_token: &str) -> Option<Zeroizing<String>> {
        let _guard = self.refresh_guard.lock().await;

        let tokens = self.store.get()?;
        if tokens.access_token != rejected_access_token {
            debug!("Rejected token was already replaced");
            return Some(Zeroizing::new(tokens.access_token.clone()));
        }

        self.refresh_or_end_session(&tokens).await
    }

    /// Exchange the refresh token in `tokens` for a new token set and persist it.
    ///
    /// On [`AuthError::NoRefreshToken`] or [`AuthError::RefreshRejected`] the session
    /// cannot be renewed; the caller must sign out rather than retry.
    pub async fn refresh(&self, tokens: &TokenSet) -> Result<TokenSet, AuthError> {
        let _guard = self.refresh_guard.lock().await;
        self.refresh_locked(tokens).await
    }

    /// Revoke both tokens and clear all local session state.
    ///
    /// Never fails: revocation errors are logged and local state is cleared regardless.
    pub async fn logout(&self) {
        let _guard = self.refresh_guard.lock().await;

        if let Some(tokens) = self.store.get() {
            let revoke_access = self
                .oauth_client
                .revoke_token(&tokens.access_token, TokenTypeHint::AccessToken);
            let revoke_refresh = async {
                match tokens.refresh_token.as_deref() {
                    Some(refresh_token) => Some(
                        self.oauth_client
                            .revoke_token(refresh_token, TokenTypeHint::RefreshToken)
                            .await,
                    ),
                    None => None,
                }
            };

            let (access_result, refresh_result) = tokio::join!(revoke_access, revoke_refresh);
            if let Err(e) = access_result {
                warn!("Access token revocation failed: {}", e);
            }
            if let Some(Err(e)) = refresh_result {
                warn!("Refresh token revocation failed: {}", e);
            }
        }

        self.clear_local();
        info!("Signed out");
    }

    /// Persist a freshly issued token set.
    pub(crate) async fn install(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        let _guard = self.refresh_guard.lock().await;
        self.store.set(tokens)
    }

    /// When the current access token expires, if signed in.
    pub fn session_expiry(&self) -> Option<DateTime<Utc>> {
        self.store.get().map(|tokens| tokens.expires_at)
    }

    /// Time left on the current access token, if signed in and not yet expired.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let remaining = self.store.get()?.remaining(self.clock.now());
        (remaining > Duration::zero()).then_some(remaining)
    }

    async fn refresh_or_end_session(&self, tokens: &TokenSet) -> Option<Zeroizing<String>> {
        match self.refresh_locked(tokens).await {
            Ok(refreshed) => Some(Zeroizing::new(refreshed.access_token.clone())),
            Err(e) => {
                warn!("Token refresh failed, ending session: {}", e);
                self.clear_local();
                None
            }
        }
    }

    async fn refresh_locked(&self, tokens: &TokenSet) -> Result<TokenSet, AuthError> {
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .ok_or(AuthError::NoRefreshToken)?;

        info!("Refreshing access token");
        let response = self.oauth_client.refresh_token(refresh_token).await?;

        let refreshed = TokenSet::from_response(&response, self.clock.now(), Some(refresh_token));
        self.store.set(&refreshed)?;

        info!("Token refreshed successfully, expires at {}", refreshed.expires_at);
        Ok(refreshed)
    }

    fn clear_local(&self) {
        if let Err(e) = self.store.clear() {
            error!("Failed to clear stored tokens: {}", e);
        }
        self.pending.clear();
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}
