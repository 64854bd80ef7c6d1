//! Durable token storage.
//!
//! The store holds exactly one [`TokenSet`]. Writers replace the whole record at once;
//! readers see either the previous set or the new one, never a mix. A record that fails
//! to load (truncated file, bad JSON, foreign keychain item) reads as absent.

mod file;
#[cfg(target_os = "macos")]
mod keychain;

pub use file::FileTokenStore;
#[cfg(target_os = "macos")]
pub use keychain::KeychainTokenStore;

use crate::auth::oauth::TokenResponse;
use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Longest lifetime accepted from a token response; larger values are clamped.
pub const MAX_EXPIRES_IN_SECS: u64 = 365 * 24 * 60 * 60;

/// The current token set plus its locally computed expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds as reported by the server at receipt.
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
    /// `received_at + expires_in`, never taken from the server.
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// Build a token set from a token endpoint response received at `now`.
    ///
    /// `previous_refresh_token` is carried forward when the response has none.
    /// `expires_in` is clamped to [`MAX_EXPIRES_IN_SECS`].
    pub fn from_response(
        response: &TokenResponse,
        now: DateTime<Utc>,
        previous_refresh_token: Option<&str>,
    ) -> Self {
        let refresh_token = response
            .refresh_token
            .clone()
            .or_else(|| previous_refresh_token.map(str::to_string));

        let expires_in = if response.expires_in > MAX_EXPIRES_IN_SECS {
            tracing::warn!(
                "Token lifetime of {}s exceeds {}s, clamping",
                response.expires_in,
                MAX_EXPIRES_IN_SECS
            );
            MAX_EXPIRES_IN_SECS
        } else {
            response.expires_in
        };

        Self {
            access_token: response.access_token.clone(),
            token_type: response.token_type.clone(),
            expires_in,
            refresh_token,
            scope: response.scope.clone(),
            expires_at: expiry_after(now, expires_in),
        }
    }

    /// Time left before expiry; negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Whether the token is inside the refresh window at `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.remaining(now) <= window
    }
}

/// `now + secs`, saturating at the latest representable instant.
fn expiry_after(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Holder of the single current token set.
pub trait TokenStore: Send + Sync {
    /// Atomically replace the stored set.
    fn set(&self, tokens: &TokenSet) -> Result<(), StoreError>;

    /// The stored set, or `None` when absent or unreadable.
    fn get(&self) -> Option<TokenSet>;

    /// Remove the stored set. Clearing an empty store succeeds.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Process-local store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<TokenSet>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn set(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        *self.tokens.write().unwrap_or_else(|e| e.into_inner()) = Some(tokens.clone());
        Ok(())
    }

    fn get(&self) -> Option<TokenSet> {
        self.tokens.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.tokens.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Parse a persisted record, treating anything malformed as absent.
pub(crate) fn decode_record(bytes: &[u8]) -> Option<TokenSet> {
    match serde_json::from_slice::<TokenSet>(bytes) {
        Ok(tokens) if !tokens.access_token.is_empty() => Some(tokens),
        Ok(_) => {
            tracing::warn!("Stored token record has an empty access token, ignoring it");
            None
        }
        Err(e) => {
            tracing::warn!("Stored token record is malformed, ignoring it: {}", e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_tokens(now: DateTime<Utc>, expires_in: u64) -> TokenSet {
    TokenSet {
        access_token: "access-1".into(),
        token_type: "Bearer".into(),
        expires_in,
        refresh_token: Some("refresh-1".into()),
        scope: "openid offline_access".into(),
        expires_at: now + Duration::seconds(expires_in as i64),
    }
}
