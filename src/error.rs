//! Error types for the oauth-session crate.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Token store error: {0}")]
    Store(#[from] StoreError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Authorization flow and token lifecycle errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authorization denied: {error}{}", fmt_description(.description))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("State validation failed (possible CSRF attack)")]
    StateMismatch,

    #[error("Callback did not contain an authorization code")]
    MissingCode,

    #[error("PKCE verifier is no longer available for this sign-in attempt")]
    MissingPkceVerifier,

    #[error("Token exchange failed: {error}{}", fmt_description(.description))]
    TokenExchangeFailed {
        error: String,
        description: Option<String>,
    },

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token rejected: {error}{}", fmt_description(.description))]
    RefreshRejected {
        error: String,
        description: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("PKCE generation failed: secure random source unavailable")]
    PkceGenerationFailed,

    #[error("Could not open the authorization page: {0}")]
    RedirectFailed(String),

    #[error("OAuth callback timeout")]
    CallbackTimeout,

    #[error("Invalid OAuth callback: {0}")]
    InvalidCallback(String),

    #[error("Token store error: {0}")]
    Store(#[from] StoreError),
}

fn fmt_description(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({})", d))
        .unwrap_or_default()
}

impl AuthError {
    /// Returns true if the session can no longer be renewed and the user must sign in again.
    pub fn requires_sign_in(&self) -> bool {
        !matches!(
            self,
            Self::Transport(_) | Self::RedirectFailed(_) | Self::CallbackTimeout | Self::Store(_)
        )
    }
}

/// Token persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to store token: {0}")]
    StoreFailed(String),

    #[error("Failed to delete token: {0}")]
    DeleteFailed(String),
}

/// Identity API errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Userinfo request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,
}

impl AppError {
    /// Returns a user-friendly message for display in the UI.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(AuthError::AuthorizationDenied { .. }) => "Sign-in was denied.",
            // Security failures get a deliberately generic message
            Self::Auth(AuthError::StateMismatch) => "Security error. Please try signing in again.",
            Self::Auth(AuthError::MissingCode | AuthError::MissingPkceVerifier) => {
                "Sign-in could not be completed. Please sign in again."
            }
            Self::Auth(AuthError::TokenExchangeFailed { .. }) => {
                "Sign-in failed. Please try again."
            }
            Self::Auth(AuthError::NoRefreshToken | AuthError::RefreshRejected { .. }) => {
                "Session expired. Please sign in again."
            }
            Self::Auth(AuthError::CallbackTimeout) => "Sign-in timed out. Please try again.",
            Self::Auth(AuthError::Transport(_)) => "Network error. Check your connection.",
            Self::Store(_) | Self::Auth(AuthError::Store(_)) => {
                "Failed to access saved credentials."
            }
            Self::Api(ApiError::Unauthorized) => "Authentication expired. Sign in again.",
            Self::Api(ApiError::Forbidden) => "Insufficient permissions for this operation.",
            Self::Api(ApiError::RateLimited) => "Too many requests. Please wait a moment.",
            Self::Config(_) => "Configuration error. Please check settings.",
            _ => "An error occurred. Please try again.",
        }
    }

    /// Returns true if this error should trigger a sign-out.
    pub fn requires_sign_out(&self) -> bool {
        match self {
            Self::Auth(e) => e.requires_sign_in(),
            Self::Api(ApiError::Unauthorized) => true,
            _ => false,
        }
    }
}
