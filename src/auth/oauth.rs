//! OAuth2 client for the authorization server's authorize, token and revocation endpoints.

use crate::auth::pkce::CHALLENGE_METHOD;
use crate::config::{ClientConfig, HttpConfig};
use crate::error::AuthError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Which kind of token a revocation request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// OAuth2 client for a single registered public client.
pub struct OAuth2Client {
    client_id: String,
    redirect_uri: String,
    scope: String,
    authorize_url: Url,
    token_url: String,
    revoke_url: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from configuration.
    pub fn new(oauth: &ClientConfig, http: &HttpConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(http.timeout())
            .connect_timeout(http.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        let authorize_url =
            Url::parse(&oauth.authorize_url).context("Invalid authorize endpoint")?;

        Ok(Self {
            client_id: oauth.client_id.clone(),
            redirect_uri: oauth.redirect_uri.clone(),
            scope: oauth.scope_string(),
            authorize_url,
            token_url: oauth.token_url.clone(),
            revoke_url: oauth.revoke_url.clone(),
            http_client,
        })
    }

    /// Build the authorization URL for browser-based sign-in.
    pub fn authorization_url(&self, code_challenge: &str, state: &str) -> Url {
        let mut url = self.authorize_url.clone();

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", CHALLENGE_METHOD);

        url
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", pkce_verifier),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = OAuthErrorResponse::read(response).await;
            tracing::error!("Token exchange failed: HTTP {} - {}", status, body.error);
            return Err(AuthError::TokenExchangeFailed {
                error: body.error,
                description: body.error_description,
            });
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed {
                error: "invalid_response".into(),
                description: Some(e.to_string()),
            })
    }

    /// Refresh an access token using a refresh token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = OAuthErrorResponse::read(response).await;
            tracing::error!("Token refresh rejected: HTTP {} - {}", status, body.error);
            return Err(AuthError::RefreshRejected {
                error: body.error,
                description: body.error_description,
            });
        }
        if !status.is_success() {
            tracing::error!("Token refresh failed: HTTP {}", status);
            return Err(AuthError::Transport(format!("HTTP {}", status.as_u16())));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Transport(format!("invalid token response: {}", e)))
    }

    /// Revoke a token (RFC 7009).
    pub async fn revoke_token(&self, token: &str, hint: TokenTypeHint) -> Result<(), AuthError> {
        let params = [
            ("token", token),
            ("token_type_hint", hint.as_str()),
            ("client_id", self.client_id.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.revoke_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Transport(format!(
                "revocation of {} returned HTTP {}",
                hint.as_str(),
                response.status().as_u16()
            )));
        }

        Ok(())
    }
}

/// Token response from the token endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

/// Error body from the token endpoint (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

impl OAuthErrorResponse {
    async fn read(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        serde_json::from_str(&text).unwrap_or_else(|_| Self {
            error: format!("HTTP {}", status),
            error_description: None,
        })
    }
}

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Extract the callback parameters from a query string (without the leading `?`).
    pub fn from_query(query: &str) -> Self {
        let params: HashMap<_, _> = url::form_urlencoded::parse(query.as_bytes()).collect();
        let get = |key: &str| {
            params
                .get(key)
                .map(|v| v.to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            code: get("code"),
            state: get("state"),
            error: get("error"),
            error_description: get("error_description"),
        }
    }
}

/// Parse an OAuth callback URL into its parameters.
pub fn parse_callback_url(url_string: &str) -> Result<CallbackParams, AuthError> {
    let url = Url::parse(url_string).map_err(|e| AuthError::InvalidCallback(e.to_string()))?;
    Ok(CallbackParams::from_query(url.query().unwrap_or_default()))
}
