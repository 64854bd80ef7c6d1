//! Userinfo client for the signed-in identity's claims.

use crate::auth::identity::IdentityStrategy;
use crate::auth::token_manager::TokenManager;
use crate::config::{ClientConfig, HttpConfig};
use crate::error::ApiError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Claims returned by the userinfo endpoint. Fetched on every query, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Subject identifier.
    pub sub: String,

    pub name: Option<String>,

    pub email: Option<String>,

    pub preferred_username: Option<String>,

    /// Every other claim the server returned.
    #[serde(flatten)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl UserInfo {
    /// Get the best available display name.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.preferred_username.as_deref())
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}

/// Queries userinfo with the current session, retrying once after a forced refresh.
pub struct UserInfoClient {
    http_client: reqwest::Client,
    userinfo_url: String,
    identity: Arc<dyn IdentityStrategy>,
    tokens: Arc<TokenManager>,
}

impl UserInfoClient {
    pub fn new(
        oauth: &ClientConfig,
        http: &HttpConfig,
        identity: Arc<dyn IdentityStrategy>,
        tokens: Arc<TokenManager>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(http.timeout())
            .connect_timeout(http.connect_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            userinfo_url: oauth.userinfo_url.clone(),
            identity,
            tokens,
        })
    }

    /// Claims for the current session.
    ///
    /// `Ok(None)` means unauthenticated: no session, or the server rejected the
    /// credential again after one forced refresh.
    pub async fn get_user_info(&self) -> Result<Option<UserInfo>, ApiError> {
        if !self.identity.uses_access_token() {
            return match self.fetch(None).await {
                Err(ApiError::Unauthorized) => Ok(None),
                other => other.map(Some),
            };
        }

        let Some(token) = self.tokens.access_token().await else {
            debug!("No session, skipping userinfo request");
            return Ok(None);
        };

        match self.fetch(Some(token.as_str())).await {
            Err(ApiError::Unauthorized) => {}
            other => return other.map(Some),
        }

        debug!("Userinfo rejected the access token, forcing a refresh");
        let Some(token) = self.tokens.force_refresh(&token).await else {
            return Ok(None);
        };

        match self.fetch(Some(token.as_str())).await {
            Err(ApiError::Unauthorized) => {
                warn!("Userinfo rejected the refreshed access token");
                Ok(None)
            }
            other => other.map(Some),
        }
    }

    async fn fetch(&self, access_token: Option<&str>) -> Result<UserInfo, ApiError> {
        let request = self
            .identity
            .authorize(self.http_client.get(&self.userinfo_url), access_token);

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::RequestFailed(e.to_string()))?;

        match response.status().as_u16() {
            200 => response
                .json()
                .await
                .map_err(|e| ApiError::ParseFailed(e.to_string())),
            401 => Err(ApiError::Unauthorized),
            403 => Err(ApiError::Forbidden),
            429 => Err(ApiError::RateLimited),
            // Don't expose raw API error details - just log status code
            status => Err(ApiError::RequestFailed(format!("HTTP {}", status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::BearerIdentity;
    use crate::auth::oauth::OAuth2Client;
    use crate::auth::pending::AuthorizationSlot;
    use crate::clock::ManualClock;
    use crate::config::test_config;
    use crate::store::{sample_tokens, MemoryTokenStore, TokenStore};
    use chrono::Utc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> (UserInfoClient, Arc<MemoryTokenStore>) {
        let config = test_config(base);
        let oauth = Arc::new(OAuth2Client::new(&config.oauth, &config.http).unwrap());
        let store = Arc::new(MemoryTokenStore::new());
        let now = Utc::now();
        let tokens = Arc::new(TokenManager::new(
            oauth,
            store.clone(),
            Arc::new(AuthorizationSlot::new()),
            Arc::new(ManualClock::new(now)),
            config.token.refresh_window(),
        ));
        store.set(&sample_tokens(now, 3600)).unwrap();
        let client =
            UserInfoClient::new(&config.oauth, &config.http, Arc::new(BearerIdentity), tokens)
                .unwrap();
        (client, store)
    }

    fn claims() -> serde_json::Value {
        serde_json::json!({
            "sub": "user-42",
            "name": "Jane Doe",
            "email": "jane@example.com",
            "tenant": "acme"
        })
    }

    async fn mount_refresh(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetches_claims_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("Authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims()))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(&server.uri());
        let info = client.get_user_info().await.unwrap().unwrap();
        assert_eq!(info.sub, "user-42");
        assert_eq!(info.display_name(), "Jane Doe");
        assert_eq!(info.claims["tenant"], "acme");
    }

    #[tokio::test]
    async fn test_unauthorized_retries_once_after_refresh() {
        let server = MockServer::start().await;
        mount_refresh(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("Authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("Authorization", "Bearer access-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims()))
            .expect(1)
            .mount(&server)
            .await;

        let (client, store) = client(&server.uri());
        let info = client.get_user_info().await.unwrap().unwrap();
        assert_eq!(info.sub, "user-42");
        assert_eq!(store.get().unwrap().access_token, "access-2");
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_terminal() {
        let server = MockServer::start().await;
        mount_refresh(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let (client, _) = client(&server.uri());
        assert!(client.get_user_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_session_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims()))
            .expect(0)
            .mount(&server)
            .await;

        let (client, store) = client(&server.uri());
        store.clear().unwrap();
        assert!(client.get_user_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forbidden_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let (client, _) = client(&server.uri());
        assert!(matches!(
            client.get_user_info().await,
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn test_display_name_fallback() {
        let info: UserInfo = serde_json::from_value(serde_json::json!({
            "sub": "user-1",
            "preferred_username": "jdoe"
        }))
        .unwrap();
        assert_eq!(info.display_name(), "jdoe");

        let info: UserInfo = serde_json::from_value(serde_json::json!({"sub": "user-1"})).unwrap();
        assert_eq!(info.display_name(), "user-1");
    }
}
