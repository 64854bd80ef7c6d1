//! Authorization code flow: starting a sign-in and completing it from the callback.

use crate::auth::oauth::{CallbackParams, OAuth2Client};
use crate::auth::pending::{AuthorizationSlot, PendingAuthorization};
use crate::auth::pkce::{generate_state, PkcePair};
use crate::auth::redirect::RedirectHandler;
use crate::auth::token_manager::TokenManager;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::store::TokenSet;
use chrono::Duration;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Drives one sign-in at a time.
pub struct AuthorizationFlow {
    oauth_client: Arc<OAuth2Client>,
    tokens: Arc<TokenManager>,
    pending: Arc<AuthorizationSlot>,
    redirect: Arc<dyn RedirectHandler>,
    clock: Arc<dyn Clock>,
    /// How long a started attempt keeps its verifier.
    pending_ttl: Duration,
}

impl AuthorizationFlow {
    pub fn new(
        oauth_client: Arc<OAuth2Client>,
        tokens: Arc<TokenManager>,
        pending: Arc<AuthorizationSlot>,
        redirect: Arc<dyn RedirectHandler>,
        clock: Arc<dyn Clock>,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            oauth_client,
            tokens,
            pending,
            redirect,
            clock,
            pending_ttl,
        }
    }

    /// Start a sign-in: record a fresh verifier and state, then hand the user agent to
    /// the authorization server. Any earlier unfinished attempt is discarded.
    pub fn begin_authorization(&self) -> Result<(), AuthError> {
        let pkce = PkcePair::generate()?;
        let state = generate_state()?;
        let url = self.oauth_client.authorization_url(&pkce.challenge, &state);

        let pending = PendingAuthorization::new(state, pkce.verifier, self.clock.now());
        let attempt_id = pending.attempt_id;
        self.pending.begin(pending);

        info!(attempt = %attempt_id, "Starting authorization");

        self.redirect.redirect(&url).inspect_err(|e| {
            warn!(attempt = %attempt_id, "Redirect failed: {}", e);
            self.pending.clear();
        })
    }

    /// Validate the callback and exchange its code for tokens.
    ///
    /// Checks run in a fixed order and stop at the first failure: server error, state,
    /// code, verifier. The pending attempt is consumed whatever the outcome.
    pub async fn complete_authorization(
        &self,
        params: &CallbackParams,
    ) -> Result<TokenSet, AuthError> {
        let pending = self.pending.take();

        if let Some(error) = &params.error {
            warn!("Authorization server returned error: {}", error);
            return Err(AuthError::AuthorizationDenied {
                error: error.clone(),
                description: params.error_description.clone(),
            });
        }

        let pending = match (pending, params.state.as_deref()) {
            (Some(pending), Some(state)) if pending.state == state => pending,
            (pending, _) => {
                error!(
                    attempt = ?pending.as_ref().map(|p| p.attempt_id),
                    "Callback state does not match the pending authorization (possible CSRF)"
                );
                return Err(AuthError::StateMismatch);
            }
        };

        let code = params.code.as_deref().ok_or(AuthError::MissingCode)?;

        let verifier = pending
            .verifier(self.clock.now(), self.pending_ttl)
            .ok_or(AuthError::MissingPkceVerifier)?;

        let response = self
            .oauth_client
            .exchange_code(code, verifier.as_str())
            .await?;

        let tokens = TokenSet::from_response(&response, self.clock.now(), None);
        self.tokens.install(&tokens).await?;

        info!(attempt = %pending.attempt_id, "Signed in, token expires at {}", tokens.expires_at);
        Ok(tokens)
    }

    /// Whether a sign-in has been started and not yet completed.
    pub fn is_pending(&self) -> bool {
        self.pending.is_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::redirect::{FailingRedirect, RecordingRedirect};
    use crate::store::MAX_EXPIRES_IN_SECS;
    use crate::clock::ManualClock;
    use crate::config::test_config;
    use crate::store::{MemoryTokenStore, TokenStore};
    use chrono::Utc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        flow: AuthorizationFlow,
        store: Arc<MemoryTokenStore>,
        redirect: Arc<RecordingRedirect>,
        clock: Arc<ManualClock>,
    }

    fn harness(base: &str) -> Harness {
        let redirect = Arc::new(RecordingRedirect::default());
        let (flow, store, clock) = build_flow(base, redirect.clone());
        Harness {
            flow,
            store,
            redirect,
            clock,
        }
    }

    fn build_flow(
        base: &str,
        redirect: Arc<dyn RedirectHandler>,
    ) -> (AuthorizationFlow, Arc<MemoryTokenStore>, Arc<ManualClock>) {
        let config = test_config(base);
        let oauth = Arc::new(OAuth2Client::new(&config.oauth, &config.http).unwrap());
        let store = Arc::new(MemoryTokenStore::new());
        let pending = Arc::new(AuthorizationSlot::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = Arc::new(TokenManager::new(
            oauth.clone(),
            store.clone(),
            pending.clone(),
            clock.clone(),
            config.token.refresh_window(),
        ));
        let flow = AuthorizationFlow::new(
            oauth,
            tokens,
            pending,
            redirect,
            clock.clone(),
            config.token.pending_ttl(),
        );
        (flow, store, clock)
    }

    async fn mount_token_success(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "refresh-1",
                "scope": "openid offline_access"
            })))
            .mount(server)
            .await;
    }

    fn callback(state: Option<&str>, code: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_sign_in() {
        let server = MockServer::start().await;
        mount_token_success(&server).await;
        let h = harness(&server.uri());

        h.flow.begin_authorization().unwrap();
        assert!(h.flow.is_pending());
        let state = h.redirect.param("state").unwrap();
        assert_eq!(h.redirect.param("code_challenge_method").as_deref(), Some("S256"));

        let tokens = h
            .flow
            .complete_authorization(&callback(Some(&state), Some("code-1")))
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "access-1");
        assert_eq!(tokens.expires_at, h.clock.now() + Duration::seconds(3600));
        assert_eq!(h.store.get(), Some(tokens));
        assert!(!h.flow.is_pending());
    }

    #[tokio::test]
    async fn test_redirect_failure_clears_pending() {
        let server = MockServer::start().await;
        let (flow, store, _clock) = build_flow(&server.uri(), Arc::new(FailingRedirect));

        let err = flow.begin_authorization().unwrap_err();
        assert!(matches!(err, AuthError::RedirectFailed(_)));
        assert!(!flow.is_pending());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_oversized_lifetime_is_clamped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"access_token":"access-1","token_type":"Bearer","expires_in":18446744073709551615,"refresh_token":"refresh-1"}"#,
                "application/json",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let h = harness(&server.uri());

        h.flow.begin_authorization().unwrap();
        let state = h.redirect.param("state").unwrap();
        let tokens = h
            .flow
            .complete_authorization(&callback(Some(&state), Some("code-1")))
            .await
            .unwrap();

        let max = h.clock.now() + Duration::seconds(MAX_EXPIRES_IN_SECS as i64);
        assert_eq!(tokens.expires_at, max);
        assert_eq!(h.flow.tokens.access_token().await.unwrap().as_str(), "access-1");
        assert_eq!(h.store.get().unwrap().expires_at, max);
    }

    #[tokio::test]
    async fn test_exchange_sends_verifier_matching_challenge() {
        let server = MockServer::start().await;
        mount_token_success(&server).await;
        let h = harness(&server.uri());

        h.flow.begin_authorization().unwrap();
        let state = h.redirect.param("state").unwrap();
        let challenge = h.redirect.param("code_challenge").unwrap();

        h.flow
            .complete_authorization(&callback(Some(&state), Some("code-1")))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        let verifier = url::form_urlencoded::parse(body.as_bytes())
            .find(|(k, _)| k == "code_verifier")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(crate::auth::pkce::compute_challenge(&verifier), challenge);
    }

    #[tokio::test]
    async fn test_state_mismatch_leaves_store_empty() {
        let server = MockServer::start().await;
        mount_token_success(&server).await;
        let h = harness(&server.uri());

        h.flow.begin_authorization().unwrap();
        let err = h
            .flow
            .complete_authorization(&callback(Some("abc"), Some("code-1")))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::StateMismatch));
        assert!(h.store.get().is_none());
        assert!(!h.flow.is_pending());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_off_by_one_character_rejected() {
        let server = MockServer::start().await;
        mount_token_success(&server).await;
        let h = harness(&server.uri());

        let tampers: [fn(&str) -> String; 4] = [
            |s| s[..s.len() - 1].to_string(),
            |s| format!("{}x", s),
            |s| {
                let first = if s.starts_with('x') { 'y' } else { 'x' };
                format!("{}{}", first, &s[1..])
            },
            |s| format!(" {}", s),
        ];

        for tamper in tampers {
            h.flow.begin_authorization().unwrap();
            let state = h.redirect.param("state").unwrap();
            let tampered = tamper(&state);
            assert_ne!(tampered, state);

            let err = h
                .flow
                .complete_authorization(&callback(Some(&tampered), Some("code")))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::StateMismatch));
        }
        assert!(h.store.get().is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_callback_without_pending_attempt_is_mismatch() {
        let server = MockServer::start().await;
        let h = harness(&server.uri());

        let err = h
            .flow
            .complete_authorization(&callback(Some("xyz"), Some("code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn test_error_checked_before_state() {
        let server = MockServer::start().await;
        let h = harness(&server.uri());
        h.flow.begin_authorization().unwrap();

        let params = CallbackParams {
            error: Some("access_denied".into()),
            error_description: Some("User cancelled".into()),
            state: Some("wrong".into()),
            code: None,
        };
        let err = h.flow.complete_authorization(&params).await.unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationDenied { ref error, .. } if error == "access_denied"));
        assert!(!h.flow.is_pending());
    }

    #[tokio::test]
    async fn test_missing_code() {
        let server = MockServer::start().await;
        let h = harness(&server.uri());
        h.flow.begin_authorization().unwrap();
        let state = h.redirect.param("state").unwrap();

        let err = h
            .flow
            .complete_authorization(&callback(Some(&state), None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingCode));
    }

    #[tokio::test]
    async fn test_expired_attempt_has_no_verifier() {
        let server = MockServer::start().await;
        mount_token_success(&server).await;
        let h = harness(&server.uri());
        h.flow.begin_authorization().unwrap();
        let state = h.redirect.param("state").unwrap();

        h.clock.advance(Duration::minutes(11));
        let err = h
            .flow
            .complete_authorization(&callback(Some(&state), Some("code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingPkceVerifier));
        assert!(h.store.get().is_none());
    }

    #[tokio::test]
    async fn test_callback_cannot_be_replayed() {
        let server = MockServer::start().await;
        mount_token_success(&server).await;
        let h = harness(&server.uri());
        h.flow.begin_authorization().unwrap();
        let state = h.redirect.param("state").unwrap();
        let params = callback(Some(&state), Some("code-1"));

        h.flow.complete_authorization(&params).await.unwrap();
        let err = h.flow.complete_authorization(&params).await.unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn test_new_attempt_supersedes_abandoned_one() {
        let server = MockServer::start().await;
        mount_token_success(&server).await;
        let h = harness(&server.uri());

        h.flow.begin_authorization().unwrap();
        let abandoned = h.redirect.param("state").unwrap();
        h.flow.begin_authorization().unwrap();
        let current = h.redirect.param("state").unwrap();
        assert_ne!(abandoned, current);

        let err = h
            .flow
            .complete_authorization(&callback(Some(&abandoned), Some("code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn test_exchange_failure_clears_pending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;
        let h = harness(&server.uri());
        h.flow.begin_authorization().unwrap();
        let state = h.redirect.param("state").unwrap();

        let err = h
            .flow
            .complete_authorization(&callback(Some(&state), Some("code")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExchangeFailed { .. }));
        assert!(!h.flow.is_pending());
        assert!(h.store.get().is_none());
    }
}
