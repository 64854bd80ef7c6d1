//! The assembled session: one object the application holds for the process lifetime.

use crate::auth::flow::AuthorizationFlow;
use crate::auth::identity;
use crate::auth::oauth::{CallbackParams, OAuth2Client};
use crate::auth::pending::AuthorizationSlot;
use crate::auth::redirect::{BrowserRedirect, RedirectHandler};
use crate::auth::token_manager::TokenManager;
use crate::auth::userinfo::{UserInfo, UserInfoClient};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StoreKind};
use crate::error::{ApiError, AuthError};
use crate::store::{FileTokenStore, MemoryTokenStore, TokenSet, TokenStore};
use anyhow::Result;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Sign-in, token access, identity and sign-out for a single user session.
pub struct AuthSession {
    config: Config,
    flow: AuthorizationFlow,
    tokens: Arc<TokenManager>,
    userinfo: UserInfoClient,
}

impl AuthSession {
    /// Build a session with the configured store, the system browser and wall-clock time.
    pub fn new(config: Config) -> Result<Self> {
        let store = open_store(&config)?;
        Self::with_parts(config, store, Arc::new(BrowserRedirect), Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn TokenStore>,
        redirect: Arc<dyn RedirectHandler>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let oauth_client = Arc::new(OAuth2Client::new(&config.oauth, &config.http)?);
        let pending = Arc::new(AuthorizationSlot::new());

        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&oauth_client),
            store,
            Arc::clone(&pending),
            Arc::clone(&clock),
            config.token.refresh_window(),
        ));

        let flow = AuthorizationFlow::new(
            oauth_client,
            Arc::clone(&tokens),
            pending,
            redirect,
            clock,
            config.token.pending_ttl(),
        );

        let identity = identity::from_config(&config.identity)?;
        let userinfo =
            UserInfoClient::new(&config.oauth, &config.http, identity, Arc::clone(&tokens))?;

        Ok(Self {
            config,
            flow,
            tokens,
            userinfo,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a sign-in and hand the user agent to the authorization server.
    pub fn begin_authorization(&self) -> Result<(), AuthError> {
        self.flow.begin_authorization()
    }

    /// Finish the sign-in from the redirect's query parameters.
    pub async fn complete_authorization(
        &self,
        params: &CallbackParams,
    ) -> Result<TokenSet, AuthError> {
        self.flow.complete_authorization(params).await
    }

    /// A valid access token, or `None` when signed out.
    pub async fn access_token(&self) -> Option<Zeroizing<String>> {
        self.tokens.access_token().await
    }

    /// Claims for the signed-in user, or `None` when unauthenticated.
    pub async fn user_info(&self) -> Result<Option<UserInfo>, ApiError> {
        self.userinfo.get_user_info().await
    }

    /// Revoke and forget the session. Never fails.
    pub async fn logout(&self) {
        self.tokens.logout().await
    }

    /// The token lifecycle manager, for callers that need refresh control.
    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.tokens
    }
}

/// Open the token store selected in configuration.
pub fn open_store(config: &Config) -> Result<Arc<dyn TokenStore>> {
    match config.token.store {
        StoreKind::File => {
            let path = config.token_file()?;
            tracing::debug!("Using token file {}", path.display());
            Ok(Arc::new(FileTokenStore::new(path)))
        }
        StoreKind::Memory => Ok(Arc::new(MemoryTokenStore::new())),
        #[cfg(target_os = "macos")]
        StoreKind::Keychain => Ok(Arc::new(crate::store::KeychainTokenStore::new(format!(
            "{}.tokens",
            config.app.name
        )))),
        #[cfg(not(target_os = "macos"))]
        StoreKind::Keychain => {
            anyhow::bail!("token.store = \"keychain\" is only available on macOS")
        }
    }
}
