//! How identity requests are credentialed.
//!
//! The strategy is chosen once from configuration. Production builds only have
//! [`BearerIdentity`]; the header-based development identity exists only when the crate
//! is built with the `dev-identity` feature and the configuration asks for it.

use crate::config::{IdentityConfig, IdentityMode};
use crate::error::AppError;
use reqwest::RequestBuilder;
use std::sync::Arc;

/// Attaches caller identity to an outbound request.
pub trait IdentityStrategy: Send + Sync {
    /// Whether requests need the session's access token.
    fn uses_access_token(&self) -> bool;

    fn authorize(&self, request: RequestBuilder, access_token: Option<&str>) -> RequestBuilder;
}

/// `Authorization: Bearer <access token>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BearerIdentity;

impl IdentityStrategy for BearerIdentity {
    fn uses_access_token(&self) -> bool {
        true
    }

    fn authorize(&self, request: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        match access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// A fixed identity header for development servers.
#[cfg(feature = "dev-identity")]
#[derive(Debug)]
pub struct DevHeaderIdentity {
    header_name: reqwest::header::HeaderName,
    header_value: crate::secure::SecureString,
}

#[cfg(feature = "dev-identity")]
impl DevHeaderIdentity {
    pub fn new(header_name: &str, header_value: &str) -> Result<Self, AppError> {
        let header_name = reqwest::header::HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid identity header name: {}", e)))?;
        reqwest::header::HeaderValue::from_str(header_value)
            .map_err(|e| AppError::Config(format!("invalid identity header value: {}", e)))?;

        Ok(Self {
            header_name,
            header_value: header_value.into(),
        })
    }
}

#[cfg(feature = "dev-identity")]
impl IdentityStrategy for DevHeaderIdentity {
    fn uses_access_token(&self) -> bool {
        false
    }

    fn authorize(&self, request: RequestBuilder, _access_token: Option<&str>) -> RequestBuilder {
        request.header(self.header_name.clone(), self.header_value.as_str())
    }
}

/// Build the configured strategy.
pub fn from_config(config: &IdentityConfig) -> Result<Arc<dyn IdentityStrategy>, AppError> {
    match config.mode {
        IdentityMode::Bearer => Ok(Arc::new(BearerIdentity)),
        #[cfg(feature = "dev-identity")]
        IdentityMode::DevelopmentHeader => {
            tracing::warn!(
                header = %config.header_name,
                "Using development header identity; never use this against production"
            );
            Ok(Arc::new(DevHeaderIdentity::new(
                &config.header_name,
                &config.header_value,
            )?))
        }
        #[cfg(not(feature = "dev-identity"))]
        IdentityMode::DevelopmentHeader => Err(AppError::Config(
            "development header identity is not compiled into this build".into(),
        )),
    }
}
