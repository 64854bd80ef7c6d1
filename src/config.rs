//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Placeholder client id shipped in config.toml.
const PLACEHOLDER_CLIENT_ID: &str = "YOUR_CLIENT_ID";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: ClientConfig,
    pub token: TokenConfig,
    pub identity: IdentityConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

/// OAuth client registration and the authorization server endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub userinfo_url: String,
    pub scopes: ScopesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    pub scopes: Vec<String>,
}

impl ClientConfig {
    /// Scopes as a single space-separated string.
    pub fn scope_string(&self) -> String {
        self.scopes.scopes.join(" ")
    }
}

/// Where the token set is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    File,
    Memory,
    Keychain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub refresh_before_expiry_seconds: u64,
    pub pending_ttl_seconds: u64,
    pub store: StoreKind,
    #[serde(default)]
    pub file: String,
}

impl TokenConfig {
    pub fn refresh_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_before_expiry_seconds as i64)
    }

    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_ttl_seconds as i64)
    }
}

/// How identity calls are credentialed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    Bearer,
    DevelopmentHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub mode: IdentityMode,
    #[serde(default)]
    pub header_name: String,
    #[serde(default)]
    pub header_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::embedded()?;

        // Apply environment variable overrides
        let overrides: [(&str, &mut String); 7] = [
            ("OAUTH_CLIENT_ID", &mut config.oauth.client_id),
            ("OAUTH_REDIRECT_URI", &mut config.oauth.redirect_uri),
            ("OAUTH_AUTHORIZE_URL", &mut config.oauth.authorize_url),
            ("OAUTH_TOKEN_URL", &mut config.oauth.token_url),
            ("OAUTH_REVOKE_URL", &mut config.oauth.revoke_url),
            ("OAUTH_USERINFO_URL", &mut config.oauth.userinfo_url),
            ("OAUTH_TOKEN_FILE", &mut config.token.file),
        ];
        for (key, slot) in overrides {
            if let Ok(value) = env::var(key) {
                *slot = value;
            }
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Parse the embedded config.toml without overrides or validation.
    pub fn embedded() -> Result<Self> {
        toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() || self.oauth.client_id == PLACEHOLDER_CLIENT_ID {
            anyhow::bail!(
                "OAuth client_id not configured. Set OAUTH_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        let endpoints = [
            ("redirect_uri", &self.oauth.redirect_uri),
            ("authorize_url", &self.oauth.authorize_url),
            ("token_url", &self.oauth.token_url),
            ("revoke_url", &self.oauth.revoke_url),
            ("userinfo_url", &self.oauth.userinfo_url),
        ];
        for (name, value) in endpoints {
            Url::parse(value).with_context(|| format!("oauth.{} is not a valid URL", name))?;
        }

        if self.oauth.scopes.scopes.is_empty() {
            anyhow::bail!("oauth.scopes must request at least one scope");
        }

        if self.identity.mode == IdentityMode::DevelopmentHeader {
            if !cfg!(feature = "dev-identity") {
                anyhow::bail!(
                    "identity.mode = \"development_header\" requires a build with the \
                     dev-identity feature"
                );
            }
            if self.identity.header_name.is_empty() || self.identity.header_value.is_empty() {
                anyhow::bail!("development_header identity needs header_name and header_value");
            }
        }

        Ok(())
    }

    /// Resolved path of the token file.
    pub fn token_file(&self) -> Result<PathBuf> {
        if !self.token.file.is_empty() {
            return Ok(PathBuf::from(&self.token.file));
        }
        let dirs = directories::ProjectDirs::from("", "", &self.app.name)
            .context("Could not determine a data directory for the token file")?;
        Ok(dirs.data_dir().join("tokens.json"))
    }
}

/// Configuration pointing every endpoint at `base`, for tests.
#[cfg(test)]
pub(crate) fn test_config(base: &str) -> Config {
    Config {
        app: AppConfig {
            name: "oauth-session-test".into(),
            version: "0.1.0".into(),
        },
        oauth: ClientConfig {
            client_id: "test-client".into(),
            redirect_uri: "http://127.0.0.1:28491/callback".into(),
            authorize_url: format!("{}/authorize", base),
            token_url: format!("{}/token", base),
            revoke_url: format!("{}/revoke", base),
            userinfo_url: format!("{}/userinfo", base),
            scopes: ScopesConfig {
                scopes: vec!["openid".into(), "offline_access".into()],
            },
        },
        token: TokenConfig {
            refresh_before_expiry_seconds: 300,
            pending_ttl_seconds: 600,
            store: StoreKind::Memory,
            file: String::new(),
        },
        identity: IdentityConfig {
            mode: IdentityMode::Bearer,
            header_name: String::new(),
            header_value: String::new(),
        },
        http: HttpConfig {
            timeout_seconds: 5,
            connect_timeout_seconds: 5,
        },
        logging: LoggingConfig {
            level: "debug".into(),
        },
    }
}
