//! OAuth2 authorization code + PKCE client with a persisted, self-refreshing session.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod secure;
pub mod session;
pub mod store;

pub use auth::oauth::CallbackParams;
pub use auth::userinfo::UserInfo;
pub use config::Config;
pub use error::{ApiError, AppError, AuthError, StoreError};
pub use session::AuthSession;
pub use store::{TokenSet, TokenStore};
