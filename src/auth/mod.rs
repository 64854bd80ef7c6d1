//! OAuth2 authorization code + PKCE authentication.
//!
//! Provides the sign-in flow, on-demand token refresh with single-flight coordination,
//! revocation on logout, and identity queries against the userinfo endpoint.

pub mod callback_server;
pub mod flow;
pub mod identity;
pub mod oauth;
pub mod pending;
pub mod pkce;
pub mod redirect;
pub mod token_manager;
pub mod userinfo;
