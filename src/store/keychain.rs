//! macOS Keychain token store.
//!
//! The whole token set is kept as one JSON generic-password item, so replacing it is a
//! single keychain write.

use super::{decode_record, TokenSet, TokenStore};
use crate::error::StoreError;
use security_framework::passwords::{
    delete_generic_password, get_generic_password, set_generic_password,
};
use zeroize::Zeroizing;

/// Account name for the token set item.
const ACCOUNT_TOKEN_SET: &str = "oauth_token_set";

/// Token store backed by the login keychain.
#[derive(Debug, Clone)]
pub struct KeychainTokenStore {
    service: String,
}

impl KeychainTokenStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl TokenStore for KeychainTokenStore {
    fn set(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        let json = Zeroizing::new(
            serde_json::to_vec(tokens).map_err(|e| StoreError::StoreFailed(e.to_string()))?,
        );
        set_generic_password(&self.service, ACCOUNT_TOKEN_SET, &json)
            .map_err(|e| StoreError::StoreFailed(e.to_string()))
    }

    fn get(&self) -> Option<TokenSet> {
        match get_generic_password(&self.service, ACCOUNT_TOKEN_SET) {
            Ok(bytes) => decode_record(&Zeroizing::new(bytes)),
            Err(e) if is_not_found_error(&e) => None,
            Err(e) => {
                tracing::warn!("Keychain read failed: {}", e);
                None
            }
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        match delete_generic_password(&self.service, ACCOUNT_TOKEN_SET) {
            Ok(()) => Ok(()),
            Err(e) if is_not_found_error(&e) => Ok(()),
            Err(e) => Err(StoreError::DeleteFailed(e.to_string())),
        }
    }
}

/// Helper to check if a security framework error is "item not found".
fn is_not_found_error(error: &security_framework::base::Error) -> bool {
    // errSecItemNotFound = -25300
    error.code() == -25300
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sample_tokens;
    use chrono::Utc;

    // Note: These tests require Keychain access and may prompt for permission

    #[test]
    #[ignore = "requires keychain access"]
    fn test_store_and_retrieve_token_set() {
        let store = KeychainTokenStore::new("oauth-session.test");
        let tokens = sample_tokens(Utc::now(), 3600);

        store.set(&tokens).expect("Failed to store token set");
        assert_eq!(store.get(), Some(tokens));

        store.clear().expect("Failed to delete token set");
        assert!(store.get().is_none());
    }
}
