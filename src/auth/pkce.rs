//! PKCE (RFC 7636, S256) and anti-CSRF state generation.

use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of OS entropy behind each verifier and state token (256 bits).
const ENTROPY_BYTES: usize = 32;

/// The only challenge method this client sends.
pub const CHALLENGE_METHOD: &str = "S256";

/// PKCE code verifier and challenge pair.
pub struct PkcePair {
    /// The code verifier (kept locally, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 of verifier, sent in auth request).
    pub challenge: String,
}

impl PkcePair {
    /// Generate a new PKCE pair from the operating system's CSPRNG.
    ///
    /// Fails with [`AuthError::PkceGenerationFailed`] if the OS source is unavailable.
    pub fn generate() -> Result<Self, AuthError> {
        let verifier = random_token()?;
        let challenge = compute_challenge(&verifier);

        Ok(Self {
            verifier,
            challenge,
        })
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// challenge = BASE64URL-NOPAD(SHA256(ASCII(verifier)))
pub fn compute_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generate a random state token for CSRF protection.
pub fn generate_state() -> Result<String, AuthError> {
    random_token()
}

fn random_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; ENTROPY_BYTES];
    OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
        tracing::error!("Secure random source unavailable: {}", e);
        AuthError::PkceGenerationFailed
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
