//! Transient state of the in-flight authorization attempt.
//!
//! One slot per session. Starting an attempt overwrites whatever an abandoned attempt
//! left behind; completing one takes the record out so it cannot be replayed.

use crate::secure::SecureString;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use uuid::Uuid;

/// Verifier and state for one authorization attempt.
#[derive(Debug)]
pub struct PendingAuthorization {
    /// Correlates log lines for one attempt.
    pub attempt_id: Uuid,
    pub state: String,
    verifier: SecureString,
    created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    pub fn new(state: String, verifier: String, created_at: DateTime<Utc>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            state,
            verifier: SecureString::new(verifier),
            created_at,
        }
    }

    /// The verifier, if the attempt is still within `ttl` of its creation.
    pub fn verifier(&self, now: DateTime<Utc>, ttl: Duration) -> Option<&SecureString> {
        (now - self.created_at <= ttl).then_some(&self.verifier)
    }
}

/// The single-slot holder.
#[derive(Debug, Default)]
pub struct AuthorizationSlot {
    pending: Mutex<Option<PendingAuthorization>>,
}

impl AuthorizationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new attempt, discarding any previous one.
    pub fn begin(&self, pending: PendingAuthorization) {
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(pending);
        if let Some(previous) = previous {
            tracing::debug!(attempt = %previous.attempt_id, "Discarding abandoned authorization attempt");
        }
    }

    /// Remove and return the current attempt.
    pub fn take(&self) -> Option<PendingAuthorization> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn clear(&self) {
        self.take();
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
