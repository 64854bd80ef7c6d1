//! Hand-off of the authorization URL to the user agent.

use crate::error::AuthError;
use url::Url;

/// Transfers control to the authorization server.
pub trait RedirectHandler: Send + Sync {
    fn redirect(&self, url: &Url) -> Result<(), AuthError>;
}

/// Opens the authorization page in the system browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserRedirect;

impl RedirectHandler for BrowserRedirect {
    fn redirect(&self, url: &Url) -> Result<(), AuthError> {
        tracing::info!("Opening browser for sign-in");
        open::that(url.as_str()).map_err(|e| AuthError::RedirectFailed(e.to_string()))
    }
}

/// Remembers the last URL instead of opening it.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingRedirect {
    pub last: std::sync::Mutex<Option<Url>>,
}

#[cfg(test)]
impl RecordingRedirect {
    pub fn last_url(&self) -> Option<Url> {
        self.last.lock().unwrap().clone()
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.last_url().and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        })
    }
}

#[cfg(test)]
impl RedirectHandler for RecordingRedirect {
    fn redirect(&self, url: &Url) -> Result<(), AuthError> {
        *self.last.lock().unwrap() = Some(url.clone());
        Ok(())
    }
}

/// Always fails, as a browser that cannot be launched would.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FailingRedirect;

#[cfg(test)]
impl RedirectHandler for FailingRedirect {
    fn redirect(&self, _url: &Url) -> Result<(), AuthError> {
        Err(AuthError::RedirectFailed("no browser available".into()))
    }
}
