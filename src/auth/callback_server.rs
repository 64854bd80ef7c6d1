//! Local HTTP callback listener for OAuth authentication.
//!
//! Binds the loopback address named by the redirect URI, waits for the browser to
//! deliver the authorization response, shows a short result page and hands the query
//! parameters back to the caller.

use crate::auth::oauth::CallbackParams;
use crate::error::AuthError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};
use url::Url;

/// Per-connection read timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A bound listener for one authorization response.
pub struct CallbackListener {
    listener: TcpListener,
    callback_path: String,
}

impl CallbackListener {
    /// Bind to the host and port of `redirect_uri`.
    pub async fn bind(redirect_uri: &str) -> Result<Self, AuthError> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| AuthError::InvalidCallback(format!("redirect URI: {}", e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| AuthError::InvalidCallback("redirect URI has no host".into()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| AuthError::InvalidCallback("redirect URI has no port".into()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        Self::bind_addr(&format!("{}:{}", host, port), url.path()).await
    }

    /// Bind to an explicit address, accepting callbacks on `callback_path`.
    pub async fn bind_addr(addr: &str, callback_path: &str) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            AuthError::InvalidCallback(format!("failed to bind callback listener to {}: {}", addr, e))
        })?;

        info!("OAuth callback listener on {}", addr);

        Ok(Self {
            listener,
            callback_path: callback_path.to_string(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Wait for the authorization response, giving up after `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Result<CallbackParams, AuthError> {
        tokio::time::timeout(timeout, self.accept_callback())
            .await
            .map_err(|_| AuthError::CallbackTimeout)?
    }

    async fn accept_callback(&self) -> Result<CallbackParams, AuthError> {
        loop {
            let (stream, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| AuthError::InvalidCallback(format!("connection error: {}", e)))?;
            debug!("Connection from {}", peer_addr);

            if let Some(params) = self.handle_connection(stream).await {
                info!("OAuth callback received");
                return Ok(params);
            }
        }
    }

    /// Returns the parameters if this was a request to the callback path.
    async fn handle_connection(&self, mut stream: TcpStream) -> Option<CallbackParams> {
        let mut buffer = [0; 8192];
        let bytes_read = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buffer)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("Failed to read request: {}", e);
                return None;
            }
            Err(_) => {
                debug!("Timed out reading request");
                return None;
            }
        };

        let request = String::from_utf8_lossy(&buffer[..bytes_read]);
        let mut parts = request.lines().next()?.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            respond(&mut stream, 400, "Bad Request", "text/plain", "Bad Request").await;
            return None;
        };

        if method != "GET" {
            respond(&mut stream, 405, "Method Not Allowed", "text/plain", "Method Not Allowed")
                .await;
            return None;
        }

        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path != self.callback_path {
            respond(&mut stream, 404, "Not Found", "text/plain", "Not Found").await;
            return None;
        }

        let params = CallbackParams::from_query(query);
        let page = match &params.error {
            Some(error) => result_page(
                "Sign-in failed",
                params.error_description.as_deref().unwrap_or(error),
            ),
            None => result_page(
                "Sign-in complete",
                "You can close this tab and return to the application.",
            ),
        };
        respond(&mut stream, 200, "OK", "text/html; charset=utf-8", &page).await;

        Some(params)
    }
}

fn result_page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"UTF-8\"><title>{title}</title></head>\
         <body style=\"font-family: sans-serif; text-align: center; margin-top: 4rem\">\
         <h1>{title}</h1><p>{message}</p></body></html>",
        title = escape_html(title),
        message = escape_html(message),
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn respond(stream: &mut TcpStream, status: u16, reason: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}
