//! API client for the workforce admin REST API.
//!
//! This module provides the `ApiClient` struct, which performs the
//! credential exchange and makes authenticated requests. All calls go
//! through a [`Fetch`] primitive, normally the guarded global slot, so the
//! session guard sees every response.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::{self, HeaderValue};
use reqwest::{Method, Request, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{resolve_expiry, SessionData, SessionStore};
use crate::config::Config;

use super::{ApiError, Fetch, FetchResponse};

// ============================================================================
// Constants
// ============================================================================

/// Credential exchange endpoint, relative to the API base URL
const LOGIN_ENDPOINT: &str = "/auth/login";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<LoginAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginAccount {
    id: serde_json::Value,
    name: String,
    email: String,
    #[serde(default)]
    is_active: Option<bool>,
    token: String,
}

/// API client for the admin console backend.
/// Clone is cheap - the fetch primitives and the session store are shared.
#[derive(Clone)]
pub struct ApiClient {
    fetch: Arc<dyn Fetch>,
    exchange: Arc<dyn Fetch>,
    store: SessionStore,
    base_url: String,
    session_lifetime_minutes: i64,
}

impl ApiClient {
    /// Create a client that sends every call, the credential exchange
    /// included, through `fetch`.
    pub fn new(fetch: Arc<dyn Fetch>, store: SessionStore, config: &Config) -> Self {
        Self {
            exchange: Arc::clone(&fetch),
            fetch,
            store,
            base_url: config.api_base().to_string(),
            session_lifetime_minutes: config.session_lifetime_minutes,
        }
    }

    /// Use a separate primitive for the credential exchange, so a rejected
    /// password is not mistaken for an expired session.
    pub fn with_exchange(mut self, exchange: Arc<dyn Fetch>) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Exchange credentials and make the result the live session
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionData> {
        let session = self.authenticate(email, password).await?;
        self.store.establish(session.clone())?;
        info!(subject = %session.subject_id, "Login successful");
        Ok(session)
    }

    /// Exchange credentials for session data without touching the store
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<SessionData> {
        let body = serde_json::to_vec(&LoginRequest { email, password })?;
        let request = self.build_request(Method::POST, LOGIN_ENDPOINT, Some(body), None)?;

        let response = self
            .exchange
            .fetch(request)
            .await
            .context("Failed to send authentication request")?;

        let envelope: Option<LoginEnvelope> = response.json().ok();
        if !response.is_success() {
            // Rejected credentials usually still carry the JSON envelope
            if let Some(message) = envelope.and_then(|e| e.message) {
                return Err(ApiError::LoginRejected(message).into());
            }
            return Err(ApiError::from_status(response.status, &response.text()).into());
        }

        let envelope = envelope.ok_or_else(|| {
            ApiError::InvalidResponse("Login response is not a JSON envelope".to_string())
        })?;
        Self::session_from_envelope(envelope, self.session_lifetime_minutes)
    }

    fn session_from_envelope(envelope: LoginEnvelope, lifetime_minutes: i64) -> Result<SessionData> {
        let account = match (envelope.success, envelope.data) {
            (true, Some(account)) => account,
            _ => {
                let message = envelope
                    .message
                    .unwrap_or_else(|| "Invalid email or password".to_string());
                return Err(ApiError::LoginRejected(message).into());
            }
        };

        if account.is_active == Some(false) {
            return Err(ApiError::LoginRejected("Account is inactive".to_string()).into());
        }
        if account.token.trim().is_empty() {
            return Err(ApiError::InvalidResponse("Login response has no token".to_string()).into());
        }

        let subject_id = match account.id {
            serde_json::Value::String(id) => id,
            other => other.to_string(),
        };
        let created_at = Utc::now();
        let expires_at = resolve_expiry(&account.token, created_at, lifetime_minutes);
        debug!(subject = %subject_id, %expires_at, "Resolved token expiry");

        Ok(SessionData {
            subject_id,
            display_name: account.name,
            email: account.email,
            access_token: account.token,
            created_at,
            expires_at,
        })
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        token: Option<&str>,
    ) -> Result<Request> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let url = Url::parse(&format!("{}{}", self.base_url, path))
            .with_context(|| format!("Invalid API URL for path {}", path))?;

        let mut request = Request::new(method, url);
        let headers = request.headers_mut();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        if let Some(body) = body {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *request.body_mut() = Some(body.into());
        }
        Ok(request)
    }

    /// Send an authenticated request, retrying on 429 with exponential backoff.
    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<FetchResponse> {
        let token = self.store.token().ok_or(ApiError::NoSession)?;
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let request = self.build_request(method.clone(), path, body.clone(), Some(&token))?;
            let response = self
                .fetch
                .fetch(request)
                .await
                .with_context(|| format!("Failed to send {} request to {}", method, path))?;

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited.into());
                }
                warn!(path = path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            if response.is_success() {
                return Ok(response);
            }
            return Err(ApiError::from_status(response.status, &response.text()).into());
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None).await?;
        response
            .json()
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_vec(body)?;
        let response = self.send(Method::POST, path, Some(body)).await?;
        response
            .json()
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }
}
