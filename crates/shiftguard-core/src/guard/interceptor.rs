//! Response inspection for every outbound call.
//!
//! `GuardedFetch` decorates a [`Fetch`] primitive. The call is forwarded
//! untouched; the buffered response is then inspected by reference and, when
//! it says the session is gone, the terminator is invoked as a side channel.
//! The caller always receives the original response.

use reqwest::{Request, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{Fetch, FetchFuture, FetchResponse};
use crate::utils::contains_any_ignore_case;

use super::terminator::{SessionTerminator, SignOutReason};

/// Phrases servers use to reject a token, matched case-insensitively.
pub const TOKEN_SIGNALS: [&str; 3] = ["token is invalid", "token expired", "invalid token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Text,
}

impl BodyKind {
    fn from_content_type(content_type: Option<&str>) -> Option<Self> {
        let essence = content_type?
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "application/json" || essence.ends_with("+json") {
            Some(BodyKind::Json)
        } else if essence == "text/plain" {
            Some(BodyKind::Text)
        } else {
            None
        }
    }
}

/// Decide whether a response means the session is no longer valid.
pub fn inspect(response: &FetchResponse) -> Option<SignOutReason> {
    let status = response.status;
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Some(SignOutReason::AuthorizationFailure {
            status: status.as_u16(),
        });
    }

    let found = match BodyKind::from_content_type(response.content_type())? {
        BodyKind::Json => json_carries_signal(&response.body),
        BodyKind::Text => contains_any_ignore_case(&response.text(), &TOKEN_SIGNALS),
    };
    found.then_some(SignOutReason::InvalidTokenSignal)
}

fn json_carries_signal(body: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => value_carries_signal(&value),
        Err(e) => {
            debug!(error = %e, "Skipping token inspection of unparseable JSON body");
            false
        }
    }
}

// Every string value at any depth counts; backends disagree on field names
fn value_carries_signal(value: &Value) -> bool {
    match value {
        Value::String(text) => contains_any_ignore_case(text, &TOKEN_SIGNALS),
        Value::Object(map) => map.values().any(value_carries_signal),
        Value::Array(items) => items.iter().any(value_carries_signal),
        _ => false,
    }
}

/// A [`Fetch`] that signs the session out when a response rejects it.
pub struct GuardedFetch<F, T> {
    inner: F,
    terminator: T,
}

impl<F: Fetch, T: SessionTerminator> GuardedFetch<F, T> {
    pub fn new(inner: F, terminator: T) -> Self {
        Self { inner, terminator }
    }
}

impl<F: Fetch, T: SessionTerminator> Fetch for GuardedFetch<F, T> {
    fn fetch(&self, request: Request) -> FetchFuture<'_> {
        Box::pin(async move {
            let method = request.method().clone();
            let url = request.url().clone();
            // A sign-in completing while this call is in flight must survive
            // a rejection meant for the session the call was sent with
            let generation = self.terminator.session_generation();
            let response = self.inner.fetch(request).await?;

            if let Some(reason) = inspect(&response) {
                warn!(
                    %method,
                    %url,
                    status = response.status.as_u16(),
                    %reason,
                    "Response indicates the session is no longer valid"
                );
                self.terminator.terminate_for(reason, generation);
            }
            Ok(response)
        })
    }
}
