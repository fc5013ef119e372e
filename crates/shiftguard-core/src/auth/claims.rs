use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::DEFAULT_SESSION_LIFETIME_MINUTES;

/// The subset of JWT claims the console cares about
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenClaims {
    pub sub: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
}

impl TokenClaims {
    /// Read the payload segment of a JWT without verifying its signature.
    /// Returns `None` for opaque (non-JWT) tokens.
    pub fn decode(token: &str) -> Option<Self> {
        let mut segments = token.split('.');
        let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }

        // Some issuers keep the padding; the no-pad engine rejects it
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "Token payload is not a JSON claims object");
                None
            }
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

/// Work out when a freshly issued token stops being valid.
/// Uses the `exp` claim when present, else `issued_at + fallback_minutes`.
/// A lifetime that does not fit in a timestamp uses the default lifetime.
pub fn resolve_expiry(token: &str, issued_at: DateTime<Utc>, fallback_minutes: i64) -> DateTime<Utc> {
    if let Some(expires_at) = TokenClaims::decode(token).and_then(|claims| claims.expires_at()) {
        return expires_at;
    }

    add_minutes(issued_at, fallback_minutes).unwrap_or_else(|| {
        warn!(
            fallback_minutes,
            "Session lifetime out of range, using the default"
        );
        issued_at + Duration::minutes(DEFAULT_SESSION_LIFETIME_MINUTES)
    })
}

fn add_minutes(instant: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(minutes).and_then(|delta| instant.checked_add_signed(delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_decode_exp_claim() {
        let token = jwt_with_payload(r#"{"sub":"17","exp":1893456000,"iat":1893452400}"#);
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("17"));
        assert_eq!(
            claims.expires_at(),
            DateTime::from_timestamp(1_893_456_000, 0)
        );
    }

    #[test]
    fn test_opaque_tokens_fall_back_to_lifetime() {
        let issued = Utc::now();
        assert_eq!(
            resolve_expiry("not-a-jwt", issued, 60),
            issued + Duration::minutes(60)
        );
        assert_eq!(
            resolve_expiry("a.b.c.d", issued, 15),
            issued + Duration::minutes(15)
        );
    }

    #[test]
    fn test_jwt_without_exp_falls_back() {
        let issued = Utc::now();
        let token = jwt_with_payload(r#"{"sub":"17"}"#);
        assert_eq!(resolve_expiry(&token, issued, 30), issued + Duration::minutes(30));
    }

    #[test]
    fn test_oversized_lifetime_uses_default() {
        let issued = Utc::now();
        let default = issued + Duration::minutes(DEFAULT_SESSION_LIFETIME_MINUTES);
        for minutes in [i64::MAX / 1000, i64::MAX, i64::MIN] {
            assert_eq!(resolve_expiry("opaque-token", issued, minutes), default, "minutes: {minutes}");
        }
    }

    #[test]
    fn test_garbage_payload_is_ignored() {
        let token = format!("x.{}.y", URL_SAFE_NO_PAD.encode("not json"));
        assert!(TokenClaims::decode(&token).is_none());
    }
}
