//! Unverified reading of JWT payloads.
//!
//! Used only to warn about a token that looks expired. The server's 401 is
//! what actually ends a session.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClaimsError {
    #[error("Token is not a JWT (expected three dot-separated segments)")]
    NotJwt,

    #[error("Token payload is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Token payload is not a JSON claims object: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Standard expiry, seconds since the epoch
    #[serde(default)]
    pub exp: Option<f64>,
    /// Expiry as issued by the Collabo backend, seconds since the epoch
    #[serde(default)]
    pub expires_in: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid { remaining: Duration },
    Expired,
    /// Opaque token, or no expiry claim
    Unknown,
}

impl TokenStatus {
    /// Minutes remaining until expiry (for display)
    pub fn minutes_remaining(&self) -> Option<i64> {
        match self {
            TokenStatus::Valid { remaining } => Some(remaining.num_minutes().max(0)),
            _ => None,
        }
    }
}

impl TokenClaims {
    pub fn decode(token: &str) -> Result<Self, ClaimsError> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
            _ => return Err(ClaimsError::NotJwt),
        };
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.exp.or(self.expires_in)?;
        if !secs.is_finite() {
            return None;
        }
        DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        match self.expires_at() {
            Some(expiry) if expiry <= now => TokenStatus::Expired,
            Some(expiry) => TokenStatus::Valid {
                remaining: expiry - now,
            },
            None => TokenStatus::Unknown,
        }
    }
}

/// Best-effort expiry check of a token against the current time.
pub fn token_status(token: &str) -> TokenStatus {
    match TokenClaims::decode(token) {
        Ok(claims) => claims.status_at(Utc::now()),
        Err(_) => TokenStatus::Unknown,
    }
}

// ============================================================================
// Tests
// ============================================================================
