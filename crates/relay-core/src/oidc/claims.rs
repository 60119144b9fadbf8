//! Token claims decoding.
//!
//! Access and id tokens stay opaque to the relay: the payload is decoded for
//! display and expiry bookkeeping only. Signature validation belongs to the
//! downstream application.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Local, TimeZone};
use serde_json::{Map, Value};

/// JWT segments are unpadded base64url, but some issuers pad anyway.
const JWT_SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimsError {
    #[error("token is not a JWT (expected 3 segments, found {0})")]
    NotAJwt(usize),
    #[error("token payload is not base64url")]
    Encoding,
    #[error("token payload is not a JSON object: {0}")]
    Json(String),
}

/// Decoded token payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Decodes the payload segment of a compact JWT.
    ///
    /// # Errors
    /// Returns an error if the token is not a three-segment JWT with a JSON
    /// object payload.
    pub fn decode(token: &str) -> Result<Self, ClaimsError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        if segments.len() != 3 {
            return Err(ClaimsError::NotAJwt(segments.len()));
        }
        let payload = JWT_SEGMENT
            .decode(segments[1])
            .map_err(|_err| ClaimsError::Encoding)?;
        match serde_json::from_slice::<Value>(&payload) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(ClaimsError::Json(format!("found {other}"))),
            Err(e) => Err(ClaimsError::Json(e.to_string())),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    fn str_claim(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn time_claim(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    pub fn preferred_username(&self) -> Option<&str> {
        self.str_claim("preferred_username")
    }

    pub fn email(&self) -> Option<&str> {
        self.str_claim("email")
    }

    pub fn nonce(&self) -> Option<&str> {
        self.str_claim("nonce")
    }

    /// Expiry, seconds since epoch (identity provider clock).
    pub fn expires_at(&self) -> Option<i64> {
        self.time_claim("exp")
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.time_claim("iat")
    }

    /// Username if present, otherwise the subject.
    pub fn display_name(&self) -> Option<&str> {
        self.preferred_username().or_else(|| self.subject())
    }

    /// Expiry converted to local time for display.
    pub fn expires_at_local(&self) -> Option<DateTime<Local>> {
        Local.timestamp_opt(self.expires_at()?, 0).single()
    }

    /// Keycloak `realm_access.roles`, in token order.
    pub fn realm_roles(&self) -> Vec<&str> {
        self.0
            .get("realm_access")
            .and_then(|access| access.get("roles"))
            .and_then(Value::as_array)
            .map(|roles| roles.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    let token = token.trim();
    if token.len() <= 16 || !token.is_char_boundary(12) {
        return "***".to_string();
    }
    format!("{}...", &token[..12])
}
