//! Session acquisition: client, state machine, controller.

pub mod client;
pub mod controller;
pub mod state;

use crate::oidc::{Claims, TokenSet};

pub use client::{ClientPhase, LoginOptions, LogoutOptions, SessionClient, SessionClientCell};
pub use controller::SessionController;
pub use state::{SessionEvent, SessionMachine, SessionProfile, SessionState};

/// Seconds since the unix epoch on the local clock.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Tokens held by the session client.
///
/// `authenticated()` is derived from the access token, so "authenticated
/// without a token" cannot be represented.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    token: Option<String>,
    claims: Option<Claims>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    id_claims: Option<Claims>,
    /// Local clock minus identity provider clock, seconds.
    time_skew: i64,
    /// Local expiry for opaque tokens, from `expires_in`.
    expires_at: Option<i64>,
}

impl Session {
    /// Builds a session from a token response received at `now`.
    pub fn from_tokens(tokens: TokenSet, now: i64) -> Self {
        let mut session = Self::default();
        session.store(tokens, now);
        session
    }

    fn store(&mut self, tokens: TokenSet, now: i64) {
        let claims = Claims::decode(&tokens.access_token).ok();
        self.time_skew = claims
            .as_ref()
            .and_then(Claims::issued_at)
            .map_or(0, |iat| now - iat);
        self.expires_at = tokens.expires_in.map(|secs| now + secs);
        self.claims = claims;
        self.token = Some(tokens.access_token);

        // Refresh responses may omit tokens that did not rotate.
        if let Some(refresh) = tokens.refresh_token {
            self.refresh_token = Some(refresh);
        }
        if let Some(id_token) = tokens.id_token {
            self.id_claims = Claims::decode(&id_token).ok();
            self.id_token = Some(id_token);
        }
    }

    /// Applies a refresh response, keeping tokens the response did not rotate.
    pub fn apply_refresh(&mut self, tokens: TokenSet, now: i64) {
        self.store(tokens, now);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    pub fn id_claims(&self) -> Option<&Claims> {
        self.id_claims.as_ref()
    }

    /// Access token claims, or id token claims when the access token is opaque.
    pub fn profile_claims(&self) -> Option<&Claims> {
        self.claims.as_ref().or(self.id_claims.as_ref())
    }

    pub fn time_skew(&self) -> i64 {
        self.time_skew
    }

    /// Seconds of validity left at `now`, corrected for clock skew.
    ///
    /// `None` when the token carries no expiry we can read.
    pub fn remaining_validity(&self, now: i64) -> Option<i64> {
        self.token.as_ref()?;
        if let Some(exp) = self.claims.as_ref().and_then(Claims::expires_at) {
            return Some(exp - now + self.time_skew);
        }
        self.expires_at.map(|at| at - now)
    }

    /// Whether the token expires within `min_validity` seconds of `now`.
    ///
    /// A token with unknown expiry is treated as valid.
    pub fn is_token_expired(&self, min_validity: u32, now: i64) -> bool {
        self.remaining_validity(now)
            .is_some_and(|left| left < i64::from(min_validity))
    }
}
