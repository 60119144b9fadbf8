//! Handoff to the downstream application.
//!
//! Builds the outbound request that carries the access token to the
//! downstream system. Without a usable token the user still gets to the
//! destination, just unauthenticated.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use url::Url;

use crate::error::{HandoffError, NavigationError, RefreshError};
use crate::navigator::{BrowsingContext, Navigator};
use crate::oidc::mask_token;
use crate::session::SessionClient;

/// Minimum token validity, in seconds, required before a handoff.
pub const DEFAULT_MIN_VALIDITY_SECS: u32 = 30;

/// How the session is carried to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandoffStrategy {
    /// Downstream sign-in endpoint validates the token, then redirects to `state`.
    #[default]
    OAuthRelay,
    /// Token appended to the destination's query string.
    TokenQuery,
    /// Destination as is, no credentials.
    Plain,
}

impl HandoffStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            HandoffStrategy::OAuthRelay => "oauth-relay",
            HandoffStrategy::TokenQuery => "token-query",
            HandoffStrategy::Plain => "plain",
        }
    }
}

impl fmt::Display for HandoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oauth-relay" => Ok(HandoffStrategy::OAuthRelay),
            "token-query" => Ok(HandoffStrategy::TokenQuery),
            "plain" => Ok(HandoffStrategy::Plain),
            other => Err(format!(
                "unknown handoff strategy '{other}' (expected oauth-relay, token-query or plain)"
            )),
        }
    }
}

/// One handoff attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffTarget {
    /// Where the user finally lands.
    pub destination_url: Url,
    /// What is actually opened; carries the token unless `strategy` is plain.
    pub target_url: Url,
    pub strategy: HandoffStrategy,
    pub context: BrowsingContext,
    /// Why a requested strategy degraded to `plain`.
    pub fallback: Option<HandoffError>,
}

impl HandoffTarget {
    pub fn is_authenticated(&self) -> bool {
        self.strategy != HandoffStrategy::Plain
    }

    /// Opens the target. Navigation errors go to the caller.
    ///
    /// # Errors
    /// Returns `NavigationError` when the browsing context cannot be opened.
    pub fn dispatch(&self, navigator: &dyn Navigator) -> Result<(), NavigationError> {
        tracing::info!(
            strategy = %self.strategy,
            destination = %self.destination_url,
            "handing off"
        );
        navigator.open(&self.target_url, self.context)
    }
}

/// Opaque `state` for the relay endpoint: base64 of the destination URL.
pub fn encode_state(destination: &Url) -> String {
    STANDARD.encode(destination.as_str())
}

/// Recovers the destination from a relay `state` value.
pub fn decode_state(state: &str) -> Option<Url> {
    let bytes = STANDARD.decode(state.trim()).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    Url::parse(&text).ok()
}

fn new_tab(
    destination_url: Url,
    target_url: Url,
    strategy: HandoffStrategy,
    fallback: Option<HandoffError>,
) -> HandoffTarget {
    HandoffTarget {
        destination_url,
        target_url,
        strategy,
        context: BrowsingContext::NewTab,
        fallback,
    }
}

fn plain(destination: Url, fallback: Option<HandoffError>) -> HandoffTarget {
    let target_url = destination.clone();
    new_tab(destination, target_url, HandoffStrategy::Plain, fallback)
}

#[derive(Debug, Clone)]
pub struct HandoffBuilder {
    relay_endpoint: Url,
    min_validity: u32,
}

impl HandoffBuilder {
    pub fn new(relay_endpoint: Url) -> Self {
        Self {
            relay_endpoint,
            min_validity: DEFAULT_MIN_VALIDITY_SECS,
        }
    }

    #[must_use]
    pub fn with_min_validity(mut self, secs: u32) -> Self {
        self.min_validity = secs;
        self
    }

    pub fn relay_endpoint(&self) -> &Url {
        &self.relay_endpoint
    }

    /// Builds the target for `strategy` from an already validated token.
    pub fn build(
        &self,
        destination: Url,
        strategy: HandoffStrategy,
        token: Option<&str>,
    ) -> HandoffTarget {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        match (strategy, token) {
            (HandoffStrategy::OAuthRelay, Some(token)) => {
                let mut target_url = self.relay_endpoint.clone();
                target_url
                    .query_pairs_mut()
                    .append_pair("access_token", token)
                    .append_pair("token_type", "Bearer")
                    .append_pair("state", &encode_state(&destination));
                new_tab(destination, target_url, strategy, None)
            }
            (HandoffStrategy::TokenQuery, Some(token)) => {
                let mut target_url = destination.clone();
                target_url.query_pairs_mut().append_pair("access_token", token);
                new_tab(destination, target_url, strategy, None)
            }
            (HandoffStrategy::Plain, _) => plain(destination, None),
            (_, None) => plain(destination, Some(HandoffError::NoToken)),
        }
    }

    /// Refreshes the token if needed, then builds the target.
    ///
    /// Refresh failures degrade to `plain`; they never block the handoff.
    pub async fn prepare(
        &self,
        client: &SessionClient,
        destination: Url,
        strategy: HandoffStrategy,
    ) -> HandoffTarget {
        if strategy == HandoffStrategy::Plain {
            return plain(destination, None);
        }

        match client.refresh_token(self.min_validity).await {
            Ok(refreshed) => {
                let token = client.access_token();
                tracing::debug!(
                    refreshed,
                    token = %token.as_deref().map(mask_token).unwrap_or_default(),
                    "handoff token ready"
                );
                self.build(destination, strategy, token.as_deref())
            }
            Err(RefreshError::NotAuthenticated) => {
                tracing::info!(%strategy, "no session; handing off unauthenticated");
                plain(destination, Some(HandoffError::NoToken))
            }
            Err(err) => {
                tracing::warn!(error = %err, %strategy, "refresh failed; handing off unauthenticated");
                plain(destination, Some(HandoffError::Refresh(err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> HandoffBuilder {
        HandoffBuilder::new(Url::parse("https://erp.example.com/auth_oauth/signin").unwrap())
    }

    fn destination() -> Url {
        Url::parse("https://erp.example.com/odoo/helpdesk?view=kanban").unwrap()
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn oauth_relay_state_decodes_to_destination() {
        let target = builder().build(destination(), HandoffStrategy::OAuthRelay, Some("tok"));
        assert_eq!(target.strategy, HandoffStrategy::OAuthRelay);
        assert_eq!(target.target_url.path(), "/auth_oauth/signin");
        assert_eq!(query(&target.target_url, "access_token").as_deref(), Some("tok"));
        assert_eq!(query(&target.target_url, "token_type").as_deref(), Some("Bearer"));

        let state = query(&target.target_url, "state").unwrap();
        assert_eq!(decode_state(&state), Some(destination()));
        assert_eq!(target.context, BrowsingContext::NewTab);
        assert!(target.is_authenticated());
    }

    #[test]
    fn token_query_keeps_existing_query() {
        let target = builder().build(destination(), HandoffStrategy::TokenQuery, Some("a b&c"));
        assert_eq!(query(&target.target_url, "view").as_deref(), Some("kanban"));
        assert_eq!(query(&target.target_url, "access_token").as_deref(), Some("a b&c"));
        assert_eq!(target.destination_url, destination());
    }

    #[test]
    fn missing_token_degrades_to_plain() {
        for strategy in [HandoffStrategy::OAuthRelay, HandoffStrategy::TokenQuery] {
            let target = builder().build(destination(), strategy, None);
            assert_eq!(target.strategy, HandoffStrategy::Plain);
            assert_eq!(target.target_url, destination());
            assert_eq!(target.fallback, Some(HandoffError::NoToken));
        }

        let target = builder().build(destination(), HandoffStrategy::TokenQuery, Some("  "));
        assert_eq!(target.strategy, HandoffStrategy::Plain);
    }

    #[test]
    fn plain_never_carries_the_token() {
        let target = builder().build(destination(), HandoffStrategy::Plain, Some("tok"));
        assert_eq!(target.target_url, destination());
        assert_eq!(target.fallback, None);
        assert!(!target.is_authenticated());
    }

    #[test]
    fn strategy_parses_from_cli_names() {
        assert_eq!("oauth-relay".parse(), Ok(HandoffStrategy::OAuthRelay));
        assert_eq!("Token-Query".parse(), Ok(HandoffStrategy::TokenQuery));
        assert_eq!("plain".parse(), Ok(HandoffStrategy::Plain));
        assert!("relay".parse::<HandoffStrategy>().is_err());
        assert_eq!(HandoffStrategy::OAuthRelay.to_string(), "oauth-relay");
    }

    #[test]
    fn decode_state_rejects_garbage() {
        assert_eq!(decode_state("%%%"), None);
        assert_eq!(decode_state(&STANDARD.encode("not a url")), None);
    }
}
