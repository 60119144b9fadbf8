//! Identity provider transport.
//!
//! `IdentityProvider` is the seam between the session client and the
//! provider: the HTTP implementation lives in `http`, tests inject doubles.

pub mod callback;
pub mod claims;
pub mod http;
pub mod pkce;

use std::future::Future;
use std::pin::Pin;

use url::Url;

use crate::config::{Flow, ResponseMode};
use crate::error::ProviderError;

pub use callback::{CallbackParams, parse_callback, strip_callback_params};
pub use claims::{Claims, mask_token};
pub use http::{OidcClient, ProviderEndpoints};
pub use pkce::Pkce;

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Tokens returned by a code exchange, refresh, or implicit callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    /// Lifetime in seconds as reported by the provider
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
}

impl TokenSet {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            id_token: None,
            expires_in: None,
            token_type: Some("Bearer".to_string()),
        }
    }
}

/// `prompt` values understood by OIDC providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Silent check; fail with `login_required` instead of showing a form.
    None,
    Login,
    Consent,
}

impl Prompt {
    pub fn as_str(self) -> &'static str {
        match self {
            Prompt::None => "none",
            Prompt::Login => "login",
            Prompt::Consent => "consent",
        }
    }
}

/// One authorization request, interactive or silent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub redirect_uri: Url,
    pub state: String,
    pub nonce: String,
    pub flow: Flow,
    pub response_mode: ResponseMode,
    pub scope: Vec<String>,
    pub pkce: Option<Pkce>,
    pub prompt: Option<Prompt>,
    pub login_hint: Option<String>,
}

/// Code-for-token exchange at the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeExchange {
    pub code: String,
    pub redirect_uri: Url,
    pub code_verifier: Option<String>,
}

/// RP-initiated logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndSessionRequest {
    pub redirect_uri: Url,
    pub id_token_hint: Option<String>,
}

/// Result of a silent (`prompt=none`) session check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SilentCheck {
    /// The provider already holds a session for this user.
    Session(TokenSet),
    NoSession,
}

/// Identity provider operations used by the session client.
///
/// The trait is object-safe so the client can hold `Arc<dyn IdentityProvider>`.
pub trait IdentityProvider: Send + Sync {
    /// Builds the URL the browser is sent to for login.
    ///
    /// # Errors
    /// Returns `ProviderError::Config` if the endpoint cannot be built.
    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<Url, ProviderError>;

    /// Builds the URL that ends the provider session.
    ///
    /// # Errors
    /// Returns `ProviderError::Config` if the endpoint cannot be built.
    fn end_session_url(&self, request: &EndSessionRequest) -> Result<Url, ProviderError>;

    /// Asks whether a session exists without user interaction.
    fn check_session<'a>(&'a self, request: &'a AuthorizationRequest)
    -> ProviderFuture<'a, SilentCheck>;

    fn exchange_code<'a>(&'a self, exchange: &'a CodeExchange) -> ProviderFuture<'a, TokenSet>;

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> ProviderFuture<'a, TokenSet>;
}
