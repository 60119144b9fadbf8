//! Error taxonomy for identity-provider interaction and handoff.
//!
//! Every error is `Clone` so that a finished initialization outcome can be
//! replayed to later callers without re-running the handshake.

/// Failure talking to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The request never produced a usable response (DNS, TLS, reset, 5xx).
    #[error("identity provider request failed: {0}")]
    Transport(String),
    /// The provider answered with an OAuth error (`invalid_grant`, ...).
    #[error("identity provider rejected the request ({code}): {message}")]
    Rejected {
        status: Option<u16>,
        code: String,
        message: String,
    },
    /// The provider answered, but not with something we can parse.
    #[error("invalid identity provider response: {0}")]
    InvalidResponse(String),
    /// Endpoint configuration cannot produce a valid URL.
    #[error("invalid identity provider configuration: {0}")]
    Config(String),
}

/// The browser (or its stand-in) could not open a URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not navigate to {url}: {reason}")]
pub struct NavigationError {
    pub url: String,
    pub reason: String,
}

impl NavigationError {
    pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitializationError {
    #[error("invalid init configuration: {0}")]
    Config(String),
    #[error("login iframe requested but the browsing context cannot host one")]
    IframeUnavailable,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("login callback could not be processed: {0}")]
    Callback(String),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error("initialization ended without reporting a result")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("no login is pending for this callback")]
    NoPendingLogin,
    #[error("callback state does not match the pending login")]
    StateMismatch,
    #[error("id token nonce does not match the pending login")]
    InvalidNonce,
    #[error("malformed login callback: {0}")]
    MalformedCallback(String),
    #[error("no redirect URI configured and no current location to return to")]
    MissingRedirectUri,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no authenticated session to refresh")]
    NotAuthenticated,
    #[error("session has no refresh token")]
    NoRefreshToken,
    /// Refresh token expired or revoked. The session is gone.
    #[error("refresh token rejected: {0}")]
    Rejected(String),
    #[error("token refresh failed: {0}")]
    Transport(String),
}

impl RefreshError {
    /// Whether the failure ended the session (forces Unauthenticated).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefreshError::Rejected(_))
    }
}

impl From<ProviderError> for RefreshError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected { code, message, .. } => {
                RefreshError::Rejected(format!("{code}: {message}"))
            }
            other => RefreshError::Transport(other.to_string()),
        }
    }
}

/// Why a handoff degraded to plain navigation. Never blocks the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    #[error("token refresh before handoff failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("no valid access token at handoff time")]
    NoToken,
}
