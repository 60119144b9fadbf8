//! Session client.
//!
//! Single point of truth for identity-provider interaction. One client per
//! process: construct it through [`SessionClientCell`] and share the `Arc`.

use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use url::Url;

use super::{Session, unix_now};
use crate::config::{Flow, InitConfig, OnLoad, ResponseMode};
use crate::error::{InitializationError, LoginError, ProviderError, RefreshError};
use crate::navigator::{BrowsingContext, Navigator};
use crate::oidc::{
    AuthorizationRequest, CallbackParams, Claims, CodeExchange, EndSessionRequest,
    IdentityProvider, Pkce, Prompt, SilentCheck, TokenSet, mask_token, parse_callback,
    strip_callback_params,
};

type InitOutcome = Result<bool, InitializationError>;

/// Initialization progress, readable without awaiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPhase {
    Uninitialized,
    Initializing,
    /// Handshake finished; `true` while a session is held.
    Ready(bool),
    Failed(InitializationError),
}

#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    /// Overrides `InitConfig::redirect_uri` for this login.
    pub redirect_uri: Option<Url>,
    /// Scopes requested in addition to the configured ones.
    pub scope: Vec<String>,
    pub prompt: Option<Prompt>,
    pub login_hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LogoutOptions {
    pub redirect_uri: Option<Url>,
}

/// Authorization request awaiting its callback.
#[derive(Debug, Clone)]
struct PendingLogin {
    state: String,
    nonce: String,
    redirect_uri: Url,
    code_verifier: Option<String>,
    flow: Flow,
    response_mode: ResponseMode,
}

struct ClientInner {
    provider: Arc<dyn IdentityProvider>,
    navigator: Arc<dyn Navigator>,
    config: OnceLock<InitConfig>,
    init: OnceLock<watch::Receiver<Option<InitOutcome>>>,
    session: RwLock<Session>,
    pending: Mutex<Option<PendingLogin>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

pub struct SessionClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("phase", &self.phase())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    pub fn new(provider: Arc<dyn IdentityProvider>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                provider,
                navigator,
                config: OnceLock::new(),
                init: OnceLock::new(),
                session: RwLock::new(Session::default()),
                pending: Mutex::new(None),
                refresh_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Runs the session handshake, at most once per client.
    ///
    /// The first call captures `config` and spawns the handshake. Concurrent
    /// and later calls wait for the same handshake; their `config` is ignored.
    /// Once it succeeded, the result is whether a session is held now, so a
    /// later login or logout is reflected. Dropping the returned future does
    /// not cancel the handshake.
    ///
    /// # Errors
    /// Returns `InitializationError` when the handshake failed. A failed
    /// outcome is replayed to later callers as well.
    pub async fn initialize(&self, config: InitConfig) -> Result<bool, InitializationError> {
        if let Some(existing) = self.inner.config.get()
            && existing != &config
        {
            tracing::debug!("session client already initialized; new init config ignored");
        }

        let mut rx = self
            .inner
            .init
            .get_or_init(|| {
                let _ = self.inner.config.set(config.clone());
                let (tx, rx) = watch::channel(None);
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let outcome = inner.handshake(&config).await;
                    match &outcome {
                        Ok(authenticated) => {
                            tracing::info!(authenticated, "session client initialized");
                        }
                        Err(err) => tracing::warn!(error = %err, "session client initialization failed"),
                    }
                    tx.send_replace(Some(outcome));
                });
                rx
            })
            .clone();

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome
            .unwrap_or(Err(InitializationError::Aborted))
            .map(|_handshake| self.is_authenticated())
    }

    pub fn phase(&self) -> ClientPhase {
        let Some(rx) = self.inner.init.get() else {
            return ClientPhase::Uninitialized;
        };
        match &*rx.borrow() {
            None if rx.has_changed().is_err() => ClientPhase::Failed(InitializationError::Aborted),
            None => ClientPhase::Initializing,
            Some(Ok(_handshake)) => ClientPhase::Ready(self.is_authenticated()),
            Some(Err(err)) => ClientPhase::Failed(err.clone()),
        }
    }

    /// Init config captured by the first `initialize`.
    pub fn config(&self) -> Option<&InitConfig> {
        self.inner.config.get()
    }

    /// Starts the interactive login by navigating the current context.
    ///
    /// Completes when navigation has started; the result arrives through
    /// [`SessionClient::complete_login`].
    ///
    /// # Errors
    /// Returns `LoginError::Navigation` when the browser could not be opened.
    pub fn login(&self, options: &LoginOptions) -> Result<(), LoginError> {
        self.inner.start_login(options)
    }

    /// Processes the identity provider redirect for a pending login.
    ///
    /// Cancelled or declined logins resolve to `Ok(false)`.
    ///
    /// # Errors
    /// Returns `LoginError` on state or nonce mismatch, or a failed exchange.
    pub async fn complete_login(&self, callback_url: &Url) -> Result<bool, LoginError> {
        self.inner.finish_login(callback_url).await
    }

    /// Refreshes the access token if it expires within `min_validity` seconds.
    ///
    /// Returns `Ok(false)` when the token is still valid long enough.
    ///
    /// # Errors
    /// `RefreshError::Rejected` clears the session; other errors keep it.
    pub async fn refresh_token(&self, min_validity: u32) -> Result<bool, RefreshError> {
        self.inner.refresh(min_validity).await
    }

    /// Clears the session and sends the browser to the end-session endpoint.
    ///
    /// Fire-and-forget: navigation problems are logged, not returned.
    pub fn logout(&self, options: &LogoutOptions) {
        self.inner.logout(options);
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read_session().authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.read_session().access_token().map(str::to_string)
    }

    pub fn claims(&self) -> Option<Claims> {
        self.inner.read_session().claims().cloned()
    }

    /// Snapshot of the held session.
    pub fn session(&self) -> Session {
        self.inner.read_session().clone()
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.inner.navigator
    }
}

impl ClientInner {
    fn read_session(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_pending(&self, pending: Option<PendingLogin>) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = pending;
    }

    fn take_pending(&self) -> Option<PendingLogin> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn pending_mode(&self) -> Option<ResponseMode> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|p| p.response_mode)
    }

    fn init_config(&self) -> InitConfig {
        self.config.get().cloned().unwrap_or_default()
    }

    /// Configured redirect URI, else the current location without callback params.
    fn redirect_uri(&self, config: &InitConfig, requested: Option<&Url>) -> Option<Url> {
        requested
            .or(config.redirect_uri.as_ref())
            .cloned()
            .or_else(|| {
                self.navigator
                    .current_url()
                    .map(|url| strip_callback_params(&url))
            })
    }

    fn authorization_request(
        config: &InitConfig,
        redirect_uri: Url,
        extra_scope: &[String],
        prompt: Option<Prompt>,
        login_hint: Option<String>,
    ) -> AuthorizationRequest {
        AuthorizationRequest {
            redirect_uri,
            state: uuid::Uuid::new_v4().to_string(),
            nonce: uuid::Uuid::new_v4().to_string(),
            flow: config.flow,
            response_mode: config.response_mode,
            scope: config.effective_scope(extra_scope),
            pkce: config
                .pkce_method
                .filter(|_| config.flow.uses_code())
                .map(Pkce::generate),
            prompt,
            login_hint,
        }
    }

    async fn handshake(&self, config: &InitConfig) -> InitOutcome {
        config.validate()?;
        if config.use_login_iframe && !self.navigator.supports_login_iframe() {
            return Err(InitializationError::IframeUnavailable);
        }

        if let Some(current) = self.navigator.current_url() {
            let is_callback = self
                .pending_mode()
                .and_then(|mode| parse_callback(&current, mode))
                .is_some();
            if is_callback {
                tracing::debug!("processing login callback from current location");
                return self
                    .finish_login(&current)
                    .await
                    .map_err(|e| InitializationError::Callback(e.to_string()));
            }
        }

        match config.on_load {
            OnLoad::CheckSso => self.check_sso(config).await,
            OnLoad::LoginRequired => {
                self.start_login(&LoginOptions::default())
                    .map_err(|e| match e {
                        LoginError::Navigation(nav) => InitializationError::Navigation(nav),
                        other => InitializationError::Config(other.to_string()),
                    })?;
                Ok(false)
            }
        }
    }

    async fn check_sso(&self, config: &InitConfig) -> InitOutcome {
        let redirect_uri = self.redirect_uri(config, None).ok_or_else(|| {
            InitializationError::Config(LoginError::MissingRedirectUri.to_string())
        })?;
        let request =
            Self::authorization_request(config, redirect_uri, &[], Some(Prompt::None), None);

        match self.provider.check_session(&request).await? {
            SilentCheck::NoSession => {
                tracing::info!("no identity provider session");
                Ok(false)
            }
            SilentCheck::Session(tokens) => {
                verify_nonce(&tokens, &request.nonce)
                    .map_err(|e| InitializationError::Callback(e.to_string()))?;
                self.store_tokens(tokens);
                Ok(true)
            }
        }
    }

    fn start_login(&self, options: &LoginOptions) -> Result<(), LoginError> {
        let config = self.init_config();
        let redirect_uri = self
            .redirect_uri(&config, options.redirect_uri.as_ref())
            .ok_or(LoginError::MissingRedirectUri)?;
        let request = Self::authorization_request(
            &config,
            redirect_uri,
            &options.scope,
            options.prompt,
            options.login_hint.clone(),
        );
        let url = self.provider.authorization_url(&request)?;

        self.set_pending(Some(PendingLogin {
            state: request.state.clone(),
            nonce: request.nonce.clone(),
            redirect_uri: request.redirect_uri.clone(),
            code_verifier: request.pkce.as_ref().map(|p| p.verifier.clone()),
            flow: request.flow,
            response_mode: request.response_mode,
        }));

        tracing::info!(redirect_uri = %request.redirect_uri, "starting login");
        if let Err(err) = self.navigator.open(&url, BrowsingContext::Current) {
            self.set_pending(None);
            return Err(err.into());
        }
        Ok(())
    }

    async fn finish_login(&self, callback_url: &Url) -> Result<bool, LoginError> {
        let pending = self.take_pending().ok_or(LoginError::NoPendingLogin)?;
        let params = parse_callback(callback_url, pending.response_mode).ok_or_else(|| {
            LoginError::MalformedCallback("no authorization response parameters".to_string())
        })?;
        if params.state.as_deref() != Some(pending.state.as_str()) {
            return Err(LoginError::StateMismatch);
        }

        if let Some(error) = params.error.as_deref() {
            if params.is_no_session() {
                tracing::info!(error, "login ended without a session");
                return Ok(false);
            }
            return Err(ProviderError::Rejected {
                status: None,
                code: error.to_string(),
                message: params.error_description.clone().unwrap_or_default(),
            }
            .into());
        }

        let tokens = self.callback_tokens(params, &pending).await?;
        verify_nonce(&tokens, &pending.nonce)?;
        self.store_tokens(tokens);
        Ok(true)
    }

    async fn callback_tokens(
        &self,
        params: CallbackParams,
        pending: &PendingLogin,
    ) -> Result<TokenSet, LoginError> {
        if pending.flow.uses_code() {
            let code = params.code.ok_or_else(|| {
                LoginError::MalformedCallback("callback carries no code".to_string())
            })?;
            let exchange = CodeExchange {
                code,
                redirect_uri: pending.redirect_uri.clone(),
                code_verifier: pending.code_verifier.clone(),
            };
            return Ok(self.provider.exchange_code(&exchange).await?);
        }

        let access_token = params.access_token.ok_or_else(|| {
            LoginError::MalformedCallback("callback carries no access_token".to_string())
        })?;
        Ok(TokenSet {
            access_token,
            refresh_token: None,
            id_token: params.id_token,
            expires_in: params.expires_in,
            token_type: params.token_type,
        })
    }

    fn store_tokens(&self, tokens: TokenSet) {
        tracing::debug!(token = %mask_token(&tokens.access_token), "session stored");
        *self.write_session() = Session::from_tokens(tokens, unix_now());
    }

    async fn refresh(&self, min_validity: u32) -> Result<bool, RefreshError> {
        {
            let session = self.read_session();
            if !session.authenticated() {
                return Err(RefreshError::NotAuthenticated);
            }
            if !session.is_token_expired(min_validity, unix_now()) {
                return Ok(false);
            }
        }

        // One refresh at a time; waiters re-check against the fresh token.
        let _guard = self.refresh_lock.lock().await;
        let refresh_token = {
            let session = self.read_session();
            if !session.authenticated() {
                return Err(RefreshError::NotAuthenticated);
            }
            if !session.is_token_expired(min_validity, unix_now()) {
                return Ok(false);
            }
            session
                .refresh_token()
                .map(str::to_string)
                .ok_or(RefreshError::NoRefreshToken)?
        };

        match self.provider.refresh(&refresh_token).await {
            Ok(tokens) => {
                let mut session = self.write_session();
                if !session.authenticated() {
                    // Logged out while the request was in flight.
                    return Err(RefreshError::NotAuthenticated);
                }
                session.apply_refresh(tokens, unix_now());
                tracing::info!(
                    valid_for = session.remaining_validity(unix_now()),
                    "access token refreshed"
                );
                Ok(true)
            }
            Err(err) => {
                let err = RefreshError::from(err);
                if err.is_terminal() {
                    tracing::warn!(error = %err, "refresh token rejected; session cleared");
                    self.write_session().clear();
                } else {
                    tracing::warn!(error = %err, "token refresh failed");
                }
                Err(err)
            }
        }
    }

    fn logout(&self, options: &LogoutOptions) {
        let id_token_hint = {
            let mut session = self.write_session();
            let hint = session.id_token().map(str::to_string);
            session.clear();
            hint
        };
        self.set_pending(None);

        let config = self.init_config();
        let Some(redirect_uri) = self.redirect_uri(&config, options.redirect_uri.as_ref()) else {
            tracing::warn!("logout: no redirect URI; local session cleared only");
            return;
        };
        let request = EndSessionRequest {
            redirect_uri,
            id_token_hint,
        };
        match self.provider.end_session_url(&request) {
            Ok(url) => {
                if let Err(err) = self.navigator.open(&url, BrowsingContext::Current) {
                    tracing::warn!(error = %err, "logout navigation failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "logout URL could not be built"),
        }
    }
}

/// Checks the id token nonce; responses without an id token pass.
fn verify_nonce(tokens: &TokenSet, expected: &str) -> Result<(), LoginError> {
    let Some(id_token) = tokens.id_token.as_deref() else {
        return Ok(());
    };
    let claims = Claims::decode(id_token).map_err(|_err| LoginError::InvalidNonce)?;
    if claims.nonce() == Some(expected) {
        Ok(())
    } else {
        Err(LoginError::InvalidNonce)
    }
}

/// Process-wide home of the session client.
///
/// The first successful `get_or_try_init` constructs the client; later calls
/// return it without running their constructor.
#[derive(Debug, Default)]
pub struct SessionClientCell {
    cell: OnceLock<Arc<SessionClient>>,
}

impl SessionClientCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// # Errors
    /// Returns the constructor's error; the cell stays empty.
    pub fn get_or_try_init<E>(
        &self,
        build: impl FnOnce() -> Result<SessionClient, E>,
    ) -> Result<Arc<SessionClient>, E> {
        if let Some(client) = self.cell.get() {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(build()?);
        // Lost a race: keep the instance that is already published.
        match self.cell.set(Arc::clone(&client)) {
            Ok(()) => Ok(client),
            Err(_) => Ok(self.cell.get().map_or(client, Arc::clone)),
        }
    }
}
