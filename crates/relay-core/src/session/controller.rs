//! Session controller: owns the display state.
//!
//! Wires the session client, the state machine and the handoff builder, and
//! turns every failure into a state the shell can render.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::client::{ClientPhase, LoginOptions, LogoutOptions, SessionClient};
use super::state::{SessionEvent, SessionMachine, SessionProfile, SessionState};
use crate::config::InitConfig;
use crate::error::{HandoffError, NavigationError};
use crate::handoff::{HandoffBuilder, HandoffStrategy, HandoffTarget};

pub struct SessionController {
    client: Arc<SessionClient>,
    machine: SessionMachine,
    handoff: HandoffBuilder,
    init_timeout: Option<Duration>,
}

impl SessionController {
    pub fn new(client: Arc<SessionClient>, handoff: HandoffBuilder) -> Self {
        Self {
            client,
            machine: SessionMachine::new(),
            handoff,
            init_timeout: None,
        }
    }

    /// Turns a `Loading` that outlives `timeout` into an error state.
    #[must_use]
    pub fn with_init_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn state(&self) -> &SessionState {
        self.machine.state()
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    pub fn client(&self) -> &Arc<SessionClient> {
        &self.client
    }

    fn profile(&self) -> Option<SessionProfile> {
        SessionProfile::from_session(&self.client.session())
    }

    fn resolved_profile(&self, authenticated: bool) -> Option<SessionProfile> {
        if authenticated { self.profile() } else { None }
    }

    /// Mounts the shell: reads a finished initialization, or runs it.
    ///
    /// The synchronous already-initialized check always happens before the
    /// awaited one, so a fast remount cannot race a slow first mount.
    pub async fn mount(&mut self, config: InitConfig) -> &SessionState {
        if !self.machine.apply(SessionEvent::Reinitialize)
            && self.machine.state() != &SessionState::Loading
        {
            self.machine = SessionMachine::new();
        }

        match self.client.phase() {
            ClientPhase::Ready(authenticated) => {
                let profile = self.resolved_profile(authenticated);
                self.machine.apply(SessionEvent::AlreadyInitialized(profile));
                return self.machine.state();
            }
            ClientPhase::Failed(err) => {
                self.machine.apply(SessionEvent::InitRejected(err.to_string()));
                return self.machine.state();
            }
            ClientPhase::Uninitialized | ClientPhase::Initializing => {}
        }

        let result = match self.init_timeout {
            Some(limit) => {
                if let Ok(result) = tokio::time::timeout(limit, self.client.initialize(config)).await
                {
                    result
                } else {
                    tracing::warn!(after = ?limit, "initialization still pending; giving up on it");
                    self.machine.apply(SessionEvent::InitTimedOut(limit));
                    return self.machine.state();
                }
            }
            None => self.client.initialize(config).await,
        };

        let event = match result {
            Ok(authenticated) => SessionEvent::InitResolved(self.resolved_profile(authenticated)),
            Err(err) => SessionEvent::InitRejected(err.to_string()),
        };
        self.machine.apply(event);
        self.machine.state()
    }

    /// Manual login. Clears a previous error before navigating.
    pub fn login(&mut self, options: &LoginOptions) -> &SessionState {
        if !self.machine.can_login() {
            tracing::debug!(state = self.machine.state().name(), "login not offered");
            return self.machine.state();
        }
        self.machine.apply(SessionEvent::LoginStarted);
        if let Err(err) = self.client.login(options) {
            tracing::warn!(error = %err, "login could not start");
            self.machine
                .apply(SessionEvent::LoginRejected(format!("login failed: {err}")));
        }
        self.machine.state()
    }

    /// Feeds the identity provider redirect back after a manual login.
    pub async fn complete_login(&mut self, callback_url: &Url) -> &SessionState {
        let event = match self.client.complete_login(callback_url).await {
            Ok(authenticated) => SessionEvent::LoginCompleted(self.resolved_profile(authenticated)),
            Err(err) => {
                tracing::warn!(error = %err, "login callback failed");
                SessionEvent::LoginRejected(format!("login failed: {err}"))
            }
        };
        self.machine.apply(event);
        self.machine.state()
    }

    /// Hands the session off to `destination` in a new browsing context.
    ///
    /// # Errors
    /// Returns `NavigationError` when the target could not be opened.
    pub async fn handoff(
        &mut self,
        destination: Url,
        strategy: HandoffStrategy,
    ) -> Result<HandoffTarget, NavigationError> {
        let target = self
            .handoff
            .prepare(&self.client, destination, strategy)
            .await;

        match &target.fallback {
            Some(HandoffError::Refresh(err)) if err.is_terminal() => {
                self.machine.apply(SessionEvent::SessionExpired);
            }
            Some(HandoffError::NoToken) => {
                // Session can be gone without this controller seeing it (logout elsewhere).
                if !self.client.is_authenticated() {
                    self.machine.apply(SessionEvent::SessionExpired);
                }
            }
            _ => {
                if let Some(profile) = self.profile() {
                    self.machine.apply(SessionEvent::ProfileRefreshed(profile));
                }
            }
        }

        target.dispatch(self.client.navigator().as_ref())?;
        Ok(target)
    }

    pub fn logout(&mut self, options: &LogoutOptions) -> &SessionState {
        self.client.logout(options);
        self.machine.apply(SessionEvent::LoggedOut);
        self.machine.state()
    }
}
