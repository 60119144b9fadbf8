//! Session display state.
//!
//! The machine is pure: events come from session client results, the
//! controller applies them, and the presentation shell renders `state()`.

use std::time::Duration;

use chrono::{DateTime, Local};

use super::Session;
use crate::oidc::Claims;

/// What the shell shows for a signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionProfile {
    /// `preferred_username`, or `sub` when the username is absent
    pub username: Option<String>,
    pub email: Option<String>,
    /// Token expiry in local time
    pub expires_at: Option<DateTime<Local>>,
    /// Realm roles granted to the user
    pub roles: Vec<String>,
}

impl SessionProfile {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            username: claims.display_name().map(str::to_string),
            email: claims.email().map(str::to_string),
            expires_at: claims.expires_at_local(),
            roles: claims
                .realm_roles()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Profile of an authenticated session, `None` otherwise.
    ///
    /// Opaque access tokens fall back to the id token claims.
    pub fn from_session(session: &Session) -> Option<Self> {
        if !session.authenticated() {
            return None;
        }
        Some(
            session
                .profile_claims()
                .map(Self::from_claims)
                .unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Authenticated(SessionProfile),
    Unauthenticated,
    Error { message: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Loading => "loading",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The client had finished initializing before mount; read its cached result.
    AlreadyInitialized(Option<SessionProfile>),
    /// `initialize` resolved; `Some` when authenticated.
    InitResolved(Option<SessionProfile>),
    InitRejected(String),
    /// `Loading` outlived the safety timeout.
    InitTimedOut(Duration),
    /// Manual login; the page is about to navigate to the identity provider.
    LoginStarted,
    /// Login could not start, or its callback failed.
    LoginRejected(String),
    /// Login callback processed; `None` when the user cancelled.
    LoginCompleted(Option<SessionProfile>),
    /// Token refreshed; the cached profile picks up the new expiry.
    ProfileRefreshed(SessionProfile),
    /// Refresh token rejected by the identity provider.
    SessionExpired,
    LoggedOut,
    Reinitialize,
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::AlreadyInitialized(_) => "already_initialized",
            SessionEvent::InitResolved(_) => "init_resolved",
            SessionEvent::InitRejected(_) => "init_rejected",
            SessionEvent::InitTimedOut(_) => "init_timed_out",
            SessionEvent::LoginStarted => "login_started",
            SessionEvent::LoginRejected(_) => "login_rejected",
            SessionEvent::LoginCompleted(_) => "login_completed",
            SessionEvent::ProfileRefreshed(_) => "profile_refreshed",
            SessionEvent::SessionExpired => "session_expired",
            SessionEvent::LoggedOut => "logged_out",
            SessionEvent::Reinitialize => "reinitialize",
        }
    }
}

fn resolved(profile: Option<SessionProfile>) -> SessionState {
    profile.map_or(SessionState::Unauthenticated, SessionState::Authenticated)
}

/// Session state machine. Starts in `Loading`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMachine {
    state: SessionState,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Loading,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Applies `event`; returns whether the state changed.
    ///
    /// Events that do not apply to the current state are ignored.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        use SessionEvent as E;
        use SessionState as S;

        let event_name = event.name();
        let next = match (&self.state, event) {
            (S::Loading, E::AlreadyInitialized(profile) | E::InitResolved(profile)) => {
                resolved(profile)
            }
            (S::Loading, E::InitRejected(message)) => S::Error { message },
            (S::Loading, E::InitTimedOut(after)) => S::Error {
                message: format!(
                    "identity provider did not answer within {}s; try logging in manually",
                    after.as_secs()
                ),
            },
            (S::Unauthenticated | S::Error { .. }, E::LoginStarted) => S::Loading,
            (_, E::LoginRejected(message)) => S::Error { message },
            (S::Loading | S::Unauthenticated | S::Error { .. }, E::LoginCompleted(profile)) => {
                resolved(profile)
            }
            (S::Authenticated(_), E::ProfileRefreshed(profile)) => S::Authenticated(profile),
            (S::Authenticated(_), E::SessionExpired) | (_, E::LoggedOut) => S::Unauthenticated,
            (S::Authenticated(_) | S::Unauthenticated, E::Reinitialize) => S::Loading,
            (state, _) => {
                tracing::debug!(state = state.name(), event = event_name, "event ignored");
                return false;
            }
        };

        if next == self.state {
            return false;
        }
        tracing::debug!(
            from = self.state.name(),
            to = next.name(),
            event = event_name,
            "session state changed"
        );
        self.state = next;
        true
    }

    /// Whether the shell should offer the manual login button.
    pub fn can_login(&self) -> bool {
        matches!(
            self.state,
            SessionState::Unauthenticated | SessionState::Error { .. }
        )
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            SessionState::Error { message } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> SessionProfile {
        SessionProfile {
            username: Some("alice".to_string()),
            email: None,
            expires_at: None,
            roles: Vec::new(),
        }
    }

    #[test]
    fn profile_carries_username_and_realm_roles() {
        let claims = Claims::from_map(
            serde_json::json!({
                "sub": "f3c2",
                "preferred_username": "alice",
                "realm_access": {"roles": ["portal-user"]},
            })
            .as_object()
            .cloned()
            .unwrap(),
        );

        let profile = SessionProfile::from_claims(&claims);

        assert_eq!(profile.username.as_deref(), Some("alice"));
        assert_eq!(profile.roles, vec!["portal-user".to_string()]);
        assert_eq!(profile.expires_at, None);
    }

    #[test]
    fn starts_loading() {
        let machine = SessionMachine::new();
        assert_eq!(machine.state(), &SessionState::Loading);
        assert!(!machine.can_login());
    }

    #[test]
    fn init_resolution_picks_rest_state() {
        let mut machine = SessionMachine::new();
        assert!(machine.apply(SessionEvent::InitResolved(Some(alice()))));
        assert_eq!(machine.state(), &SessionState::Authenticated(alice()));

        let mut machine = SessionMachine::new();
        assert!(machine.apply(SessionEvent::AlreadyInitialized(None)));
        assert_eq!(machine.state(), &SessionState::Unauthenticated);
        assert!(machine.can_login());
    }

    #[test]
    fn rejection_and_timeout_become_errors() {
        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::InitRejected("unreachable".to_string()));
        assert_eq!(machine.error_message(), Some("unreachable"));
        assert!(machine.can_login());

        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::InitTimedOut(Duration::from_secs(10)));
        assert!(machine.error_message().unwrap().contains("10s"));
    }

    #[test]
    fn late_init_result_is_ignored_after_timeout() {
        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::InitTimedOut(Duration::from_secs(1)));
        assert!(!machine.apply(SessionEvent::InitResolved(Some(alice()))));
        assert!(matches!(machine.state(), SessionState::Error { .. }));
    }

    #[test]
    fn manual_login_clears_error() {
        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::InitRejected("boom".to_string()));
        assert!(machine.apply(SessionEvent::LoginStarted));
        assert_eq!(machine.state(), &SessionState::Loading);
        assert_eq!(machine.error_message(), None);
    }

    #[test]
    fn login_rejection_applies_from_any_state() {
        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::InitResolved(Some(alice())));
        assert!(machine.apply(SessionEvent::LoginRejected("popup blocked".to_string())));
        assert_eq!(machine.error_message(), Some("popup blocked"));
    }

    #[test]
    fn login_started_is_ignored_while_authenticated() {
        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::InitResolved(Some(alice())));
        assert!(!machine.apply(SessionEvent::LoginStarted));
        assert!(!machine.can_login());
    }

    #[test]
    fn expiry_and_logout_end_the_session() {
        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::InitResolved(Some(alice())));
        assert!(machine.apply(SessionEvent::SessionExpired));
        assert_eq!(machine.state(), &SessionState::Unauthenticated);
        assert!(!machine.apply(SessionEvent::SessionExpired));

        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::InitRejected("x".to_string()));
        assert!(machine.apply(SessionEvent::LoggedOut));
        assert_eq!(machine.state(), &SessionState::Unauthenticated);
    }

    #[test]
    fn reinitialize_returns_to_loading_from_rest_states_only() {
        let mut machine = SessionMachine::new();
        assert!(!machine.apply(SessionEvent::Reinitialize));

        machine.apply(SessionEvent::InitResolved(None));
        assert!(machine.apply(SessionEvent::Reinitialize));
        assert_eq!(machine.state(), &SessionState::Loading);

        machine.apply(SessionEvent::InitRejected("x".to_string()));
        assert!(!machine.apply(SessionEvent::Reinitialize));
    }

    #[test]
    fn cancelled_login_completes_unauthenticated() {
        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::InitResolved(None));
        machine.apply(SessionEvent::LoginStarted);
        assert!(machine.apply(SessionEvent::LoginCompleted(None)));
        assert_eq!(machine.state(), &SessionState::Unauthenticated);
    }
}
