//! Session wiring shared by the session commands.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use relay_core::config::{Config, InitConfig, ResponseMode};
use relay_core::handoff::{HandoffBuilder, HandoffStrategy, HandoffTarget};
use relay_core::oidc::OidcClient;
use relay_core::session::{
    LoginOptions, LogoutOptions, SessionClient, SessionClientCell, SessionController,
    SessionProfile, SessionState,
};
use url::Url;

use super::browser::BrowserNavigator;
use super::callback::{CALLBACK_TIMEOUT, CallbackListener};

/// Used when `init.redirect_uri` is not configured.
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8765/callback";

static CLIENT: SessionClientCell = SessionClientCell::new();

/// Controller plus the handshake options for this process.
pub struct Shell {
    controller: SessionController,
    init: InitConfig,
}

impl Shell {
    pub fn new(config: &Config, browser: BrowserNavigator) -> Result<Self> {
        let init = init_config(config)?;
        let client = CLIENT.get_or_try_init(|| -> Result<SessionClient> {
            let provider = OidcClient::from_config(config)?;
            Ok(SessionClient::new(
                Arc::new(provider),
                Arc::new(browser),
            ))
        })?;
        let handoff = HandoffBuilder::new(config.downstream.relay_endpoint()?)
            .with_min_validity(config.session.handoff_min_validity_secs);
        let controller =
            SessionController::new(client, handoff).with_init_timeout(config.session.init_timeout());
        Ok(Self { controller, init })
    }

    pub async fn mount(&mut self) -> &SessionState {
        self.controller.mount(self.init.clone()).await
    }

    pub fn state(&self) -> &SessionState {
        self.controller.state()
    }

    /// Interactive login: opens the browser, then waits on the loopback redirect.
    pub async fn sign_in(&mut self, options: &LoginOptions) -> Result<&SessionState> {
        let redirect_uri = options
            .redirect_uri
            .as_ref()
            .or(self.init.redirect_uri.as_ref())
            .context("no redirect_uri for the login callback")?;
        let listener = CallbackListener::bind(redirect_uri).await?;
        tracing::debug!(addr = %listener.local_addr()?, "callback listener ready");

        if self.controller.login(options) != &SessionState::Loading {
            return Ok(self.controller.state());
        }
        println!("Waiting for the browser to finish signing in...");
        let callback = listener.wait(CALLBACK_TIMEOUT).await?;
        Ok(self.controller.complete_login(&callback).await)
    }

    pub async fn open(
        &mut self,
        destination: Url,
        strategy: HandoffStrategy,
    ) -> Result<HandoffTarget> {
        self.controller
            .handoff(destination, strategy)
            .await
            .context("open the downstream application")
    }

    pub fn logout(&mut self, options: &LogoutOptions) -> &SessionState {
        self.controller.logout(options)
    }
}

/// Loopback redirect by default; fragment responses never reach a listener.
fn init_config(config: &Config) -> Result<InitConfig> {
    let mut init = config.init.clone();
    if init.response_mode == ResponseMode::Fragment {
        bail!(
            "init.response_mode = \"fragment\" cannot be received on the loopback listener; use \"query\""
        );
    }
    if init.redirect_uri.is_none() {
        init.redirect_uri = Some(Url::parse(DEFAULT_REDIRECT_URI)?);
    }
    Ok(init)
}

/// Prints a resting state. Error states become the command's error.
pub fn print_state(state: &SessionState) -> Result<()> {
    match state {
        SessionState::Authenticated(profile) => {
            print_profile(profile);
            Ok(())
        }
        SessionState::Unauthenticated => {
            println!("Not signed in.");
            Ok(())
        }
        SessionState::Loading => {
            println!("Still waiting for the identity provider.");
            Ok(())
        }
        SessionState::Error { message } => bail!("{message}"),
    }
}

fn print_profile(profile: &SessionProfile) {
    let user = profile.username.as_deref().unwrap_or("unknown user");
    match profile.email.as_deref() {
        Some(email) => println!("Signed in as {user} <{email}>"),
        None => println!("Signed in as {user}"),
    }
    if let Some(expires_at) = profile.expires_at {
        println!("Token expires {}", expires_at.format("%Y-%m-%d %H:%M:%S %:z"));
    }
    if !profile.roles.is_empty() {
        println!("Roles: {}", profile.roles.join(", "));
    }
}
