//! Login and logout command handlers.

use anyhow::Result;
use relay_core::config::Config;
use relay_core::oidc::Prompt;
use relay_core::session::{LoginOptions, LogoutOptions, SessionState};

use crate::cli::browser::BrowserNavigator;
use crate::cli::shell::{self, Shell};

pub struct LoginArgs {
    pub login_hint: Option<String>,
    pub force: bool,
    pub scope: Vec<String>,
}

pub async fn login(config: &Config, browser: BrowserNavigator, args: LoginArgs) -> Result<()> {
    let mut shell = Shell::new(config, browser)?;
    let mounted = shell.mount().await;
    if !args.force && matches!(mounted, SessionState::Authenticated(_)) {
        println!("Already signed in.");
        return shell::print_state(mounted);
    }

    let options = LoginOptions {
        scope: args.scope,
        prompt: args.force.then_some(Prompt::Login),
        login_hint: args.login_hint,
        ..Default::default()
    };
    println!("Signing in at the identity provider...");
    let state = shell.sign_in(&options).await?;
    shell::print_state(state)
}

/// Clears the local session and ends the browser session at the provider.
///
/// The browser lands on the downstream destination afterwards.
pub async fn logout(config: &Config, browser: BrowserNavigator) -> Result<()> {
    let mut shell = Shell::new(config, browser)?;
    shell.mount().await;
    let options = LogoutOptions {
        redirect_uri: config.downstream.destination().ok(),
    };
    shell.logout(&options);
    println!("Signed out.");
    Ok(())
}
