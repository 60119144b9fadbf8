//! Open command: hand the session off to a downstream page.

use anyhow::Result;
use relay_core::config::Config;
use relay_core::handoff::HandoffStrategy;
use relay_core::session::{LoginOptions, SessionState};
use url::Url;

use crate::cli::browser::BrowserNavigator;
use crate::cli::shell::{self, Shell};

pub struct OpenArgs {
    pub strategy: HandoffStrategy,
    pub login: bool,
    pub destination: Option<Url>,
}

pub async fn run(config: &Config, browser: BrowserNavigator, args: OpenArgs) -> Result<()> {
    let destination = match args.destination {
        Some(destination) => destination,
        None => config.downstream.destination()?,
    };

    let mut shell = Shell::new(config, browser)?;
    let mounted = shell.mount().await;
    if let SessionState::Error { message } = mounted {
        // The page still opens, just without a session.
        tracing::warn!(%message, "session check failed");
    }

    let wants_session = args.strategy != HandoffStrategy::Plain;
    if args.login && wants_session && !matches!(shell.state(), SessionState::Authenticated(_)) {
        let state = shell.sign_in(&LoginOptions::default()).await?;
        shell::print_state(state)?;
    }

    let target = shell.open(destination, args.strategy).await?;
    match &target.fallback {
        None => println!("Opened {} ({})", target.destination_url, target.strategy),
        Some(reason) => println!(
            "Opened {} without a session ({reason})",
            target.destination_url
        ),
    }
    Ok(())
}
