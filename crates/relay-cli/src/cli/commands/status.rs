//! Status command: silent session check against the identity provider.

use anyhow::Result;
use relay_core::config::Config;

use crate::cli::browser::BrowserNavigator;
use crate::cli::shell::{self, Shell};

pub async fn run(config: &Config, browser: BrowserNavigator) -> Result<()> {
    let mut shell = Shell::new(config, browser)?;
    let state = shell.mount().await;
    tracing::debug!(state = state.name(), "status");
    shell::print_state(state)
}
