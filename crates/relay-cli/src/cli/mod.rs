//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::config::Config;
use relay_core::handoff::HandoffStrategy;
use relay_core::logging::{self, LogOptions};
use url::Url;

use self::browser::BrowserNavigator;

mod browser;
mod callback;
mod commands;
mod shell;

#[derive(Parser)]
#[command(name = "relay")]
#[command(version = "0.1")]
#[command(about = "Sign in once at the identity provider and carry the session to a downstream app")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging for relay crates (RELAY_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to stderr only, skip $RELAY_HOME/logs
    #[arg(long = "no-log-file", global = true)]
    no_log_file: bool,

    /// Print URLs instead of opening the browser
    #[arg(long = "no-browser", global = true, env = "RELAY_NO_BROWSER")]
    no_browser: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Check whether the identity provider already has a session
    Status,

    /// Sign in through the browser
    Login {
        /// Pre-fill the username on the login page
        #[arg(long, value_name = "USER")]
        login_hint: Option<String>,

        /// Show the login page even when the provider has a session
        #[arg(long)]
        force: bool,

        /// Extra scopes to request, besides the configured ones
        #[arg(long = "scope", value_name = "SCOPE")]
        scope: Vec<String>,
    },

    /// Open a downstream page, carrying the session when there is one
    Open {
        /// How the session is handed over: oauth-relay, token-query or plain
        #[arg(short, long, default_value_t = HandoffStrategy::OAuthRelay)]
        strategy: HandoffStrategy,

        /// Sign in through the browser first when there is no session
        #[arg(long)]
        login: bool,

        /// Page to open (default: downstream.destination_path)
        #[arg(value_name = "DESTINATION")]
        destination: Option<Url>,
    },

    /// End the session at the identity provider
    Logout,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_options = if cli.no_log_file {
        LogOptions {
            verbose: cli.verbose,
            file_dir: None,
        }
    } else {
        LogOptions::with_default_file(cli.verbose)
    };
    let _log_guard = logging::init(&log_options)?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    let browser = BrowserNavigator::new(cli.no_browser);
    rt.block_on(async move { dispatch(cli.command, browser).await })
}

async fn dispatch(command: Commands, browser: BrowserNavigator) -> Result<()> {
    match command {
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },

        Commands::Status => commands::status::run(&load_config()?, browser).await,

        Commands::Login {
            login_hint,
            force,
            scope,
        } => {
            let args = commands::auth::LoginArgs {
                login_hint,
                force,
                scope,
            };
            commands::auth::login(&load_config()?, browser, args).await
        }

        Commands::Open {
            strategy,
            login,
            destination,
        } => {
            let args = commands::open::OpenArgs {
                strategy,
                login,
                destination,
            };
            commands::open::run(&load_config()?, browser, args).await
        }

        Commands::Logout => commands::auth::logout(&load_config()?, browser).await,
    }
}

fn load_config() -> Result<Config> {
    Config::load().context("load config")
}
