//! Configuration management for relay.
//!
//! Loads configuration from ${RELAY_HOME}/config.toml with sensible defaults,
//! then applies `RELAY_*` environment overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::InitializationError;

/// What `initialize` does when the page carries no login callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OnLoad {
    /// Ask the identity provider silently whether a session exists.
    #[default]
    CheckSso,
    /// Start the interactive login right away.
    LoginRequired,
}

/// OAuth flow used for the authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// Authorization code flow
    #[default]
    Standard,
    /// Tokens returned directly in the redirect
    Implicit,
    /// Code plus tokens in the redirect
    Hybrid,
}

impl Flow {
    /// The `response_type` parameter sent to the authorization endpoint.
    pub fn response_type(self) -> &'static str {
        match self {
            Flow::Standard => "code",
            Flow::Implicit => "id_token token",
            Flow::Hybrid => "code id_token token",
        }
    }

    /// Whether the redirect carries an authorization code to exchange.
    pub fn uses_code(self) -> bool {
        !matches!(self, Flow::Implicit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    S256,
}

impl PkceMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PkceMethod::S256 => "S256",
        }
    }
}

/// Where the identity provider puts callback parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Query,
    Fragment,
}

impl ResponseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseMode::Query => "query",
            ResponseMode::Fragment => "fragment",
        }
    }
}

/// Options for the session handshake. Captured by the first `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    pub on_load: OnLoad,
    /// Session-status frame; unavailable outside a browser page.
    pub use_login_iframe: bool,
    pub flow: Flow,
    pub pkce_method: Option<PkceMethod>,
    pub response_mode: ResponseMode,
    /// Where the identity provider returns. Falls back to the current location.
    pub redirect_uri: Option<Url>,
    pub scope: Vec<String>,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            on_load: OnLoad::CheckSso,
            use_login_iframe: false,
            flow: Flow::Standard,
            pkce_method: Some(PkceMethod::S256),
            response_mode: ResponseMode::Query,
            redirect_uri: None,
            scope: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
        }
    }
}

impl InitConfig {
    /// Checks option combinations the identity provider would refuse.
    ///
    /// # Errors
    /// Returns `InitializationError::Config` for unsupported combinations.
    pub fn validate(&self) -> Result<(), InitializationError> {
        if !matches!(self.flow, Flow::Standard) && self.response_mode == ResponseMode::Query {
            return Err(InitializationError::Config(format!(
                "{} flow delivers tokens in the fragment; response_mode must be \"fragment\"",
                self.flow.response_type()
            )));
        }
        if self.scope.iter().any(|s| s.trim().is_empty() || s.contains(' ')) {
            return Err(InitializationError::Config(
                "scope entries must be single non-empty words".to_string(),
            ));
        }
        Ok(())
    }

    /// Scope list with `openid` first, as OIDC requires.
    pub fn effective_scope(&self, extra: &[String]) -> Vec<String> {
        let mut scope = vec!["openid".to_string()];
        for s in self.scope.iter().chain(extra) {
            if !scope.contains(s) {
                scope.push(s.clone());
            }
        }
        scope
    }
}

/// Identity provider location and public client identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub url: Option<Url>,
    pub realm: String,
    pub client_id: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: None,
            realm: "master".to_string(),
            client_id: "relay".to_string(),
        }
    }
}

/// Downstream application receiving the handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    pub base_url: Option<Url>,
    pub relay_path: String,
    pub destination_path: String,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            relay_path: "/auth_oauth/signin".to_string(),
            destination_path: "/".to_string(),
        }
    }
}

impl DownstreamConfig {
    fn base(&self) -> Result<&Url> {
        self.base_url
            .as_ref()
            .context("downstream.base_url is not configured (set RELAY_DOWNSTREAM_URL)")
    }

    /// The downstream OAuth sign-in endpoint.
    pub fn relay_endpoint(&self) -> Result<Url> {
        let base = self.base()?;
        base.join(&self.relay_path)
            .with_context(|| format!("invalid downstream.relay_path '{}'", self.relay_path))
    }

    /// The protected page opened by default.
    pub fn destination(&self) -> Result<Url> {
        let base = self.base()?;
        base.join(&self.destination_path).with_context(|| {
            format!(
                "invalid downstream.destination_path '{}'",
                self.destination_path
            )
        })
    }
}

/// Timing knobs for the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds before a stuck Loading state turns into an error (0 disables)
    pub init_timeout_secs: u64,
    pub handoff_min_validity_secs: u32,
    pub http_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: 10,
            handoff_min_validity_secs: 30,
            http_timeout_secs: 15,
        }
    }
}

impl SessionConfig {
    pub fn init_timeout(&self) -> Option<Duration> {
        (self.init_timeout_secs > 0).then(|| Duration::from_secs(self.init_timeout_secs))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub downstream: DownstreamConfig,
    pub init: InitConfig,
    pub session: SessionConfig,
}

/// Returns the default config template with comments.
///
/// Embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

impl Config {
    /// Loads configuration from the default config path, then env overrides.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// carries a client secret.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(contents)?;
        let has_secret = table
            .get("provider")
            .and_then(toml::Value::as_table)
            .is_some_and(|provider| provider.contains_key("client_secret"));
        if has_secret {
            bail!(
                "provider.client_secret is not allowed: relay is a public client and authenticates with PKCE only"
            );
        }
        Ok(toml::Value::Table(table).try_into()?)
    }

    /// Initializes a new config file with the default template.
    ///
    /// # Errors
    /// Fails if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config file already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Applies `RELAY_*` overrides using `lookup` to read variables.
    ///
    /// # Errors
    /// Returns an error when an override is not a valid URL.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = read("RELAY_PROVIDER_URL") {
            self.provider.url =
                Some(Url::parse(&url).with_context(|| format!("RELAY_PROVIDER_URL '{url}'"))?);
        }
        if let Some(realm) = read("RELAY_REALM") {
            self.provider.realm = realm;
        }
        if let Some(client_id) = read("RELAY_CLIENT_ID") {
            self.provider.client_id = client_id;
        }
        if let Some(url) = read("RELAY_DOWNSTREAM_URL") {
            self.downstream.base_url =
                Some(Url::parse(&url).with_context(|| format!("RELAY_DOWNSTREAM_URL '{url}'"))?);
        }
        if let Some(scope) = read("RELAY_SCOPE") {
            self.init.scope = scope
                .split([' ', ','])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    /// The identity provider base URL, required for any network call.
    ///
    /// # Errors
    /// Returns an error when `provider.url` is unset.
    pub fn provider_url(&self) -> Result<&Url> {
        self.provider
            .url
            .as_ref()
            .context("provider.url is not configured (set RELAY_PROVIDER_URL)")
    }
}

pub mod paths {
    //! Path resolution for relay configuration and data directories.
    //!
    //! RELAY_HOME resolution order:
    //! 1. RELAY_HOME environment variable (if set)
    //! 2. ~/.config/relay (default)

    use std::path::PathBuf;

    /// Returns the relay home directory.
    pub fn relay_home() -> PathBuf {
        if let Ok(home) = std::env::var("RELAY_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map_or_else(|| PathBuf::from(".relay"), |h| h.join(".config").join("relay"))
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        relay_home().join("config.toml")
    }

    /// Returns the directory for rolling log files.
    pub fn logs_dir() -> PathBuf {
        relay_home().join("logs")
    }
}
