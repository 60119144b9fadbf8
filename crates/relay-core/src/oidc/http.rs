//! OIDC provider over HTTP (Keycloak-style realm endpoints).
//!
//! Public client only: requests carry `client_id` and a PKCE verifier, never
//! a client secret.

use std::time::Duration;

use serde_json::Value;
use url::Url;

use super::{
    AuthorizationRequest, CodeExchange, EndSessionRequest, IdentityProvider, ProviderFuture,
    SilentCheck, TokenSet, parse_callback,
};
use crate::config::Config;
use crate::error::ProviderError;

/// Realm endpoints used by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorization: Url,
    pub token: Url,
    pub end_session: Url,
}

impl ProviderEndpoints {
    /// `{base}/realms/{realm}/protocol/openid-connect/{auth,token,logout}`
    ///
    /// # Errors
    /// Returns `ProviderError::Config` if `base` cannot carry a path.
    pub fn keycloak(base: &Url, realm: &str) -> Result<Self, ProviderError> {
        let realm = realm.trim();
        if realm.is_empty() {
            return Err(ProviderError::Config("realm must not be empty".to_string()));
        }
        Ok(Self {
            authorization: realm_endpoint(base, realm, "auth")?,
            token: realm_endpoint(base, realm, "token")?,
            end_session: realm_endpoint(base, realm, "logout")?,
        })
    }
}

fn realm_endpoint(base: &Url, realm: &str, leaf: &str) -> Result<Url, ProviderError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| ProviderError::Config(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(["realms", realm, "protocol", "openid-connect", leaf]);
    Ok(url)
}

/// HTTP client for one realm and one public client.
#[derive(Debug, Clone)]
pub struct OidcClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    client_id: String,
}

impl OidcClient {
    /// # Errors
    /// Returns `ProviderError::Config` if the HTTP client cannot be built.
    pub fn new(
        endpoints: ProviderEndpoints,
        client_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        // Redirects are read, not followed: the silent check needs `Location`.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoints,
            client_id: client_id.into(),
        })
    }

    /// Builds a client from `[provider]` and `[session]` config.
    ///
    /// # Errors
    /// Returns an error when the provider URL is missing or invalid.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let endpoints = ProviderEndpoints::keycloak(config.provider_url()?, &config.provider.realm)?;
        Ok(Self::new(
            endpoints,
            config.provider.client_id.clone(),
            config.session.http_timeout(),
        )?)
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, ProviderError> {
        let grant = form
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map_or("unknown", |(_, v)| *v);
        tracing::debug!(grant, endpoint = %self.endpoints.token, "token request");

        let response = self
            .http
            .post(self.endpoints.token.clone())
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("token request failed: {e}")))?;

        parse_token_response(response).await
    }

    async fn silent_check(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<SilentCheck, ProviderError> {
        let url = self.authorization_url(request)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("silent check failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            // Provider rendered a login page instead of answering prompt=none.
            tracing::debug!(status = status.as_u16(), "silent check answered with a page");
            return Ok(SilentCheck::NoSession);
        }
        if !status.is_redirection() {
            return Err(ProviderError::Transport(format!(
                "silent check returned status {}",
                status.as_u16()
            )));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("silent check redirect without Location".to_string())
            })?;
        let location = Url::parse(location)
            .or_else(|_| request.redirect_uri.join(location))
            .map_err(|e| ProviderError::InvalidResponse(format!("bad Location header: {e}")))?;

        let params = parse_callback(&location, request.response_mode).ok_or_else(|| {
            ProviderError::InvalidResponse("silent check redirect carries no response".to_string())
        })?;
        if params.state.as_deref() != Some(request.state.as_str()) {
            return Err(ProviderError::InvalidResponse(
                "silent check state mismatch".to_string(),
            ));
        }
        if params.is_no_session() {
            return Ok(SilentCheck::NoSession);
        }
        if let Some(error) = params.error.clone() {
            return Err(ProviderError::Rejected {
                status: None,
                code: error,
                message: params.error_description.clone().unwrap_or_default(),
            });
        }

        if !request.flow.uses_code() {
            let access_token = params.access_token.clone().ok_or_else(|| {
                ProviderError::InvalidResponse("implicit response without access_token".to_string())
            })?;
            return Ok(SilentCheck::Session(TokenSet {
                access_token,
                refresh_token: None,
                id_token: params.id_token,
                expires_in: params.expires_in,
                token_type: params.token_type,
            }));
        }

        let code = params.code.ok_or_else(|| {
            ProviderError::InvalidResponse("silent check response without code".to_string())
        })?;
        let exchange = CodeExchange {
            code,
            redirect_uri: request.redirect_uri.clone(),
            code_verifier: request.pkce.as_ref().map(|p| p.verifier.clone()),
        };
        let tokens = self.exchange(&exchange).await?;
        Ok(SilentCheck::Session(tokens))
    }

    async fn exchange(&self, exchange: &CodeExchange) -> Result<TokenSet, ProviderError> {
        let redirect_uri = exchange.redirect_uri.as_str();
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", exchange.code.trim()),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(verifier) = exchange.code_verifier.as_deref() {
            form.push(("code_verifier", verifier));
        }
        self.token_request(&form).await
    }
}

impl IdentityProvider for OidcClient {
    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<Url, ProviderError> {
        let mut url = self.endpoints.authorization.clone();
        let scope = request.scope.join(" ");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", request.redirect_uri.as_str())
                .append_pair("state", &request.state)
                .append_pair("response_mode", request.response_mode.as_str())
                .append_pair("response_type", request.flow.response_type())
                .append_pair("scope", &scope)
                .append_pair("nonce", &request.nonce);
            if let Some(prompt) = request.prompt {
                query.append_pair("prompt", prompt.as_str());
            }
            if let Some(hint) = request.login_hint.as_deref() {
                query.append_pair("login_hint", hint);
            }
            if let Some(pkce) = request.pkce.as_ref().filter(|_| request.flow.uses_code()) {
                query
                    .append_pair("code_challenge", &pkce.challenge)
                    .append_pair("code_challenge_method", pkce.method.as_str());
            }
        }
        Ok(url)
    }

    fn end_session_url(&self, request: &EndSessionRequest) -> Result<Url, ProviderError> {
        let mut url = self.endpoints.end_session.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("post_logout_redirect_uri", request.redirect_uri.as_str());
            if let Some(hint) = request.id_token_hint.as_deref() {
                query.append_pair("id_token_hint", hint);
            }
        }
        Ok(url)
    }

    fn check_session<'a>(
        &'a self,
        request: &'a AuthorizationRequest,
    ) -> ProviderFuture<'a, SilentCheck> {
        Box::pin(self.silent_check(request))
    }

    fn exchange_code<'a>(&'a self, exchange: &'a CodeExchange) -> ProviderFuture<'a, TokenSet> {
        Box::pin(self.exchange(exchange))
    }

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> ProviderFuture<'a, TokenSet> {
        Box::pin(async move {
            let form = [
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.trim()),
                ("client_id", self.client_id.as_str()),
            ];
            self.token_request(&form).await
        })
    }
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenSet, ProviderError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::Transport(format!("token response read failed: {e}")))?;

    if !status.is_success() {
        let (code, message) = parse_oauth_error_details(&body);
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(ProviderError::Rejected {
                status: Some(status.as_u16()),
                code: code.unwrap_or_else(|| format!("http_{}", status.as_u16())),
                message: message.unwrap_or_default(),
            });
        }
        let mut msg = format!("token endpoint returned status={}", status.as_u16());
        if let Some(code) = code {
            msg.push_str(" code=");
            msg.push_str(&code);
        }
        return Err(ProviderError::Transport(msg));
    }

    let value: Value = serde_json::from_str(&body)
        .map_err(|e| ProviderError::InvalidResponse(format!("token response json invalid: {e}")))?;

    let access_token = non_empty_str(&value, "access_token").ok_or_else(|| {
        ProviderError::InvalidResponse("token response missing access_token".to_string())
    })?;

    Ok(TokenSet {
        access_token,
        refresh_token: non_empty_str(&value, "refresh_token"),
        id_token: non_empty_str(&value, "id_token"),
        expires_in: value
            .get("expires_in")
            .and_then(parse_i64_lossy)
            .filter(|v| *v > 0),
        token_type: non_empty_str(&value, "token_type"),
    })
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };

    let mut code = non_empty_str(&value, "code");
    let mut message = non_empty_str(&value, "error_description");

    match value.get("error") {
        Some(Value::String(err)) => {
            if code.is_none() {
                code = Some(err.trim().to_string());
            }
        }
        Some(Value::Object(err)) => {
            if code.is_none() {
                code = err
                    .get("code")
                    .or_else(|| err.get("type"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
            if message.is_none() {
                message = err
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
        }
        _ => {}
    }

    (code, message)
}
