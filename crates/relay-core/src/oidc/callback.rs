//! Authorization callback parsing.
//!
//! The identity provider returns to the redirect URI with either a code, an
//! error, or (implicit/hybrid flows) tokens, in the query or the fragment
//! depending on the response mode.

use url::Url;

use crate::config::ResponseMode;

/// Parameters of one authorization response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub session_state: Option<String>,
}

/// Errors meaning "no session, nothing went wrong".
const NO_SESSION_ERRORS: &[&str] = &[
    "login_required",
    "interaction_required",
    "consent_required",
    "account_selection_required",
    "access_denied",
];

/// Keys that mark a URL as an authorization response.
const CALLBACK_KEYS: &[&str] = &[
    "code",
    "state",
    "error",
    "error_description",
    "error_uri",
    "access_token",
    "id_token",
    "token_type",
    "expires_in",
    "session_state",
    "iss",
];

impl CallbackParams {
    /// Whether the provider declined silently or the user cancelled.
    pub fn is_no_session(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| NO_SESSION_ERRORS.contains(&e))
    }

    /// Human-readable error text, if the response is an error.
    pub fn error_message(&self) -> Option<String> {
        let code = self.error.as_deref()?;
        Some(match self.error_description.as_deref() {
            Some(desc) => format!("{code}: {desc}"),
            None => code.to_string(),
        })
    }
}

/// Parses a callback from `url`, reading the part selected by `mode`.
///
/// Returns `None` when the URL carries neither a code, an error, nor tokens.
pub fn parse_callback(url: &Url, mode: ResponseMode) -> Option<CallbackParams> {
    let raw = match mode {
        ResponseMode::Query => url.query()?,
        ResponseMode::Fragment => url.fragment()?,
    };

    let mut params = CallbackParams::default();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            "code" => params.code = Some(value),
            "state" => params.state = Some(value),
            "error" => params.error = Some(value),
            "error_description" => params.error_description = Some(value),
            "access_token" => params.access_token = Some(value),
            "id_token" => params.id_token = Some(value),
            "token_type" => params.token_type = Some(value),
            "expires_in" => params.expires_in = value.parse().ok(),
            "session_state" => params.session_state = Some(value),
            _ => {}
        }
    }

    let is_callback =
        params.code.is_some() || params.error.is_some() || params.access_token.is_some();
    is_callback.then_some(params)
}

/// Returns `url` without authorization response parameters.
///
/// Used to derive a redirect URI from the location the user is on.
pub fn strip_callback_params(url: &Url) -> Url {
    let mut clean = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !CALLBACK_KEYS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(kept);
    }
    clean.set_fragment(None);
    clean
}
