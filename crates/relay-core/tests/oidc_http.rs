use std::time::Duration;

use relay_core::config::{Flow, PkceMethod, ResponseMode};
use relay_core::error::ProviderError;
use relay_core::oidc::{
    AuthorizationRequest, CodeExchange, IdentityProvider, OidcClient, Pkce, Prompt,
    ProviderEndpoints, SilentCheck,
};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const TOKEN_PATH: &str = "/realms/CS/protocol/openid-connect/token";
const AUTH_PATH: &str = "/realms/CS/protocol/openid-connect/auth";
const REDIRECT: &str = "http://127.0.0.1:8765/callback";

fn oidc(server: &MockServer) -> OidcClient {
    let base = Url::parse(&server.uri()).unwrap();
    OidcClient::new(
        ProviderEndpoints::keycloak(&base, "CS").unwrap(),
        "app-test",
        Duration::from_secs(5),
    )
    .unwrap()
}

fn silent_request(flow: Flow, response_mode: ResponseMode) -> AuthorizationRequest {
    AuthorizationRequest {
        redirect_uri: Url::parse(REDIRECT).unwrap(),
        state: "state-1".to_string(),
        nonce: "nonce-1".to_string(),
        flow,
        response_mode,
        scope: vec!["openid".to_string()],
        pkce: Some(Pkce::generate(PkceMethod::S256)),
        prompt: Some(Prompt::None),
        login_hint: None,
    }
}

fn no_client_secret(req: &Request) -> bool {
    !String::from_utf8_lossy(&req.body).contains("client_secret")
}

/// Redirects back to the app with `params`, echoing the request's state.
fn redirect_with(
    params: &'static str,
    fragment: bool,
) -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
    move |req: &Request| {
        let state = req
            .url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        let sep = if fragment { '#' } else { '?' };
        let params = params.replace("{state}", &state);
        ResponseTemplate::new(302).insert_header("Location", format!("{REDIRECT}{sep}{params}"))
    }
}

#[tokio::test]
async fn test_exchange_code_posts_public_client_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc"))
        .and(body_string_contains("client_id=app-test"))
        .and(body_string_contains("code_verifier=verifier-1"))
        .and(no_client_secret)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "id_token": "it-1",
            "expires_in": "300",
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = oidc(&server)
        .exchange_code(&CodeExchange {
            code: "abc".to_string(),
            redirect_uri: Url::parse(REDIRECT).unwrap(),
            code_verifier: Some("verifier-1".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(tokens.access_token, "at-1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(tokens.id_token.as_deref(), Some("it-1"));
    assert_eq!(tokens.expires_in, Some(300));
}

#[tokio::test]
async fn test_refresh_rejection_is_reported_with_oauth_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-old"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token is not active",
        })))
        .mount(&server)
        .await;

    let err = oidc(&server).refresh("rt-old").await.unwrap_err();

    assert_eq!(
        err,
        ProviderError::Rejected {
            status: Some(400),
            code: "invalid_grant".to_string(),
            message: "Token is not active".to_string(),
        }
    );
}

#[tokio::test]
async fn test_server_errors_are_transport_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let err = oidc(&server).refresh("rt").await.unwrap_err();

    assert!(matches!(err, ProviderError::Transport(msg) if msg.contains("503")));
}

#[tokio::test]
async fn test_token_response_without_access_token_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token_type": "Bearer"})))
        .mount(&server)
        .await;

    let err = oidc(&server).refresh("rt").await.unwrap_err();

    assert!(matches!(err, ProviderError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_silent_check_login_required_means_no_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTH_PATH))
        .and(query_param("prompt", "none"))
        .and(query_param("client_id", "app-test"))
        .respond_with(redirect_with("error=login_required&state={state}", false))
        .expect(1)
        .mount(&server)
        .await;

    let check = oidc(&server)
        .check_session(&silent_request(Flow::Standard, ResponseMode::Query))
        .await
        .unwrap();

    assert_eq!(check, SilentCheck::NoSession);
}

#[tokio::test]
async fn test_silent_check_code_is_exchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTH_PATH))
        .respond_with(redirect_with("state={state}&session_state=s&code=c-1", false))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("code=c-1"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-silent",
            "expires_in": 300,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let check = oidc(&server)
        .check_session(&silent_request(Flow::Standard, ResponseMode::Query))
        .await
        .unwrap();

    let SilentCheck::Session(tokens) = check else {
        panic!("expected a session, got {check:?}");
    };
    assert_eq!(tokens.access_token, "at-silent");
}

#[tokio::test]
async fn test_silent_check_implicit_reads_fragment_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTH_PATH))
        .and(query_param("response_mode", "fragment"))
        .respond_with(redirect_with(
            "access_token=at-frag&token_type=Bearer&expires_in=60&state={state}",
            true,
        ))
        .mount(&server)
        .await;

    let check = oidc(&server)
        .check_session(&silent_request(Flow::Implicit, ResponseMode::Fragment))
        .await
        .unwrap();

    let SilentCheck::Session(tokens) = check else {
        panic!("expected a session, got {check:?}");
    };
    assert_eq!(tokens.access_token, "at-frag");
    assert_eq!(tokens.expires_in, Some(60));
}

#[tokio::test]
async fn test_silent_check_rejects_foreign_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTH_PATH))
        .respond_with(redirect_with("state=forged&code=c-1", false))
        .mount(&server)
        .await;

    let err = oidc(&server)
        .check_session(&silent_request(Flow::Standard, ResponseMode::Query))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_silent_check_login_page_means_no_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let check = oidc(&server)
        .check_session(&silent_request(Flow::Standard, ResponseMode::Query))
        .await
        .unwrap();

    assert_eq!(check, SilentCheck::NoSession);
}

#[tokio::test]
async fn test_unreachable_provider_is_transport_error() {
    let base = Url::parse("http://127.0.0.1:9").unwrap();
    let client = OidcClient::new(
        ProviderEndpoints::keycloak(&base, "CS").unwrap(),
        "app-test",
        Duration::from_secs(2),
    )
    .unwrap();

    let err = client.refresh("rt").await.unwrap_err();

    assert!(matches!(err, ProviderError::Transport(_)));
}
