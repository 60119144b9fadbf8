//! Session commands against a mock identity provider.


use fixtures::{can_bind_localhost, idp_with_session, idp_without_session, relay};
use predicates::prelude::*;
use tempfile::TempDir;

#[tokio::test]
async fn test_status_without_provider_session_is_not_signed_in() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = idp_without_session().await;

    relay(&home, &server)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not signed in."));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1, "no token request without a session");
}

#[tokio::test]
async fn test_status_with_provider_session_shows_profile() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = idp_with_session().await;

    relay(&home, &server)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Signed in as alice <alice@example.com>"))
        .stdout(predicate::str::contains("Token expires"))
        .stdout(predicate::str::contains("Roles: portal-user"));

    let requests = server.received_requests().await.unwrap();
    let exchange = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("code exchange");
    let body = String::from_utf8_lossy(&exchange.body);
    assert!(body.contains("code=c-1"));
    assert!(body.contains("code_verifier="));
    assert!(!body.contains("client_secret"));
}

#[test]
fn test_status_without_provider_url_fails() {
    let home = TempDir::new().unwrap();

    assert_cmd::cargo::cargo_bin_cmd!("relay")
        .env("RELAY_HOME", home.path())
        .env_remove("RELAY_PROVIDER_URL")
        .env("RELAY_DOWNSTREAM_URL", fixtures::DOWNSTREAM_URL)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("RELAY_PROVIDER_URL"));
}

#[tokio::test]
async fn test_open_with_session_hands_off_through_relay_endpoint() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = idp_with_session().await;

    relay(&home, &server)
        .args(["open", "https://erp.example.com/odoo/helpdesk"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "https://erp.example.com/auth_oauth/signin?access_token=",
        ))
        .stdout(predicate::str::contains("token_type=Bearer"))
        .stdout(predicate::str::contains(
            "Opened https://erp.example.com/odoo/helpdesk (oauth-relay)",
        ));
}

#[tokio::test]
async fn test_open_without_session_falls_back_to_plain() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = idp_without_session().await;

    relay(&home, &server)
        .args(["open", "--strategy", "token-query"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://erp.example.com/"))
        .stdout(predicate::str::contains("access_token").not())
        .stdout(predicate::str::contains("without a session"));
}

#[tokio::test]
async fn test_logout_prints_end_session_url() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = idp_with_session().await;

    relay(&home, &server)
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "/realms/CS/protocol/openid-connect/logout",
        ))
        .stdout(predicate::str::contains("post_logout_redirect_uri="))
        .stdout(predicate::str::contains("Signed out."));
}

#[tokio::test]
async fn test_no_browser_flag_prints_logout_url() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = idp_with_session().await;

    relay(&home, &server)
        .env_remove("RELAY_NO_BROWSER")
        .args(["--no-browser", "logout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Open in your browser:"))
        .stdout(predicate::str::contains("Signed out."));
}
