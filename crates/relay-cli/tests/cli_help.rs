use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("relay")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("open"))
        .stdout(predicate::str::contains("logout"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_no_browser_flag_reads_environment() {
    cargo_bin_cmd!("relay")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-browser"))
        .stdout(predicate::str::contains("RELAY_NO_BROWSER"));
}

#[test]
fn test_open_help_lists_strategy() {
    cargo_bin_cmd!("relay")
        .args(["open", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--strategy"))
        .stdout(predicate::str::contains("oauth-relay"))
        .stdout(predicate::str::contains("DESTINATION"));
}

#[test]
fn test_unknown_strategy_is_rejected() {
    cargo_bin_cmd!("relay")
        .args(["open", "--strategy", "cookie", "https://erp.example.com/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown handoff strategy 'cookie'"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("relay")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1"));
}
