//! Integration tests for the outbound queue surviving across runs.


use assert_cmd::cargo::cargo_bin_cmd;
use fixtures::{can_bind_localhost, delegation_sse, sse_response, temp_home};
use predicates::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_failed_persistence_is_queued_then_flushed() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = temp_home();

    let flaky = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(sse_response(&delegation_sse("thread_42")))
        .mount(&flaky)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/threads/messages"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&flaky)
        .await;

    // The turn itself succeeds even though persistence does not.
    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .env("AGENTDESK_BASE_URL", flaky.uri())
        .env("AGENTDESK_TOKEN", "test-token")
        .args(["send", "Audit example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("thread: thread_42"))
        .stderr(predicate::str::contains("queued for delivery"));

    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .arg("queue")
        .assert()
        .success()
        .stdout(predicate::str::contains("thread_42  user  attempts=1"))
        .stdout(predicate::str::contains("thread_42  assistant  attempts=0"))
        .stdout(predicate::str::contains("last error: HTTP 503"));

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/threads/messages"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&healthy)
        .await;

    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .env("AGENTDESK_BASE_URL", healthy.uri())
        .env("AGENTDESK_TOKEN", "test-token")
        .arg("flush")
        .assert()
        .success()
        .stdout(predicate::str::contains("Delivered 2, pending 0"));

    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .arg("queue")
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending messages."));
}

#[test]
fn test_queue_empty_on_fresh_home() {
    let home = temp_home();

    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .arg("queue")
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending messages."));
}

#[test]
fn test_flush_with_empty_queue() {
    let home = temp_home();

    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .env("AGENTDESK_BASE_URL", "http://127.0.0.1:9")
        .env("AGENTDESK_TOKEN", "test-token")
        .arg("flush")
        .assert()
        .success()
        .stdout(predicate::str::contains("Delivered 0, pending 0"));
}
