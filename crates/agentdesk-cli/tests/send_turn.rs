//! Integration tests for `agentdesk send`.


use assert_cmd::cargo::cargo_bin_cmd;
use fixtures::{can_bind_localhost, delegation_sse, sse_response, temp_home, text_sse};
use predicates::prelude::*;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_chat(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(sse_response(&body))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_send_prints_segmented_transcript() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = temp_home();
    let server = MockServer::start().await;
    mount_chat(&server, delegation_sse("thread_42")).await;

    Mock::given(method("POST"))
        .and(path("/api/threads/messages"))
        .and(body_partial_json(json!({"threadId": "thread_42"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .env("AGENTDESK_BASE_URL", server.uri())
        .env("AGENTDESK_TOKEN", "test-token")
        .args(["send", "Audit example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[orchestrator] Let me check that."))
        .stdout(predicate::str::contains("[seo_tech]"))
        .stdout(predicate::str::contains("⚙ seo_analyze_url (complete)"))
        .stdout(predicate::str::contains("[orchestrator] Done!"))
        .stdout(predicate::str::contains("thread: thread_42"));
}

#[tokio::test]
async fn test_send_existing_thread_passes_thread_id() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = temp_home();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"threadId": "thread_7", "agentSlug": "copywriter"})))
        .respond_with(sse_response(&text_sse("Here is a headline.")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/threads/messages"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .env("AGENTDESK_BASE_URL", server.uri())
        .env("AGENTDESK_TOKEN", "test-token")
        .args([
            "send",
            "Write a headline",
            "--thread",
            "thread_7",
            "--agent",
            "copywriter",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[orchestrator] Here is a headline."))
        .stdout(predicate::str::contains("thread: thread_7"));
}

#[tokio::test]
async fn test_send_json_output() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = temp_home();
    let server = MockServer::start().await;
    mount_chat(&server, delegation_sse("thread_42")).await;
    Mock::given(method("POST"))
        .and(path("/api/threads/messages"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let output = cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .env("AGENTDESK_BASE_URL", server.uri())
        .env("AGENTDESK_TOKEN", "test-token")
        .args(["send", "Audit example.com", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["thread_id"], "thread_42");
    assert_eq!(value["turn"]["segments"].as_array().unwrap().len(), 3);
    assert_eq!(value["turn"]["delegations"][0]["status"], "complete");
    assert_eq!(value["report"]["outcome"]["status"], "completed");
}

#[test]
fn test_send_without_token_fails() {
    let home = temp_home();

    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .env("AGENTDESK_BASE_URL", "http://127.0.0.1:9")
        .env_remove("AGENTDESK_TOKEN")
        .args(["send", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("AGENTDESK_TOKEN"));

    // Nothing was queued for a request that never started.
    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .args(["queue"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending messages."));
}

#[tokio::test]
async fn test_stream_failure_shows_fallback() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = temp_home();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/threads/messages"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("agentdesk")
        .env("AGENTDESK_HOME", home.path())
        .env("AGENTDESK_BASE_URL", server.uri())
        .env("AGENTDESK_TOKEN", "test-token")
        .args(["send", "hello", "--thread", "thread_1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[orchestrator] Sorry, an error occurred. Please try again.",
        ))
        .stderr(predicate::str::contains("HTTP 500"))
        .stderr(predicate::str::contains(
            "retry with `agentdesk send --thread thread_1`",
        ));
}
