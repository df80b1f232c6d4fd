//! Integration tests for the SSE streaming endpoint.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use parlor::provider::ProviderError;

mod common;
use common::{chunk, test_app, test_app_with_store, Outcome, ScriptedProvider};

fn stream_request(session_id: &str, user_text: &str) -> Request<Body> {
    Request::post("/api/v1/chat/stream")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "session_id": session_id, "user_text": user_text }).to_string(),
        ))
        .unwrap()
}

// ============================================================================
// SSE Event Parsing Helper
// ============================================================================

/// Parse SSE events from a response body into (event, data) pairs.
fn parse_sse_events(body: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in body.lines() {
        if let Some(event_name) = line.strip_prefix("event:") {
            current_event = event_name.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data = data.trim().to_string();
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((current_event.clone(), current_data.clone()));
            current_event.clear();
            current_data.clear();
        }
    }

    // Handle last event if no trailing newline
    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }

    events
}

async fn collect_events(response: axum::response::Response<Body>) -> Vec<(String, String)> {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    parse_sse_events(std::str::from_utf8(&body).unwrap())
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn stream_emits_start_tokens_and_done() {
    let (app, store) = test_app_with_store(ScriptedProvider::new(vec![Outcome::Chunks(vec![
        chunk(0, "Hi", false),
        chunk(1, " there", false),
        chunk(2, "!", false),
        chunk(3, "", true),
    ])]));

    let response = app.oneshot(stream_request("demo", "hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let events = collect_events(response).await;
    assert_eq!(events.len(), 5);

    assert_eq!(events[0].0, "start");
    let start: serde_json::Value = serde_json::from_str(&events[0].1).unwrap();
    assert_eq!(start["session_id"], "demo");
    assert_eq!(start["model"], "test-model");

    let tokens: Vec<String> = events[1..4]
        .iter()
        .map(|(name, data)| {
            assert_eq!(name, "token");
            let json: serde_json::Value = serde_json::from_str(data).unwrap();
            json["content"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(tokens, vec!["Hi", " there", "!"]);

    assert_eq!(events[4].0, "done");
    let done: serde_json::Value = serde_json::from_str(&events[4].1).unwrap();
    assert!(done["message_id"].as_str().unwrap().starts_with("msg_"));

    // The accumulated reply was committed.
    let snapshot = store.snapshot("demo").unwrap();
    assert_eq!(snapshot.turns.len(), 2);
    assert_eq!(snapshot.turns[1].text, "Hi there!");
    assert!(!snapshot.busy);
}

#[tokio::test]
async fn final_chunk_text_is_streamed_and_committed() {
    let (app, store) = test_app_with_store(ScriptedProvider::new(vec![Outcome::Chunks(vec![
        chunk(0, "almost", false),
        chunk(1, " done", true),
    ])]));

    let response = app.oneshot(stream_request("demo", "hello")).await.unwrap();
    let events = collect_events(response).await;

    // The final chunk's text goes out as a token like any other fragment.
    assert_eq!(events.len(), 4);
    assert_eq!(events[2].0, "token");
    let token: serde_json::Value = serde_json::from_str(&events[2].1).unwrap();
    assert_eq!(token["content"], " done");
    assert_eq!(events.last().unwrap().0, "done");

    assert_eq!(store.snapshot("demo").unwrap().turns[1].text, "almost done");
}

#[tokio::test]
async fn final_marker_on_text_chunk_loses_no_output() {
    let (app, store) = test_app_with_store(ScriptedProvider::new(vec![Outcome::Chunks(vec![
        chunk(0, "Hi", false),
        chunk(1, " there", false),
        chunk(2, "!", true),
    ])]));

    let response = app.oneshot(stream_request("demo", "hello")).await.unwrap();
    let events = collect_events(response).await;

    let tokens: Vec<String> = events
        .iter()
        .filter(|(name, _)| name == "token")
        .map(|(_, data)| {
            let json: serde_json::Value = serde_json::from_str(data).unwrap();
            json["content"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(tokens, vec!["Hi", " there", "!"]);
    assert_eq!(events.last().unwrap().0, "done");

    assert_eq!(store.snapshot("demo").unwrap().turns[1].text, "Hi there!");
}

// ============================================================================
// Failure Paths
// ============================================================================

#[tokio::test]
async fn mid_stream_error_emits_error_and_commits_nothing() {
    let (app, store) = test_app_with_store(ScriptedProvider::new(vec![Outcome::Chunks(vec![
        chunk(0, "Hi", false),
        Err(ProviderError::Api {
            status: 500,
            message: "backend down".to_string(),
        }),
    ])]));

    let response = app.oneshot(stream_request("demo", "hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = collect_events(response).await;
    assert_eq!(events.last().unwrap().0, "error");
    assert!(events.iter().all(|(name, _)| name != "done"));

    let snapshot = store.snapshot("demo").unwrap();
    assert!(snapshot.turns.is_empty());
    assert!(!snapshot.busy);
}

#[tokio::test]
async fn sequence_gap_emits_corruption_error() {
    let (app, store) = test_app_with_store(ScriptedProvider::new(vec![Outcome::Chunks(vec![
        chunk(0, "Hi", false),
        chunk(2, " there", false),
        chunk(3, "", true),
    ])]));

    let response = app.oneshot(stream_request("demo", "hello")).await.unwrap();
    let events = collect_events(response).await;

    let (name, data) = events.last().unwrap();
    assert_eq!(name, "error");
    let json: serde_json::Value = serde_json::from_str(data).unwrap();
    assert!(json["message"].as_str().unwrap().contains("corrupted"));

    assert!(store.snapshot("demo").unwrap().turns.is_empty());
}

#[tokio::test]
async fn establishment_failure_is_a_problem_response() {
    let app = test_app(ScriptedProvider::new(vec![Outcome::Fail(
        500,
        "backend down".to_string(),
    )]));

    let response = app.oneshot(stream_request("demo", "hello")).await.unwrap();

    // Failing before any output means a plain HTTP error, not an SSE body.
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
}

#[tokio::test]
async fn stream_validation_error_is_a_problem_response() {
    let app = test_app(ScriptedProvider::new(vec![]));

    let response = app.oneshot(stream_request("demo", "")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn failed_stream_frees_session_for_next_turn() {
    let (app, store) = test_app_with_store(ScriptedProvider::new(vec![
        Outcome::Chunks(vec![
            chunk(0, "partial", false),
            Err(ProviderError::Api {
                status: 500,
                message: "backend down".to_string(),
            }),
        ]),
        Outcome::Chunks(vec![chunk(0, "recovered", true)]),
    ]));

    let response = app
        .clone()
        .oneshot(stream_request("demo", "first"))
        .await
        .unwrap();
    let _ = collect_events(response).await;

    let response = app.oneshot(stream_request("demo", "second")).await.unwrap();
    let events = collect_events(response).await;
    assert_eq!(events.last().unwrap().0, "done");

    let snapshot = store.snapshot("demo").unwrap();
    assert_eq!(snapshot.turns.len(), 2);
    assert_eq!(snapshot.turns[0].text, "second");
    assert_eq!(snapshot.turns[1].text, "recovered");
}
