//! Integration tests for the gateway pipeline.
//!
//! These tests drive the full router end-to-end with a mock backend and
//! verify the externally visible contract: status codes, headers, error
//! bodies, and which backend capabilities get invoked when.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use nirvana_gateway::test_utils::{MockOllama, RecordedCall};
use nirvana_gateway::{AppState, ModelSource, build_router};
use rstest::rstest;
use serde_json::{Value, json};
use tower::util::ServiceExt; // for oneshot()

fn app_with_model(backend: MockOllama, model: Option<&str>) -> Router {
    let state = AppState::with_backend(backend, ModelSource::Fixed(model.map(str::to_string)));
    build_router(state)
}

fn app(backend: MockOllama) -> Router {
    app_with_model(backend, Some("llama3.1:8b"))
}

fn json_request(uri: &str, body: &Value) -> Request<Body> {
    raw_request(uri, &serde_json::to_string(body).unwrap())
}

fn raw_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn valid_chat_body() -> Value {
    json!({
        "messages": [
            {"id": "m1", "role": "user", "parts": [{"type": "text", "text": "Hello"}]}
        ]
    })
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn read_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_chat_round_trip_streams_with_headers() {
    let backend = MockOllama::streaming(vec!["The ", "answer ", "is 42."]);
    let app = app(backend);

    let response = app
        .oneshot(json_request("/api/chat", &valid_chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["connection"], "keep-alive");
    assert_eq!(read_text(response).await, "The answer is 42.");
}

#[tokio::test]
async fn test_malformed_json_rejected_before_any_backend_logic() {
    let backend = MockOllama::streaming(vec!["never"]);
    let app = app(backend.clone());

    let broken = r#"{ "messages": [ { "id": "1", "role": "user", "parts": [] }"#;
    let response = app.oneshot(raw_request("/api/chat", broken)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], "Invalid JSON payload");
    assert!(backend.recorded_calls().is_empty());
}

#[tokio::test]
async fn test_empty_messages_reports_too_small_issue() {
    let backend = MockOllama::streaming(vec!["never"]);
    let app = app(backend.clone());

    let response = app
        .oneshot(json_request("/api/chat", &json!({"messages": []})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], "Invalid JSON payload");
    assert_eq!(body["details"][0]["code"], "too_small");
    assert_eq!(body["details"][0]["path"], json!(["messages"]));
    assert_eq!(body["details"][0]["minimum"], 1);
    assert_eq!(body["details"][0]["inclusive"], true);
    assert!(backend.recorded_calls().is_empty());
}

#[tokio::test]
async fn test_empty_text_part_reports_exact_path() {
    let app = app(MockOllama::streaming(vec!["never"]));

    let body = json!({
        "messages": [
            {"id": "m1", "role": "user", "parts": [{"type": "text", "text": ""}]}
        ]
    });
    let response = app.oneshot(json_request("/api/chat", &body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], "Invalid JSON payload");
    assert_eq!(
        body["details"][0]["path"],
        json!(["messages", 0, "parts", 0, "text"])
    );
    assert_eq!(body["details"][0]["code"], "too_small");
}

#[tokio::test]
async fn test_unconfigured_model_never_touches_backend() {
    let backend = MockOllama::streaming(vec!["never"]);
    let app = app_with_model(backend.clone(), None);

    let response = app
        .oneshot(json_request("/api/chat", &valid_chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(response).await;
    assert_eq!(body["error"], "Ollama model configuration missing in env file");
    assert!(backend.recorded_calls().is_empty());
}

#[tokio::test]
async fn test_unserved_model_resolves_but_never_chats() {
    let backend = MockOllama::unavailable();
    let app = app(backend.clone());

    let response = app
        .oneshot(json_request("/api/chat", &valid_chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(response).await;
    assert_eq!(
        body["error"],
        "Specified Ollama model is not available. Ensure Ollama is serving"
    );

    let calls = backend.recorded_calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], RecordedCall::Resolve { model } if model == "llama3.1:8b"));
}

#[tokio::test]
async fn test_connection_refused_maps_to_502() {
    let app = app(MockOllama::refusing_connections());

    let response = app
        .oneshot(json_request("/api/chat", &valid_chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = read_json(response).await;
    assert_eq!(
        body["error"],
        "Unable to connect to Ollama. Make sure the instance is running on http://localhost:11434"
    );
}

#[tokio::test]
async fn test_generic_backend_error_maps_to_500_with_message() {
    let app = app(MockOllama::erroring("boom"));

    let response = app
        .oneshot(json_request("/api/chat", &valid_chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json(response).await;
    assert_eq!(body["error"], "Internal server error");
    assert_eq!(body["message"], "boom");
}

#[tokio::test]
async fn test_opaque_backend_failure_maps_to_unknown_error() {
    let app = app(MockOllama::opaque_failure());

    let response = app
        .oneshot(json_request("/api/chat", &valid_chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json(response).await;
    assert_eq!(body["error"], "An unknown error occurred");
    assert!(body.get("message").is_none());
}

#[tokio::test]
async fn test_chat_message_text_reaches_backend_untrimmed() {
    let backend = MockOllama::streaming(vec!["ok"]);
    let app = app(backend.clone());

    let body = json!({
        "messages": [
            {"id": "m1", "role": "user", "parts": [
                {"type": "step-start"},
                {"type": "text", "text": "  padded  "},
                {"type": "step-end"}
            ]}
        ]
    });
    let response = app.oneshot(json_request("/api/chat", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let calls = backend.chat_calls();
    // Step markers are dropped, text is preserved exactly.
    assert_eq!(calls[0].messages[1].content, "  padded  ");
}

#[tokio::test]
async fn test_simple_message_round_trip_trims_completion() {
    let backend = MockOllama::completing("\n  Breathe in, breathe out.  \n");
    let app = app(backend.clone());

    let response = app
        .oneshot(json_request("/api/message", &json!({"message": "  How do I relax?  "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.headers()["cache-control"], "no-store");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(read_text(response).await, "Breathe in, breathe out.");

    // The assembled prompt carries the trimmed question.
    let calls = backend.chat_calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].messages[0].content.ends_with("Question:\nHow do I relax?"));
}

#[rstest]
#[case(json!({}), "Message is required")]
#[case(json!({"message": 17}), "Message is required")]
#[case(json!({"message": ""}), "Message cannot be empty")]
#[case(json!({"message": "   "}), "Message cannot be empty")]
#[case(json!({"message": "a".repeat(2001)}), "Message too long")]
#[tokio::test]
async fn test_simple_message_validation_reasons(#[case] body: Value, #[case] expected: &str) {
    let backend = MockOllama::completing("never");
    let app = app(backend.clone());

    let response = app
        .oneshot(json_request("/api/message", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], expected);
    assert!(body.get("details").is_none());
    assert!(backend.recorded_calls().is_empty());
}

#[tokio::test]
async fn test_simple_message_boundary_length_succeeds() {
    let backend = MockOllama::completing("fits");
    let app = app(backend);

    let response = app
        .oneshot(json_request(
            "/api/message",
            &json!({"message": "a".repeat(2000)}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_text(response).await, "fits");
}

#[tokio::test]
async fn test_simple_message_malformed_json_is_invalid_json() {
    let app = app(MockOllama::completing("never"));

    let response = app
        .oneshot(raw_request("/api/message", "{\"message\": "))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], "Invalid JSON payload");
}

#[tokio::test]
async fn test_simple_message_unconfigured_model_is_503() {
    let backend = MockOllama::completing("never");
    let app = app_with_model(backend.clone(), None);

    let response = app
        .oneshot(json_request("/api/message", &json!({"message": "hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(response).await;
    assert_eq!(body["error"], "Ollama model configuration missing in env file");
    assert!(backend.recorded_calls().is_empty());
}

#[tokio::test]
async fn test_validation_failures_are_collected_not_first_only_for_chat() {
    let app = app(MockOllama::streaming(vec!["never"]));

    let body = json!({
        "messages": [
            {"id": "m1", "role": "moderator", "parts": []},
            {"id": "m2", "role": "user", "parts": [{"type": "text", "text": ""}]}
        ]
    });
    let response = app.oneshot(json_request("/api/chat", &body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    let details = body["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(details[0]["code"], "invalid_value");
    assert_eq!(details[1]["code"], "too_small");
}
