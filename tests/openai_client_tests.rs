//! Integration tests for the model client and the engine over a mock
//! chat-completions endpoint.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use confab::config::EngineConfig;
use confab::engine::ChatEngine;
use confab::mcp::ToolCatalog;
use confab::provider::{ChatRequest, ModelClient, OpenAiCompatibleClient};
use confab::session::{MemoryStore, SessionStore};
use confab::types::ChatMessage;

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 7},
    })
}

fn request(model: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_owned(),
        messages: vec![ChatMessage::user("hello")],
        temperature: 0.3,
        max_tokens: 256,
        tools: Vec::new(),
    }
}

#[tokio::test]
async fn client_sends_bearer_auth_and_parses_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hi there")))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiCompatibleClient::new(server.uri(), Some("test-key".into()));
    let response = client.chat(&request("gpt-4o-mini")).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("hi there"));
    assert_eq!(response.usage.input_tokens, 12);
    assert_eq!(response.usage.output_tokens, 7);
}

#[tokio::test]
async fn client_unwraps_response_envelope_and_alternate_usage_keys() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "choices": [{"message": {"role": "assistant", "content": "wrapped"}}],
                "usage": {"input_tokens": 3, "output_tokens": 2},
                "cost": 0.0005,
            }
        })))
        .mount(&server)
        .await;

    let client = OpenAiCompatibleClient::new(server.uri(), None);
    let response = client.chat(&request("gpt-4o-mini")).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("wrapped"));
    assert_eq!(response.usage.input_tokens, 3);
    assert!((response.usage.cost - 0.0005).abs() < f64::EPSILON);
}

#[tokio::test]
async fn client_maps_http_failure_to_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let client = OpenAiCompatibleClient::new(server.uri(), None);
    assert!(client.chat(&request("gpt-4o-mini")).await.is_err());
}

#[tokio::test]
async fn engine_turn_over_http_persists_history_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("the answer")))
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.base_url = server.uri();
    let model = Arc::new(OpenAiCompatibleClient::new(server.uri(), None));
    let store = Arc::new(MemoryStore::new());
    let engine = ChatEngine::new(
        config,
        model,
        ToolCatalog::new(),
        Arc::clone(&store) as Arc<dyn SessionStore>,
    );

    let reply = engine.process_message("alice", "question").await.unwrap();
    assert!(reply.starts_with("the answer"));
    assert!(reply.contains("12 in / 7 out tokens"));

    let history = store.load_messages("alice").await.unwrap();
    assert_eq!(history.len(), 2);
    let usage = store.load_usage("alice").await.unwrap();
    assert_eq!(usage.chat.input_tokens, 12);
}

#[tokio::test]
async fn engine_drops_calls_to_tools_it_does_not_have() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": "best effort answer",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "ghost_tool", "arguments": "{}"},
                }],
            }}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.base_url = server.uri();
    let model = Arc::new(OpenAiCompatibleClient::new(server.uri(), None));
    let engine = ChatEngine::new(
        config,
        model,
        ToolCatalog::new(),
        Arc::new(MemoryStore::new()),
    );

    let reply = engine.process_message("alice", "use the ghost tool").await.unwrap();
    assert!(reply.starts_with("best effort answer"));
}
