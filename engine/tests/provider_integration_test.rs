//! Integration tests for the HTTP LLM providers and the OpenAI embedder
//!
//! Every test runs against a local wiremock server; no real API is contacted.

use hive_engine::config::{AnthropicConfig, OpenAIConfig};
use hive_engine::knowledge::{EmbeddingProvider, OpenAiEmbedder};
use hive_engine::llm::anthropic::AnthropicProvider;
use hive_engine::llm::ollama::OllamaProvider;
use hive_engine::llm::openai::OpenAIProvider;
use hive_engine::llm::{LLMError, LLMProvider, Message};
use sdk::errors::EngineError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai(server: &MockServer, key: Option<&str>) -> OpenAIProvider {
    OpenAIProvider::new(
        OpenAIConfig {
            base_url: server.uri(),
            ..OpenAIConfig::default()
        },
        key.map(str::to_string),
    )
}

fn anthropic(server: &MockServer) -> AnthropicProvider {
    AnthropicProvider::new(
        AnthropicConfig {
            base_url: server.uri(),
            ..AnthropicConfig::default()
        },
        Some("sk-ant-test".to_string()),
    )
}

#[tokio::test]
async fn test_openai_completion_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini", "max_tokens": 300})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"segment\": \"deal_seeker\"}"}}],
            "usage": {"prompt_tokens": 42, "completion_tokens": 7}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = openai(&server, Some("sk-test"));
    let completion = provider
        .invoke(
            "gpt-4o-mini",
            &[Message::system("You are an analyst"), Message::user("classify")],
            300,
        )
        .await
        .unwrap();

    assert_eq!(completion.text, r#"{"segment": "deal_seeker"}"#);
    assert_eq!(completion.prompt_tokens, 42);
    assert_eq!(completion.completion_tokens, 7);
    assert_eq!(completion.total_tokens(), 49);
}

#[tokio::test]
async fn test_openai_missing_usage_is_estimated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "12345678"}}]
        })))
        .mount(&server)
        .await;

    let completion = openai(&server, Some("sk-test"))
        .invoke("gpt-4o-mini", &[Message::user("hi")], 10)
        .await
        .unwrap();

    // 8 chars at 4 chars per token
    assert_eq!(completion.completion_tokens, 2);
    assert!(completion.prompt_tokens > 0);
}

#[tokio::test]
async fn test_openai_without_key_never_calls_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = openai(&server, None);
    assert!(!provider.check_health().await);

    let err = provider
        .invoke("gpt-4o-mini", &[Message::user("hi")], 10)
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::AuthenticationFailed(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_http_status_mapping() {
    let cases = [
        (401, "auth"),
        (429, "rate"),
        (503, "server"),
        (400, "invalid"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = openai(&server, Some("sk-test"))
            .invoke("gpt-4o-mini", &[Message::user("hi")], 10)
            .await
            .unwrap_err();

        match (expected, &err) {
            ("auth", LLMError::AuthenticationFailed(_)) => assert!(!err.is_retryable()),
            ("rate", LLMError::RateLimitExceeded) => assert!(err.is_retryable()),
            ("server", LLMError::ServerError(503, _)) => assert!(err.is_retryable()),
            ("invalid", LLMError::InvalidRequest(_)) => assert!(!err.is_retryable()),
            _ => panic!("status {} mapped to {:?}", status, err),
        }
    }
}

#[tokio::test]
async fn test_provider_error_converts_to_engine_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = openai(&server, Some("sk-test"))
        .invoke("gpt-4o-mini", &[Message::user("hi")], 10)
        .await
        .unwrap_err()
        .into_engine_error("openai");

    match err {
        EngineError::Provider {
            provider,
            message,
            retryable,
        } => {
            assert_eq!(provider, "openai");
            assert!(message.contains("overloaded"));
            assert!(retryable);
        }
        other => panic!("expected provider error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_anthropic_moves_system_prompt_out_of_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "system": "You are a strategist",
            "messages": [{"role": "user", "content": "plan it"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "Part one. "}, {"type": "text", "text": "Part two."}],
            "usage": {"input_tokens": 20, "output_tokens": 6}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let completion = anthropic(&server)
        .invoke(
            "claude-3-5-sonnet-20241022",
            &[Message::system("You are a strategist"), Message::user("plan it")],
            256,
        )
        .await
        .unwrap();

    assert_eq!(completion.text, "Part one. Part two.");
    assert_eq!(completion.prompt_tokens, 20);
    assert_eq!(completion.completion_tokens, 6);
}

#[tokio::test]
async fn test_anthropic_rejects_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
        .mount(&server)
        .await;

    let err = anthropic(&server)
        .invoke("claude-3-5-sonnet-20241022", &[Message::user("hi")], 16)
        .await
        .unwrap_err();
    assert!(matches!(err, LLMError::ParseError(_)));
}

#[tokio::test]
async fn test_ollama_chat_and_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.1:8b",
            "stream": false,
            "options": {"num_predict": 128}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "deal_seeker"},
            "prompt_eval_count": 31,
            "eval_count": 3
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b");
    assert!(provider.check_health().await);
    assert!(provider.is_local());
    assert_eq!(provider.estimated_cost(1000, 1000), 0.0);

    let completion = provider
        .invoke("llama3.1:8b", &[Message::user("classify")], 128)
        .await
        .unwrap();
    assert_eq!(completion.text, "deal_seeker");
    assert_eq!(completion.total_tokens(), 34);
}

#[tokio::test]
async fn test_ollama_unreachable() {
    // Port 9 (discard) is closed on test machines
    let provider = OllamaProvider::new("http://127.0.0.1:9", "llama3.1:8b");
    assert!(!provider.check_health().await);

    let err = provider
        .invoke("llama3.1:8b", &[Message::user("hi")], 8)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_openai_embedder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(json!({
            "model": "text-embedding-3-small",
            "input": "deal seekers love coupons"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [0.5, -0.25, 0.0]}]
        })))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(
        server.uri(),
        "text-embedding-3-small",
        Some("sk-test".to_string()),
    );
    assert_eq!(embedder.name(), "openai");

    let vector = embedder.embed("deal seekers love coupons").await.unwrap();
    assert_eq!(vector, vec![0.5, -0.25, 0.0]);
}

#[tokio::test]
async fn test_openai_embedder_failure_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(server.uri(), "text-embedding-3-small", Some("k".into()));
    let err = embedder.embed("anything").await.unwrap_err();
    assert!(matches!(err, EngineError::Provider { retryable: true, .. }));
}
