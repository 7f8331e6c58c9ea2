use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_config(api_url: &str, api_key: &str) -> LlmConfig {
    LlmConfig {
        api_url: api_url.to_string(),
        api_key: api_key.to_string(),
        generation_model: "test-gen".to_string(),
        embedding_model: "test-embed".to_string(),
        embedding_size: 4,
        max_input_characters: 64,
        max_output_tokens: 50,
        temperature: 0.1,
        timeout_secs: 5,
    }
}

fn create_test_client(api_url: &str) -> OpenAiCompatClient {
    OpenAiCompatClient::new(&create_test_config(api_url, "")).expect("should build client")
}

#[test]
fn input_is_trimmed_and_capped() {
    let client = create_test_client("http://localhost:9/v1");

    assert_eq!(client.process_text("  hello  "), "hello");

    let long = "x".repeat(200);
    assert_eq!(client.process_text(&long).len(), 64);

    // Capping counts characters, not bytes.
    let multibyte = "é".repeat(200);
    let processed = client.process_text(&multibyte);
    assert_eq!(processed.chars().count(), 64);
}

#[test]
fn endpoints_keep_the_base_path() {
    let client = create_test_client("http://localhost:11434/v1");

    let url = client.endpoint("embeddings").expect("should build URL");
    assert_eq!(url.as_str(), "http://localhost:11434/v1/embeddings");

    let url = client
        .endpoint("chat/completions")
        .expect("should build URL");
    assert_eq!(url.as_str(), "http://localhost:11434/v1/chat/completions");
}

#[test]
fn construct_prompt_tags_the_role() {
    let client = create_test_client("http://localhost:9/v1");
    let message = client.construct_prompt("  system text ", ChatRole::System);

    assert_eq!(message.role, ChatRole::System);
    assert_eq!(message.content, "system text");
}

#[tokio::test]
async fn embed_text_returns_the_vector() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(json!({ "model": "test-embed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3, 0.4] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let vector = client
        .embed_text("some chunk", EmbeddingMode::Document)
        .await
        .expect("should embed");

    assert_eq!(vector, vec![0.1, 0.2, 0.3, 0.4]);
    assert_eq!(client.embedding_size(), 4);
}

#[tokio::test]
async fn embed_text_rejects_wrong_dimension() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.1, 0.2] }]
        })))
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let err = client
        .embed_text("some chunk", EmbeddingMode::Query)
        .await
        .expect_err("wrong dimension should fail");

    assert!(matches!(err, RagError::Embedding(_)));
}

#[tokio::test]
async fn embed_text_rejects_empty_data() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    assert!(
        client
            .embed_text("some chunk", EmbeddingMode::Document)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn bearer_header_is_sent_when_key_is_set() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", "Bearer secret-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [1.0, 0.0, 0.0, 0.0] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), "secret-key");
    let client = OpenAiCompatClient::new(&config).expect("should build client");

    client
        .embed_text("text", EmbeddingMode::Document)
        .await
        .expect("should embed with auth");
}

#[tokio::test]
async fn generate_text_appends_the_user_turn() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "test-gen",
            "messages": [
                { "role": "system", "content": "be helpful" },
                { "role": "user", "content": "the prompt" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "the answer" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let history = vec![ChatMessage {
        role: ChatRole::System,
        content: "be helpful".to_string(),
    }];

    let answer = client
        .generate_text("the prompt", &history)
        .await
        .expect("should generate");

    assert_eq!(answer, "the answer");
}

#[tokio::test]
async fn generate_text_fails_on_empty_choices() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let err = client
        .generate_text("the prompt", &[])
        .await
        .expect_err("empty choices should fail");

    assert!(matches!(err, RagError::Generation(_)));
}

#[tokio::test]
async fn generation_http_errors_propagate() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = create_test_client(&server.uri());
    let err = client
        .generate_text("the prompt", &[])
        .await
        .expect_err("server error should fail");

    assert!(matches!(err, RagError::Generation(_)));
}
