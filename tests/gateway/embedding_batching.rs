use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mnemo::error::GatewayError;
use mnemo::memory::{EmbeddingGateway, EmbeddingProvider, OpenAiEmbedding};

const MODEL: &str = "Qwen/Qwen3-Embedding-4B";

#[tokio::test]
async fn embedder_batches_into_single_http_request() {
    let server = MockServer::start().await;
    let inputs = ["hello", "world"];

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_json(json!({
            "model": MODEL,
            "input": inputs,
            "encoding_format": "float",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "model": MODEL,
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.4, 0.5, 0.6]},
                {"object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/v1", server.uri());
    let embedder = OpenAiEmbedding::new("siliconflow", &base, Some("test-key"), MODEL, 3);
    let vectors = embedder.embed(&inputs).await.unwrap();

    assert_eq!(vectors, vec![vec![0.1_f32, 0.2, 0.3], vec![0.4_f32, 0.5, 0.6]]);
    server.verify().await;
}

#[tokio::test]
async fn gateway_rejects_vectors_of_the_wrong_size() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [0.1, 0.2]}]
        })))
        .mount(&server)
        .await;

    let base = format!("{}/v1", server.uri());
    let gateway = EmbeddingGateway::new(
        Arc::new(OpenAiEmbedding::new("siliconflow", &base, Some("k"), MODEL, 3)),
        3,
    );
    let err = gateway.embed_one("hello").await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));
}

#[tokio::test]
async fn provider_error_names_the_provider_and_hides_keys() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(
            ResponseTemplate::new(401).set_body_string("invalid api key sk-abcdef1234567890abcdef"),
        )
        .mount(&server)
        .await;

    let base = format!("{}/v1", server.uri());
    let gateway = EmbeddingGateway::new(
        Arc::new(OpenAiEmbedding::new("siliconflow", &base, Some("k"), MODEL, 3)),
        3,
    );
    let err = gateway.embed(&["hello"]).await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("siliconflow"));
    assert!(text.contains("401"));
    assert!(!text.contains("abcdef1234567890"));
}
