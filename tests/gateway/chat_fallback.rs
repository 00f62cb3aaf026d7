use serde::Deserialize;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mnemo::config::{LlmConfig, LlmEndpoint, ReliabilityConfig};
use mnemo::llm::{LanguageModel, ProviderGateway, chat_json};
use mnemo::providers::create_provider_chain;

#[derive(Debug, Default, Deserialize, PartialEq)]
struct Verdict {
    keep: bool,
}

fn endpoint(name: &str, server: &MockServer, key: Option<&str>, model: &str) -> LlmEndpoint {
    LlmEndpoint {
        name: name.into(),
        base_url: server.uri(),
        api_key: key.map(str::to_string),
        model: model.into(),
    }
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

fn fast_reliability() -> ReliabilityConfig {
    ReliabilityConfig {
        provider_retries: 1,
        provider_backoff_ms: 1,
    }
}

#[tokio::test]
async fn auth_failure_falls_back_to_next_endpoint_with_its_model() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        // 4xx is not retried.
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer backup-key"))
        .and(body_partial_json(json!({
            "model": "glm-4.6v",
            "messages": [
                {"role": "system", "content": "Decide."},
                {"role": "user", "content": "Keep it?"}
            ]
        })))
        .respond_with(completion("Sure:\n```json\n{\"keep\": true}\n```"))
        .expect(1)
        .mount(&backup)
        .await;

    let llm_config = LlmConfig {
        providers: vec![
            endpoint("deepseek", &primary, Some("primary-key"), "deepseek-chat"),
            endpoint("openrouter", &primary, None, "unused"),
            endpoint("glm", &backup, Some("backup-key"), "glm-4.6v"),
        ],
        temperature: 0.3,
    };
    let chain = create_provider_chain(&llm_config, &fast_reliability()).unwrap();
    assert_eq!(chain.provider_names(), vec!["deepseek", "glm"]);

    let gateway = ProviderGateway::new(Box::new(chain), "deepseek-chat", 0.3);
    let verdict: Verdict = chat_json(&gateway, "Decide.", "Keep it?", Verdict::default()).await;

    assert_eq!(verdict, Verdict { keep: true });
    primary.verify().await;
    backup.verify().await;
}

#[tokio::test]
async fn server_errors_are_retried_before_giving_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(2)
        .mount(&server)
        .await;

    let llm_config = LlmConfig {
        providers: vec![endpoint("deepseek", &server, Some("k"), "deepseek-chat")],
        temperature: 0.3,
    };
    let chain = create_provider_chain(&llm_config, &fast_reliability()).unwrap();
    let gateway = ProviderGateway::new(Box::new(chain), "deepseek-chat", 0.3);

    let err = gateway.chat("sys", "hi").await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("deepseek"));
    assert!(text.contains("attempt 2/2"));
    server.verify().await;
}

#[tokio::test]
async fn unparsable_reply_yields_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion("I'd rather not answer in JSON."))
        .mount(&server)
        .await;

    let llm_config = LlmConfig {
        providers: vec![endpoint("deepseek", &server, Some("k"), "deepseek-chat")],
        temperature: 0.3,
    };
    let chain = create_provider_chain(&llm_config, &fast_reliability()).unwrap();
    let gateway = ProviderGateway::new(Box::new(chain), "deepseek-chat", 0.3);

    let verdict = chat_json(&gateway, "Decide.", "Keep it?", Verdict { keep: false }).await;
    assert_eq!(verdict, Verdict { keep: false });
}

#[test]
fn chain_requires_a_key() {
    let err = create_provider_chain(&LlmConfig::default(), &fast_reliability()).unwrap_err();
    assert!(err.to_string().contains("No LLM provider configured"));
}
