//! LLM API HTTP Client
//!
//! Sends exactly one completion request per prompt. Failures never reach the
//! caller as errors: [`CompletionClient::complete`] substitutes the configured
//! fallback reply and reports what went wrong in [`CompletionOutcome`].

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, info, warn};

use crate::config::{Config, LlmProvider};
use crate::error::{Error, Result};

use super::types::*;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CLAUDE_MAX_TOKENS: u64 = 1024;

/// Result of asking the model for a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Text generated by the model
    Generated(String),
    /// The call failed; `text` is the fallback reply
    Fallback { text: String, error: String },
}

impl CompletionOutcome {
    /// Reply text, generated or fallback
    pub fn text(&self) -> &str {
        match self {
            CompletionOutcome::Generated(text) => text,
            CompletionOutcome::Fallback { text, .. } => text,
        }
    }

    /// Whether the fallback reply was substituted
    pub fn is_fallback(&self) -> bool {
        matches!(self, CompletionOutcome::Fallback { .. })
    }
}

/// Something that turns a prompt into reply text
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Produce reply text for `prompt`. Never fails.
    async fn complete(&self, prompt: &str) -> CompletionOutcome;
}

/// LLM API client (supports OpenAI-compatible APIs and Claude)
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    provider: LlmProvider,
    system_prompt: String,
    fallback_reply: String,
}

impl LlmClient {
    /// Create a new LLM client
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().build().map_err(Error::Http)?;

        let llm_config = config.llm_config();

        Ok(Self {
            client,
            api_key: llm_config.api_key.clone(),
            model: llm_config.model.clone(),
            base_url: llm_config.effective_base_url().trim_end_matches('/').to_string(),
            provider: llm_config.provider.clone(),
            system_prompt: llm_config.system_prompt.clone(),
            fallback_reply: llm_config.fallback_reply.clone(),
        })
    }

    /// Create with custom base URL (for testing or custom endpoints)
    pub fn with_base_url(config: &Config, base_url: impl Into<String>) -> Result<Self> {
        let mut client = Self::new(config)?;
        client.base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(client)
    }

    /// Ask the model for a reply, propagating any failure
    pub async fn chat(&self, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAi => self.send_openai_request(prompt).await,
            LlmProvider::Claude => self.send_claude_request(prompt).await,
        }
    }

    /// Send request to an OpenAI-compatible API
    async fn send_openai_request(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!("Sending request to OpenAI-compatible API: {}", url);

        let request = ChatCompletionRequest::two_turn(&self.model, &self.system_prompt, prompt);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!("OpenAI API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LlmApi(format!("Failed to parse response: {} - {}", e, body)))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "OpenAI usage: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        parsed
            .first_text()
            .map(str::to_string)
            .ok_or(Error::EmptyCompletion)
    }

    /// Send request to the Claude Messages API
    async fn send_claude_request(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/messages", self.base_url);

        debug!("Sending request to Claude API: {}", url);

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: CLAUDE_MAX_TOKENS,
            system: self.system_prompt.clone(),
            messages: vec![ChatMessage::user(prompt)],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!("Claude API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LlmApi(format!("Failed to parse response: {} - {}", e, body)))?;

        debug!("Claude API response: stop_reason={:?}", parsed.stop_reason);

        parsed
            .first_text()
            .map(str::to_string)
            .ok_or(Error::EmptyCompletion)
    }

    /// Get the model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the provider type
    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    /// Reply used when the API call fails
    pub fn fallback_reply(&self) -> &str {
        &self.fallback_reply
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn complete(&self, prompt: &str) -> CompletionOutcome {
        match self.chat(prompt).await {
            Ok(text) => {
                info!("AI response: {}", text);
                CompletionOutcome::Generated(text)
            }
            Err(e) => {
                error!("Error getting AI response: {}", e);
                CompletionOutcome::Fallback {
                    text: self.fallback_reply.clone(),
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, http::HeaderMap, http::StatusCode, routing::post};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(HeaderMap, Value)>>>;

    async fn record(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) {
        seen.lock().unwrap().push((headers, body));
    }

    async fn fake_openai(state: State<Seen>, headers: HeaderMap, body: Json<Value>) -> Json<Value> {
        record(state, headers, body).await;
        Json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1}
        }))
    }

    async fn fake_claude(state: State<Seen>, headers: HeaderMap, body: Json<Value>) -> Json<Value> {
        record(state, headers, body).await;
        Json(json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": "bonjour"}],
            "stop_reason": "end_turn"
        }))
    }

    async fn fake_overloaded() -> (StatusCode, Json<Value>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"message": "overloaded"}})),
        )
    }

    async fn fake_no_choices() -> Json<Value> {
        Json(json!({"id": "chatcmpl-empty", "choices": []}))
    }

    /// Serve fake providers on an ephemeral port; returns the base URL
    async fn spawn_provider(seen: Seen) -> String {
        let app = Router::new()
            .route("/ok/v1/chat/completions", post(fake_openai))
            .route("/claude/v1/messages", post(fake_claude))
            .route("/broken/v1/chat/completions", post(fake_overloaded))
            .route("/empty/v1/chat/completions", post(fake_no_choices))
            .with_state(seen);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_openai_request_shape() {
        let seen = Seen::default();
        let base = spawn_provider(seen.clone()).await;
        let client = LlmClient::with_base_url(&test_config(), format!("{}/ok/v1", base)).unwrap();

        let outcome = client.complete("hi").await;
        assert_eq!(outcome, CompletionOutcome::Generated("hello".to_string()));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (headers, body) = &seen[0];
        assert_eq!(headers["authorization"], "Bearer sk-test");
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
    }

    #[tokio::test]
    async fn test_claude_request_shape() {
        let seen = Seen::default();
        let base = spawn_provider(seen.clone()).await;
        let mut config = test_config();
        config.llm.api_key = "sk-ant".to_string();
        config.llm.provider = LlmProvider::Claude;
        config.llm.model = "claude-3-5-haiku-latest".to_string();
        let client = LlmClient::with_base_url(&config, format!("{}/claude/v1", base)).unwrap();

        let outcome = client.complete("hi").await;
        assert_eq!(outcome, CompletionOutcome::Generated("bonjour".to_string()));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (headers, body) = &seen[0];
        assert_eq!(headers["x-api-key"], "sk-ant");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
        assert!(headers.get("authorization").is_none());
        assert_eq!(body["model"], "claude-3-5-haiku-latest");
        assert_eq!(body["max_tokens"], CLAUDE_MAX_TOKENS);
        assert_eq!(body["system"], config.llm.system_prompt.as_str());
        assert_eq!(body["messages"], json!([{"role": "user", "content": "hi"}]));
    }

    #[tokio::test]
    async fn test_error_status_returns_fallback() {
        let base = spawn_provider(Seen::default()).await;
        let client = LlmClient::with_base_url(&test_config(), format!("{}/broken/v1", base)).unwrap();

        match client.chat("hi").await {
            Err(Error::LlmApi(message)) => {
                assert!(message.contains("500"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("expected LlmApi error, got {:?}", other),
        }

        let outcome = client.complete("hi").await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.text(), client.fallback_reply());
    }

    #[tokio::test]
    async fn test_empty_choices_return_fallback() {
        let base = spawn_provider(Seen::default()).await;
        let client = LlmClient::with_base_url(&test_config(), format!("{}/empty/v1", base)).unwrap();

        assert!(matches!(client.chat("hi").await, Err(Error::EmptyCompletion)));

        let outcome = client.complete("hi").await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.text(), client.fallback_reply());
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.llm.api_key = "sk-test".to_string();
        config
    }

    #[test]
    fn test_client_uses_config() {
        let client = LlmClient::new(&test_config()).unwrap();
        assert_eq!(client.model(), "gpt-3.5-turbo");
        assert_eq!(client.provider(), &LlmProvider::OpenAi);
        assert_eq!(client.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_with_base_url_trims_trailing_slash() {
        let client = LlmClient::with_base_url(&test_config(), "http://localhost:1234/v1/").unwrap();
        assert_eq!(client.base_url, "http://localhost:1234/v1");
    }

    #[test]
    fn test_outcome_text() {
        let generated = CompletionOutcome::Generated("hello".to_string());
        assert_eq!(generated.text(), "hello");
        assert!(!generated.is_fallback());

        let fallback = CompletionOutcome::Fallback {
            text: "sorry".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(fallback.text(), "sorry");
        assert!(fallback.is_fallback());
    }

    #[tokio::test]
    async fn test_transport_failure_returns_fallback() {
        // Nothing listens on port 1; the connection is refused.
        let client = LlmClient::with_base_url(&test_config(), "http://127.0.0.1:1/v1").unwrap();

        let outcome = client.complete("hi").await;

        match outcome {
            CompletionOutcome::Fallback { text, error } => {
                assert_eq!(text, client.fallback_reply());
                assert!(!error.is_empty());
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_propagates_transport_failure() {
        let client = LlmClient::with_base_url(&test_config(), "http://127.0.0.1:1/v1").unwrap();
        let result = client.chat("hi").await;
        assert!(matches!(result, Err(Error::Http(_))));
    }
}
