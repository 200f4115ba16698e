//! Chat LLM provider abstraction with a shared retry policy.
//!
//! Defines the [`LlmClient`] trait and two providers:
//! - **[`OllamaLlm`]** — local Ollama `/api/chat`.
//! - **[`OpenAiLlm`]** — hosted OpenAI-compatible chat completions.
//!
//! # Retry Strategy
//!
//! Both providers share [`send_with_retry`]:
//! - HTTP 429 → sleep for the `Retry-After` header if parseable, else the
//!   configured delay, then retry.
//! - 5xx or transport error → retry after the configured delay.
//! - Other 4xx → [`LlmError::BadRequest`] immediately, no retry.
//! - Attempts are bounded by `llm.max_retries`.
//!
//! Health checks run at startup only: Ollama is probed for liveness and
//! model presence; hosted providers are assumed reachable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, LlmConfig, ProviderConfig};

/// Errors surfaced by LLM providers.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("LLM rate limited after {0} attempts")]
    RateLimited(u32),
    #[error("LLM rejected request: {0}")]
    BadRequest(String),
    #[error("malformed LLM response: {0}")]
    MalformedResponse(String),
    #[error("LLM API error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

/// Chat-style completion: `(system_prompt, user_prompt) → text`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;

    /// Startup-only liveness probe.
    async fn health_check(&self) -> Result<(), LlmError>;
}

/// Instantiate the chat provider named in the configuration.
pub fn create_llm(config: &Config) -> anyhow::Result<Box<dyn LlmClient>> {
    let provider = config.llm.provider.as_str();
    let provider_cfg = config
        .llm
        .providers
        .get(provider)
        .ok_or_else(|| anyhow::anyhow!("[llm.providers.{}] section missing", provider))?;
    match provider {
        "ollama" => Ok(Box::new(OllamaLlm::new(&config.llm, provider_cfg)?)),
        "openai" => Ok(Box::new(OpenAiLlm::new(&config.llm, provider_cfg)?)),
        other => anyhow::bail!("Unknown LLM provider: {}", other),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Retry/backoff policy shared by both providers.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl RetryPolicy {
    fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            delay: Duration::from_secs(cfg.retry_delay_secs),
        }
    }
}

/// Send a request (rebuilt by `build` on each attempt) under the shared
/// retry ladder, returning the successful response body text.
async fn send_with_retry<F>(policy: RetryPolicy, build: F) -> Result<String, LlmError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err: Option<LlmError> = None;

    for attempt in 0..policy.max_retries {
        if attempt > 0 {
            debug!(attempt, "retrying LLM request");
        }
        match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return resp.text().await.map_err(LlmError::from);
                }
                if status.as_u16() == 429 {
                    let delay = resp
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or(policy.delay);
                    warn!(attempt, delay_secs = delay.as_secs(), "rate limited, backing off");
                    last_err = Some(LlmError::RateLimited(attempt + 1));
                    tokio::time::sleep(delay).await;
                    continue;
                }
                if status.is_server_error() {
                    let body = resp.text().await.unwrap_or_default();
                    warn!(attempt, %status, "server error, retrying");
                    last_err = Some(LlmError::Api(format!("{}: {}", status, body)));
                    tokio::time::sleep(policy.delay).await;
                    continue;
                }
                // Other 4xx: surface immediately
                let body = resp.text().await.unwrap_or_default();
                return Err(LlmError::BadRequest(format!("{}: {}", status, body)));
            }
            Err(err) => {
                warn!(attempt, error = %err, "transport error, retrying");
                last_err = Some(LlmError::from(err));
                tokio::time::sleep(policy.delay).await;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| LlmError::Transport("all retries failed".to_string())))
}

fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

// ============ Ollama ============

/// Chat provider backed by a local Ollama instance.
pub struct OllamaLlm {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    policy: RetryPolicy,
}

impl OllamaLlm {
    pub fn new(llm: &LlmConfig, provider: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(llm.timeout_secs)?,
            endpoint: provider.endpoint.clone(),
            model: provider.model.clone(),
            policy: RetryPolicy::from_config(llm),
        })
    }

    fn base_url(&self) -> &str {
        self.endpoint
            .strip_suffix("/api/chat")
            .or_else(|| self.endpoint.strip_suffix("/chat"))
            .unwrap_or(&self.endpoint)
    }
}

#[async_trait]
impl LlmClient for OllamaLlm {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage>,
            stream: bool,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            #[serde(default)]
            message: Option<ChatMessage>,
            #[serde(default)]
            error: String,
        }

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            stream: false,
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let text = send_with_retry(self.policy, || {
            self.client.post(&self.endpoint).json(&body)
        })
        .await?;

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
        if !parsed.error.is_empty() {
            return Err(LlmError::Api(parsed.error));
        }
        parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| LlmError::MalformedResponse("missing message in response".to_string()))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let base = self.base_url();

        // Liveness: list installed models
        let tags = self
            .client
            .get(format!("{}/api/tags", base))
            .send()
            .await?;
        if !tags.status().is_success() {
            return Err(LlmError::Api(format!(
                "Ollama health check failed with status {}",
                tags.status()
            )));
        }

        // Model presence
        let show = self
            .client
            .post(format!("{}/api/show", base))
            .json(&serde_json::json!({ "name": self.model }))
            .send()
            .await?;
        if show.status().as_u16() == 404 {
            return Err(LlmError::Api(format!(
                "model '{}' not found in Ollama, run: ollama pull {}",
                self.model, self.model
            )));
        }
        debug!(model = %self.model, "Ollama health check passed");
        Ok(())
    }
}

// ============ OpenAI-compatible ============

/// Chat provider for hosted OpenAI-compatible endpoints.
pub struct OpenAiLlm {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f64,
    policy: RetryPolicy,
}

impl OpenAiLlm {
    pub fn new(llm: &LlmConfig, provider: &ProviderConfig) -> anyhow::Result<Self> {
        if provider.api_key.is_empty() || provider.api_key.starts_with("${") {
            anyhow::bail!(
                "OpenAI API key not configured; set the OPENAI_API_KEY environment variable"
            );
        }
        Ok(Self {
            client: http_client(llm.timeout_secs)?,
            endpoint: provider.endpoint.clone(),
            model: provider.model.clone(),
            api_key: provider.api_key.clone(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            policy: RetryPolicy::from_config(llm),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiLlm {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let text = send_with_retry(self.policy, || {
            self.client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await?;

        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        if let Some(message) = parsed.get("error").and_then(|e| e.get("message")) {
            return Err(LlmError::Api(
                message.as_str().unwrap_or("unknown error").to_string(),
            ));
        }

        parsed
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|choice| choice.pointer("/message/content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::MalformedResponse("no choices in response".to_string()))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        // Hosted providers rate-limit trivial probes; the first real call
        // surfaces configuration problems soon enough.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_base_url_strips_chat_suffix() {
        let cfg = LlmConfig {
            provider: "ollama".to_string(),
            timeout_secs: 1,
            max_tokens: 16,
            temperature: 0.0,
            inference_batch_size: 1,
            llm_concurrency: 1,
            max_retries: 1,
            retry_delay_secs: 1,
            providers: Default::default(),
        };
        let provider = ProviderConfig {
            enabled: true,
            endpoint: "http://localhost:11434/api/chat".to_string(),
            model: "llama3".to_string(),
            api_key: String::new(),
        };
        let llm = OllamaLlm::new(&cfg, &provider).unwrap();
        assert_eq!(llm.base_url(), "http://localhost:11434");
    }
}
