//! LLM capabilities used by the answering pipeline
//!
//! Two narrow capabilities are exposed as traits so the pipeline can be
//! driven by stubs in tests:
//! - [`Judge`]: categorical classification constrained to a schema
//! - [`Generator`]: free-text completion
//!
//! [`ChatClient`] implements both against any OpenAI-compatible
//! chat-completions endpoint (OpenAI, OpenRouter, local gateways).

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Categorical verdicts over a fixed schema
#[async_trait]
pub trait Judge: Send + Sync {
    /// Classify the prompt into exactly one value of `schema`
    async fn classify(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &[&str],
    ) -> Result<String>;
}

/// Free-text completion
#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete the prompt pair into free text
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct VerdictPayload {
    choice: String,
}

/// OpenAI-compatible chat client
pub struct ChatClient {
    client: reqwest::Client,
    config: LlmConfig,
    endpoint: String,
    api_key: String,
}

impl ChatClient {
    /// Create a new chat client
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: format!("API key required for LLM provider '{}'", config.provider),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let endpoint = format!("{}/chat/completions", config.api_base_url());

        Ok(Self { client, config, endpoint, api_key })
    }

    /// Call the chat endpoint with retry on transient failures
    async fn chat(&self, system_prompt: &str, user_prompt: &str, temperature: f32) -> Result<String> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_elapsed_time: Some(Duration::from_secs(self.config.timeout_secs)),
            ..Default::default()
        };
        let max_retries = self.config.max_retries;
        let mut attempt = 0u32;

        retry(policy, || {
            attempt += 1;
            let current = attempt;
            async move {
                self.call_llm(system_prompt, user_prompt, temperature)
                    .await
                    .map_err(|e| {
                        if current > max_retries || !e.is_transient() {
                            return backoff::Error::permanent(e);
                        }
                        tracing::warn!(
                            attempt = current,
                            max_retries,
                            error = %e,
                            "LLM request failed, retrying"
                        );
                        backoff::Error::transient(e)
                    })
            }
        })
        .await
    }

    async fn call_llm(&self, system_prompt: &str, user_prompt: &str, temperature: f32) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            max_tokens: self.config.max_tokens,
            temperature,
        };

        let response = self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::LlmError {
                message: format!("LLM API request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = format!("LLM API error {}: {}", status, body);
            // Client errors other than throttling will not improve on retry
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(AppError::Configuration { message });
            }
            return Err(AppError::LlmError { message });
        }

        let chat_response: ChatResponse = response.json().await
            .map_err(|e| AppError::LlmError {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".to_string(),
            })
    }
}

#[async_trait]
impl Judge for ChatClient {
    async fn classify(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &[&str],
    ) -> Result<String> {
        let system_prompt = format!(
            "{}\n\nRespond with a JSON object {{\"choice\": <value>}} where <value> is exactly one of: {}.",
            system_prompt,
            schema.join(", ")
        );

        let started = Instant::now();
        let result = self
            .chat(&system_prompt, user_prompt, self.config.judge_temperature)
            .await
            .and_then(|raw| parse_verdict(&raw, schema));
        crate::metrics::record_llm_call("judge", started.elapsed().as_secs_f64(), result.is_ok());
        result
    }
}

#[async_trait]
impl Generator for ChatClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let started = Instant::now();
        let result = self
            .chat(system_prompt, user_prompt, self.config.generator_temperature)
            .await
            .map(|text| text.trim().to_string());
        crate::metrics::record_llm_call("generator", started.elapsed().as_secs_f64(), result.is_ok());
        result
    }
}

/// Extract a schema value from a raw judge reply.
///
/// Accepts the requested JSON shape first, then falls back to the first
/// schema value appearing as a whole word anywhere in the text.
pub fn parse_verdict(raw: &str, schema: &[&str]) -> Result<String> {
    let invalid = || AppError::InvalidVerdict {
        value: raw.chars().take(80).collect(),
        expected: schema.iter().map(|s| s.to_string()).collect(),
    };

    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Ok(payload) = serde_json::from_str::<VerdictPayload>(trimmed) {
        let choice = payload.choice.trim().to_lowercase();
        return schema
            .iter()
            .find(|s| s.eq_ignore_ascii_case(&choice))
            .map(|s| s.to_string())
            .ok_or_else(invalid);
    }

    if schema.is_empty() {
        return Err(invalid());
    }

    let alternation = schema
        .iter()
        .map(|s| regex_lite::escape(s))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = regex_lite::Regex::new(&format!(r"(?i)\b({})\b", alternation))
        .map_err(|e| AppError::Internal {
            message: format!("Invalid verdict pattern: {}", e),
        })?;

    pattern
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .and_then(|m| schema.iter().find(|s| s.eq_ignore_ascii_case(m.as_str())))
        .map(|s| s.to_string())
        .ok_or_else(invalid)
}

/// Offline stand-in for development without an API key.
///
/// Classification always picks the first schema value; completion echoes
/// the question from the prompt.
pub struct MockLlm;

#[async_trait]
impl Judge for MockLlm {
    async fn classify(&self, _system: &str, _user: &str, schema: &[&str]) -> Result<String> {
        schema
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Internal {
                message: "Empty classification schema".to_string(),
            })
    }
}

#[async_trait]
impl Generator for MockLlm {
    async fn complete(&self, _system: &str, user_prompt: &str) -> Result<String> {
        let question = user_prompt
            .lines()
            .find_map(|line| line.strip_prefix("Question:"))
            .map(str::trim)
            .unwrap_or(user_prompt.trim());
        Ok(format!(
            "Based on the provided context, here is an answer about {}. \
            [Mock response - LLM API key not configured]",
            question
        ))
    }
}

/// Judge and generator handles built from configuration
pub struct LlmClients {
    pub judge: Arc<dyn Judge>,
    pub generator: Arc<dyn Generator>,
}

/// Create the judge and generator for the configured provider
pub fn create_llm_clients(config: &LlmConfig) -> Result<LlmClients> {
    match config.provider.as_str() {
        "openai" | "openrouter" => {
            let client = Arc::new(ChatClient::new(config.clone())?);
            Ok(LlmClients {
                judge: client.clone(),
                generator: client,
            })
        }
        "mock" => {
            tracing::warn!("Using mock LLM provider");
            let client = Arc::new(MockLlm);
            Ok(LlmClients {
                judge: client.clone(),
                generator: client,
            })
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown LLM provider: {}", other),
        }),
    }
}
