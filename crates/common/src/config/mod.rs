//! Configuration management for DocResearch services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenRouter chat endpoint base
pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// OpenAI chat endpoint base
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Vector index database configuration
    pub database: DatabaseConfig,

    /// Chat model configuration (judge + generator)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// External web search configuration
    #[serde(default)]
    pub web_search: WebSearchConfig,

    /// Agent pipeline policy
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Keyword tokenizer configuration
    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Table holding embedded chunks (`content`, `embedding` columns)
    #[serde(default = "default_chunks_table")]
    pub chunks_table: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider: openai, openrouter, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the chat endpoint
    pub api_key: Option<String>,

    /// API base URL override
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Temperature for classification calls
    #[serde(default = "default_judge_temperature")]
    pub judge_temperature: f32,

    /// Temperature for free-text generation
    #[serde(default = "default_generator_temperature")]
    pub generator_temperature: f32,

    /// Maximum output tokens for generation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on transient failures
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service (falls back to the LLM key)
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSearchConfig {
    /// Provider: duckduckgo, disabled
    #[serde(default = "default_web_search_provider")]
    pub provider: String,

    /// Search API endpoint
    #[serde(default = "default_web_search_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_web_search_timeout")]
    pub timeout_secs: u64,

    /// Maximum related-topic snippets folded into the result blob
    #[serde(default = "default_web_search_snippets")]
    pub max_snippets: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Candidates requested from vector search
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Fusion weight of the vector signal (1 - alpha goes to keywords)
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Minimum relevant documents before web search is skipped
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: usize,

    /// Grading passes before generation is forced
    #[serde(default = "default_max_retrieval_attempts")]
    pub max_retrieval_attempts: u32,

    /// Generations before the latest answer is accepted
    #[serde(default = "default_max_generation_attempts")]
    pub max_generation_attempts: u32,

    /// Timeout applied to every external call, in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Hard cap on stage executions per request
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Wall-clock budget for one run, in seconds; an expired run ends with
    /// the answer it has so far
    #[serde(default = "default_max_run")]
    pub max_run_secs: u64,

    /// Regenerate when the grounding check fails, not only on quality failure
    #[serde(default)]
    pub regenerate_on_ungrounded: bool,

    /// Phrases that request a web search in addition to the index
    #[serde(default = "default_web_search_phrases")]
    pub web_search_phrases: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenizerConfig {
    /// Newline-separated file of extra stop words
    pub stop_words_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level / filter directive (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
/// Headroom the HTTP timeout keeps above the pipeline deadline
pub const RUN_DEADLINE_MARGIN_SECS: u64 = 10;

fn default_request_timeout() -> u64 { 180 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_chunks_table() -> String { "chunks".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_model() -> String { crate::DEFAULT_LLM_MODEL.to_string() }
fn default_judge_temperature() -> f32 { 0.0 }
fn default_generator_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> usize { 1000 }
fn default_llm_timeout() -> u64 { 60 }
fn default_llm_retries() -> u32 { 2 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_web_search_provider() -> String { "duckduckgo".to_string() }
fn default_web_search_endpoint() -> String { "https://api.duckduckgo.com/".to_string() }
fn default_web_search_timeout() -> u64 { 15 }
fn default_web_search_snippets() -> usize { 8 }
fn default_top_k() -> usize { 10 }
fn default_alpha() -> f64 { 0.6 }
fn default_relevance_threshold() -> usize { 2 }
fn default_max_retrieval_attempts() -> u32 { 2 }
fn default_max_generation_attempts() -> u32 { 3 }
fn default_call_timeout() -> u64 { 60 }
fn default_max_steps() -> usize { 32 }
fn default_max_run() -> u64 { 150 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "docresearch".to_string() }
fn default_rate_limit() -> u32 { 10 }
fn default_burst() -> u32 { 20 }
fn default_enabled() -> bool { true }

fn default_web_search_phrases() -> Vec<String> {
    [
        "web search",
        "search online",
        "search the web",
        "also search",
        "search the internet",
        "both storage and web",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            model: default_llm_model(),
            judge_temperature: default_judge_temperature(),
            generator_temperature: default_generator_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            provider: default_web_search_provider(),
            endpoint: default_web_search_endpoint(),
            timeout_secs: default_web_search_timeout(),
            max_snippets: default_web_search_snippets(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            alpha: default_alpha(),
            relevance_threshold: default_relevance_threshold(),
            max_retrieval_attempts: default_max_retrieval_attempts(),
            max_generation_attempts: default_max_generation_attempts(),
            call_timeout_secs: default_call_timeout(),
            max_steps: default_max_steps(),
            max_run_secs: default_max_run(),
            regenerate_on_ungrounded: false,
            web_search_phrases: default_web_search_phrases(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl PipelineConfig {
    /// Per-call timeout as Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Whole-run deadline as Duration
    pub fn max_run(&self) -> Duration {
        Duration::from_secs(self.max_run_secs)
    }
}

impl LlmConfig {
    /// Resolve the chat API base URL for the configured provider
    pub fn api_base_url(&self) -> String {
        if let Some(ref base) = self.api_base {
            return base.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "openrouter" => OPENROUTER_API_BASE.to_string(),
            _ => OPENAI_API_BASE.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("database.url", "postgres://localhost/docresearch")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__LLM__MODEL=gpt-4o
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("pipeline.web_search_phrases")
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings that would make the pipeline misbehave.
    ///
    /// Called once at startup; every failure is a configuration error.
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;

        if !(0.0..=1.0).contains(&pipeline.alpha) {
            return Err(AppError::Configuration {
                message: format!("pipeline.alpha must be within [0, 1], got {}", pipeline.alpha),
            });
        }
        if pipeline.top_k == 0 {
            return Err(AppError::Configuration {
                message: "pipeline.top_k must be positive".to_string(),
            });
        }
        if pipeline.max_retrieval_attempts == 0 || pipeline.max_generation_attempts == 0 {
            return Err(AppError::Configuration {
                message: "pipeline attempt ceilings must be positive".to_string(),
            });
        }
        if pipeline.max_steps == 0 {
            return Err(AppError::Configuration {
                message: "pipeline.max_steps must be positive".to_string(),
            });
        }
        if pipeline.call_timeout_secs == 0 || pipeline.max_run_secs == 0 {
            return Err(AppError::Configuration {
                message: "pipeline.call_timeout_secs and pipeline.max_run_secs must be positive".to_string(),
            });
        }
        let required = pipeline.max_run_secs.saturating_add(RUN_DEADLINE_MARGIN_SECS);
        if self.server.request_timeout_secs < required {
            return Err(AppError::Configuration {
                message: format!(
                    "server.request_timeout_secs must be at least {} (pipeline.max_run_secs + {}), got {}",
                    required, RUN_DEADLINE_MARGIN_SECS, self.server.request_timeout_secs
                ),
            });
        }

        let needs_key = |provider: &str| provider != "mock";
        if needs_key(&self.llm.provider) && self.llm.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(AppError::Configuration {
                message: format!("llm.api_key is required for provider '{}'", self.llm.provider),
            });
        }
        if needs_key(&self.embedding.provider) && self.embedding_api_key().is_none() {
            return Err(AppError::Configuration {
                message: "embedding.api_key (or llm.api_key) is required".to_string(),
            });
        }

        Ok(())
    }

    /// Embedding key, falling back to the chat key
    pub fn embedding_api_key(&self) -> Option<String> {
        self.embedding
            .api_key
            .clone()
            .or_else(|| self.llm.api_key.clone())
            .filter(|k| !k.is_empty())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/docresearch".to_string(),
                read_url: None,
                chunks_table: default_chunks_table(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            web_search: WebSearchConfig::default(),
            pipeline: PipelineConfig::default(),
            tokenizer: TokenizerConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".to_string();
        config.embedding.provider = "mock".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.pipeline.top_k, 10);
        assert_eq!(config.pipeline.alpha, 0.6);
        assert_eq!(config.pipeline.relevance_threshold, 2);
        assert_eq!(config.pipeline.max_retrieval_attempts, 2);
        assert_eq!(config.pipeline.max_generation_attempts, 3);
        assert!(!config.pipeline.regenerate_on_ungrounded);
        assert!(config.server.request_timeout_secs >= config.pipeline.max_run_secs + RUN_DEADLINE_MARGIN_SECS);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/docresearch");
    }

    #[test]
    fn test_validate_accepts_mock_providers() {
        assert!(mock_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_alpha_out_of_range() {
        let mut config = mock_config();
        config.pipeline.alpha = 1.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_call_timeout() {
        let mut config = mock_config();
        config.pipeline.call_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_validate_keeps_request_timeout_above_run_deadline() {
        let mut config = mock_config();
        config.pipeline.max_run_secs = 0;
        assert!(config.validate().is_err());

        config.pipeline.max_run_secs = 175;
        config.server.request_timeout_secs = 180;
        assert!(config.validate().is_err());

        config.server.request_timeout_secs = 185;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_llm_key() {
        let mut config = mock_config();
        config.llm.provider = "openai".to_string();
        assert!(config.validate().is_err());

        config.llm.api_key = Some("sk-test".to_string());
        config.embedding.provider = "openai".to_string();
        // embedding falls back to the chat key
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_base_url() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.api_base_url(), OPENAI_API_BASE);
        llm.provider = "openrouter".to_string();
        assert_eq!(llm.api_base_url(), OPENROUTER_API_BASE);
        llm.api_base = Some("http://localhost:11434/v1/".to_string());
        assert_eq!(llm.api_base_url(), "http://localhost:11434/v1");
    }
}
