//! DocResearch Common Library
//! 
//! Shared code for the DocResearch crates including:
//! - Configuration management
//! - Error types and handling
//! - LLM client abstraction (judge + generator capabilities)
//! - Embedding client abstraction
//! - Web search client
//! - Database pool for the vector index
//! - Metrics and logging setup

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod websearch;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use llm::{Generator, Judge};
pub use websearch::WebSearch;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chat model
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
