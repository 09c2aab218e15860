//! Candidate retrieval and re-ranking
//!
//! Vector search produces scored candidates; fusion re-ranks them by
//! blending the vector score with a BM25 score computed over the same
//! candidate set. No keyword index outlives a single fusion call.

mod bm25;
mod fusion;
mod tokenizer;
mod vector;

pub use bm25::{Bm25Index, Bm25Params};
pub use fusion::{rank_by_vector_score, FusionRetriever, DEFAULT_ALPHA};
pub use tokenizer::Tokenizer;
pub use vector::PgVectorSearch;

use docresearch_common::errors::Result;
use serde::{Deserialize, Serialize};

/// Passage returned by vector search, before fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// Passage text
    pub text: String,

    /// Raw similarity score, higher is more relevant
    pub score: f64,
}

impl ScoredCandidate {
    pub fn new(text: impl Into<String>, score: f64) -> Self {
        Self { text: text.into(), score }
    }
}

/// Fusion output entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedDocument {
    /// Position in the blank-filtered input
    pub index: usize,

    /// Fused score in [0, 1]
    pub score: f64,
}

/// Similarity search over the document index
#[async_trait::async_trait]
pub trait VectorSearch: Send + Sync {
    /// Return up to `k` candidates for `query`, best first
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredCandidate>>;
}
