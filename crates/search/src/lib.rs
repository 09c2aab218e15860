//! DocResearch retrieval
//!
//! Request-scoped re-ranking of vector search candidates:
//! - Tokenizer/normalizer shared by indexing and querying
//! - BM25 keyword index built over the current candidate set
//! - Min-max score fusion of semantic and keyword signals
//! - pgvector-backed similarity search

pub mod retrieval;

pub use retrieval::{
    rank_by_vector_score, Bm25Index, Bm25Params, FusionRetriever, PgVectorSearch, RankedDocument,
    ScoredCandidate, Tokenizer, VectorSearch, DEFAULT_ALPHA,
};
