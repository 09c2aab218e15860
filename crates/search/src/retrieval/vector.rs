//! Vector similarity search using pgvector
//!
//! The query is embedded and compared against stored chunk embeddings by
//! cosine distance. Scores are reported as `1 - distance`, so higher means
//! more similar.

use super::{ScoredCandidate, VectorSearch};
use docresearch_common::db::DbPool;
use docresearch_common::embeddings::Embedder;
use docresearch_common::errors::{AppError, Result};
use sea_orm::{DbBackend, FromQueryResult, Statement};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Vector search over the chunk table written by ingestion
pub struct PgVectorSearch {
    db: DbPool,
    embedder: Arc<dyn Embedder>,
    table: String,
}

/// Query result row
#[derive(Debug, FromQueryResult)]
struct CandidateRow {
    content: String,
    score: f64,
}

impl PgVectorSearch {
    /// Create a new vector search.
    ///
    /// `table` is interpolated into SQL, so only identifier characters
    /// (and a schema dot) are accepted.
    pub fn new(db: DbPool, embedder: Arc<dyn Embedder>, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(AppError::Configuration {
                message: format!("Invalid chunks table name: {:?}", table),
            });
        }
        Ok(Self { db, embedder, table })
    }

    fn build_query(&self, embedding: &[f32], k: usize) -> Statement {
        let embedding = vector_literal(embedding);
        let sql = format!(
            r#"
            SELECT
                content,
                1 - (embedding <=> '{embedding}'::vector) AS score
            FROM {table}
            ORDER BY embedding <=> '{embedding}'::vector
            LIMIT $1
            "#,
            embedding = embedding,
            table = self.table,
        );

        Statement::from_sql_and_values(DbBackend::Postgres, &sql, vec![(k as i64).into()])
    }
}

#[async_trait::async_trait]
impl VectorSearch for PgVectorSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredCandidate>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        if embedding.len() != self.embedder.dimension() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "Expected {} dimensions, got {}",
                    self.embedder.dimension(),
                    embedding.len()
                ),
            });
        }

        let started = Instant::now();
        let rows = CandidateRow::find_by_statement(self.build_query(&embedding, k))
            .all(self.db.read())
            .await?;

        debug!(
            results = rows.len(),
            k,
            duration_ms = started.elapsed().as_millis() as u64,
            "Vector search complete"
        );

        Ok(rows
            .into_iter()
            .map(|row| ScoredCandidate {
                text: row.content,
                score: row.score,
            })
            .collect())
    }
}

/// Format an embedding as a pgvector literal
fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
