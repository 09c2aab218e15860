//! Min-max score fusion of vector and keyword signals
//!
//! Both signals are rescaled to [0, 1] over the candidate set and blended
//! linearly: `alpha * vector + (1 - alpha) * keyword`.
//!
//! Degenerate sets are handled asymmetrically. Uniform vector scores mean
//! the index judged every candidate equally close, so they normalize to
//! 1.0. Uniform keyword scores almost always mean no term overlap, so they
//! normalize to the neutral 0.5.

use super::{Bm25Index, RankedDocument, ScoredCandidate, Tokenizer};
use docresearch_common::errors::{AppError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default vector weight
pub const DEFAULT_ALPHA: f64 = 0.6;

const UNIFORM_VECTOR_SCORE: f64 = 1.0;
const UNIFORM_KEYWORD_SCORE: f64 = 0.5;

/// Re-ranks vector search candidates with a request-scoped BM25 index
#[derive(Debug, Clone)]
pub struct FusionRetriever {
    tokenizer: Arc<Tokenizer>,
    alpha: f64,
}

impl FusionRetriever {
    pub fn new(tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            tokenizer,
            alpha: DEFAULT_ALPHA,
        }
    }

    /// Set the vector weight, clamped to [0, 1]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = if alpha.is_nan() { DEFAULT_ALPHA } else { alpha.clamp(0.0, 1.0) };
        self
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Fuse scores for `documents` against `query`.
    ///
    /// Blank documents are dropped first; returned indices refer to the
    /// remaining documents in their original relative order. The result is
    /// sorted by fused score descending, ties keeping input order.
    pub fn fuse<S: AsRef<str>>(
        &self,
        documents: &[S],
        vector_scores: &[f64],
        query: &str,
    ) -> Result<Vec<RankedDocument>> {
        let (_, ranked) = self.fuse_filtered(documents, vector_scores, query)?;
        Ok(ranked)
    }

    /// Fuse vector search candidates and return their texts, best first
    pub fn rerank(&self, candidates: &[ScoredCandidate], query: &str) -> Result<Vec<String>> {
        let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let scores: Vec<f64> = candidates.iter().map(|c| c.score).collect();

        let (kept, ranked) = self.fuse_filtered(&texts, &scores, query)?;
        Ok(ranked
            .into_iter()
            .map(|r| kept[r.index].to_string())
            .collect())
    }

    fn fuse_filtered<'a, S: AsRef<str>>(
        &self,
        documents: &'a [S],
        vector_scores: &[f64],
        query: &str,
    ) -> Result<(Vec<&'a str>, Vec<RankedDocument>)> {
        if documents.len() != vector_scores.len() {
            return Err(AppError::Internal {
                message: format!(
                    "Fusion input mismatch: {} documents, {} vector scores",
                    documents.len(),
                    vector_scores.len()
                ),
            });
        }

        let (kept, kept_scores): (Vec<&str>, Vec<f64>) = documents
            .iter()
            .map(|doc| doc.as_ref())
            .zip(vector_scores.iter().copied())
            .filter(|(doc, _)| !doc.trim().is_empty())
            .unzip();

        let dropped = documents.len() - kept.len();
        if dropped > 0 {
            warn!(dropped, "Dropped blank documents before fusion");
            docresearch_common::metrics::record_blank_documents_dropped(dropped);
        }

        if kept.is_empty() {
            debug!("No documents to fuse");
            return Ok((kept, Vec::new()));
        }

        let vector_normalized = min_max(&kept_scores, UNIFORM_VECTOR_SCORE, "vector")?;

        let mut index = Bm25Index::new(self.tokenizer.clone());
        index.build(&kept);
        let keyword_scores = index.score(query);
        let keyword_normalized = min_max(&keyword_scores, UNIFORM_KEYWORD_SCORE, "keyword")?;

        let mut ranked: Vec<RankedDocument> = vector_normalized
            .iter()
            .zip(&keyword_normalized)
            .enumerate()
            .map(|(index, (v, k))| RankedDocument {
                index,
                score: self.alpha * v + (1.0 - self.alpha) * k,
            })
            .collect();

        // sort_by is stable, so equal scores keep input order
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        info!(
            documents = kept.len(),
            alpha = self.alpha,
            top_score = ranked.first().map(|r| r.score),
            "Fused vector and keyword scores"
        );

        Ok((kept, ranked))
    }
}

/// Rescale to [0, 1]; a set with no spread maps entirely to `uniform`
fn min_max(scores: &[f64], uniform: f64, signal: &str) -> Result<Vec<f64>> {
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(AppError::Internal {
            message: format!("Non-finite {} score: {}", signal, bad),
        });
    }

    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if max > min {
        let range = max - min;
        Ok(scores.iter().map(|s| (s - min) / range).collect())
    } else {
        debug!(signal, value = max, normalized = uniform, "Uniform scores");
        Ok(vec![uniform; scores.len()])
    }
}

/// Order candidates by raw vector score alone, blank texts removed.
/// Non-finite scores rank after every finite one.
///
/// Used when fusion cannot be applied to a candidate set.
pub fn rank_by_vector_score(candidates: &[ScoredCandidate]) -> Vec<String> {
    let mut kept: Vec<&ScoredCandidate> = candidates
        .iter()
        .filter(|c| !c.text.trim().is_empty())
        .collect();
    kept.sort_by(|a, b| {
        b.score
            .is_finite()
            .cmp(&a.score.is_finite())
            .then_with(|| b.score.total_cmp(&a.score))
    });
    kept.into_iter().map(|c| c.text.clone()).collect()
}
