//! In-memory BM25 (Okapi) keyword index
//!
//! Built over the candidate set of a single retrieval and dropped with it.
//! Scoring follows the Okapi formulation:
//!
//! ```text
//! idf(t)      = ln((N - n(t) + 0.5) / (n(t) + 0.5))
//! score(d, q) = sum over t in q of idf(t) * tf(t,d) * (k1 + 1)
//!                                 / (tf(t,d) + k1 * (1 - b + b * |d| / avgdl))
//! ```
//!
//! Terms present in more than half the documents get a negative idf; those
//! are floored to `epsilon * mean(idf)` so common terms never subtract.

use super::Tokenizer;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// BM25 tuning parameters
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term frequency saturation
    pub k1: f64,

    /// Length normalization strength
    pub b: f64,

    /// Floor factor for negative idf values
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// Keyword index over one candidate set
#[derive(Debug, Clone)]
pub struct Bm25Index {
    tokenizer: Arc<Tokenizer>,
    params: Bm25Params,
    doc_freqs: Vec<HashMap<String, usize>>,
    doc_len: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    pub fn new(tokenizer: Arc<Tokenizer>) -> Self {
        Self::with_params(tokenizer, Bm25Params::default())
    }

    pub fn with_params(tokenizer: Arc<Tokenizer>, params: Bm25Params) -> Self {
        Self {
            tokenizer,
            params,
            doc_freqs: Vec::new(),
            doc_len: Vec::new(),
            avgdl: 0.0,
            idf: HashMap::new(),
        }
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.doc_len.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_len.is_empty()
    }

    /// Index `documents`, replacing any previous contents.
    ///
    /// An empty slice leaves the index empty. Documents that tokenize to
    /// nothing are kept (they score zero); if all of them do, length
    /// normalization degenerates to a constant and every score is zero.
    pub fn build<S: AsRef<str>>(&mut self, documents: &[S]) {
        self.doc_freqs.clear();
        self.doc_len.clear();
        self.idf.clear();
        self.avgdl = 0.0;

        if documents.is_empty() {
            warn!("No documents provided to build keyword index");
            return;
        }

        // Ordered so the idf sum, and with it the floor, is reproducible
        let mut doc_count_per_term: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_len = 0usize;
        let mut empty_docs = 0usize;

        for doc in documents {
            let tokens = self.tokenizer.tokenize(doc.as_ref());
            if tokens.is_empty() {
                empty_docs += 1;
            }
            total_len += tokens.len();
            self.doc_len.push(tokens.len());

            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_count_per_term.entry(term.clone()).or_insert(0) += 1;
            }
            self.doc_freqs.push(freqs);
        }

        let n = documents.len();
        if empty_docs == n {
            warn!(
                documents = n,
                preview = %documents[0].as_ref().chars().take(200).collect::<String>(),
                "Every document tokenized to nothing; keyword scores will be uniform"
            );
        } else if empty_docs > 0 {
            warn!(empty = empty_docs, documents = n, "Some documents have no index terms");
        }

        self.avgdl = total_len as f64 / n as f64;
        self.compute_idf(&doc_count_per_term, n);

        info!(
            documents = n,
            terms = self.idf.len(),
            avgdl = self.avgdl,
            "Built keyword index"
        );
    }

    fn compute_idf(&mut self, doc_count_per_term: &BTreeMap<String, usize>, n: usize) {
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();

        for (term, &df) in doc_count_per_term {
            let idf = (n as f64 - df as f64 + 0.5).ln() - (df as f64 + 0.5).ln();
            idf_sum += idf;
            if idf < 0.0 {
                negative.push(term.clone());
            }
            self.idf.insert(term.clone(), idf);
        }

        if self.idf.is_empty() {
            return;
        }

        let floor = self.params.epsilon * idf_sum / self.idf.len() as f64;
        for term in negative {
            self.idf.insert(term, floor);
        }
    }

    /// Score `query` against every indexed document, in index order.
    ///
    /// A query without index terms scores zero everywhere.
    pub fn score(&self, query: &str) -> Vec<f64> {
        let mut scores = vec![0.0; self.len()];
        if self.is_empty() {
            return scores;
        }

        let query_terms = self.tokenizer.tokenize(query);
        if query_terms.is_empty() {
            debug!("Query produced no index terms, returning zero scores");
            return scores;
        }

        let Bm25Params { k1, b, .. } = self.params;

        for term in &query_terms {
            let Some(&idf) = self.idf.get(term) else {
                continue;
            };

            for (i, freqs) in self.doc_freqs.iter().enumerate() {
                let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let length_ratio = if self.avgdl > 0.0 {
                    self.doc_len[i] as f64 / self.avgdl
                } else {
                    1.0
                };
                scores[i] += idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * length_ratio));
            }
        }

        scores
    }
}
