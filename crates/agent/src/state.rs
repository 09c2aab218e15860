//! Per-request pipeline state

use serde::{Deserialize, Serialize};

/// Binary verdict from a grader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    #[default]
    Yes,
    No,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Yes => "yes",
            Grade::No => "no",
        }
    }

    pub fn is_yes(&self) -> bool {
        *self == Grade::Yes
    }

    pub(crate) fn from_verdict(verdict: &str) -> Self {
        if verdict.eq_ignore_ascii_case("yes") {
            Grade::Yes
        } else {
            Grade::No
        }
    }
}

/// Evidence source chosen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    VectorStore,
    WebSearch,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::VectorStore => "vectorstore",
            Route::WebSearch => "websearch",
        }
    }

    pub(crate) fn from_verdict(verdict: &str) -> Self {
        if verdict.eq_ignore_ascii_case("websearch") {
            Route::WebSearch
        } else {
            Route::VectorStore
        }
    }
}

/// Working record for one pipeline run.
///
/// Owned by a single run and never shared, so it carries no locking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// The user's question, used for grading, generation, and web search
    pub question: String,

    /// Keyword-dense rewrite used for vector search and keyword scoring
    pub search_query: Option<String>,

    /// Latest answer, empty until the first generation
    pub generation: String,

    /// Initial routing decision
    pub route_to_web_search: bool,

    /// Question asked for web search explicitly
    pub explicit_web_search_requested: bool,

    /// Outcome of the latest grading pass
    pub web_search_needed: bool,

    /// Current candidate passages, never blank after fusion
    pub documents: Vec<String>,

    pub retrieval_attempts: u32,
    pub generation_attempts: u32,

    pub hallucination_grounded: Grade,
    pub answer_quality: Grade,

    /// Raw candidate count from the vector search
    pub docs_retrieved_total: usize,

    /// A web search stage ran at least once
    pub web_search_triggered: bool,
}

impl PipelineState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// Query for the document index: the rewrite if one exists
    pub fn index_query(&self) -> &str {
        self.search_query.as_deref().unwrap_or(&self.question)
    }

    /// Append web results after the accepted documents, skipping repeats
    pub(crate) fn merge_web_results(&mut self, results: Vec<String>) -> usize {
        let mut added = 0;
        for result in results {
            if result.trim().is_empty() || self.documents.contains(&result) {
                continue;
            }
            self.documents.push(result);
            added += 1;
        }
        added
    }
}
