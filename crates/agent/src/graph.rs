//! Pipeline stages and the transition function between them
//!
//! ```text
//! Routing ──> Retrieving ───┐
//!    │                      v
//!    └──> WebSearching ──> GradingDocuments ──> Generating ──> CheckingGrounding
//!              ^                 │                  ^                 │
//!              └─────────────────┘                  │                 v
//!                                                   └─────────── CheckingQuality ──> Done
//! ```
//!
//! Transitions read only the pipeline state and the attempt ceilings, so
//! they are tested without any model or search calls.

use crate::state::PipelineState;
use docresearch_common::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One step of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Routing,
    Retrieving,
    WebSearching,
    GradingDocuments,
    Generating,
    CheckingGrounding,
    CheckingQuality,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Routing => "routing",
            Stage::Retrieving => "retrieving",
            Stage::WebSearching => "web_searching",
            Stage::GradingDocuments => "grading_documents",
            Stage::Generating => "generating",
            Stage::CheckingGrounding => "checking_grounding",
            Stage::CheckingQuality => "checking_quality",
            Stage::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == Stage::Done
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits and switches that shape a pipeline run
#[derive(Debug, Clone)]
pub struct PipelinePolicy {
    /// Candidates requested from vector search
    pub top_k: usize,

    /// Vector weight for fusion
    pub alpha: f64,

    /// Relevant documents needed to skip web search
    pub relevance_threshold: usize,

    /// Grading passes allowed before generation is forced
    pub max_retrieval_attempts: u32,

    /// Generations allowed before the latest answer is accepted
    pub max_generation_attempts: u32,

    /// Timeout applied to each external call
    pub call_timeout: Duration,

    /// Hard ceiling on executed stages
    pub max_steps: usize,

    /// Wall-clock budget for a whole run
    pub max_run: Duration,

    /// Regenerate when the answer is not grounded, not only when it is unhelpful
    pub regenerate_on_ungrounded: bool,

    /// Lowercase phrases that request a web search explicitly
    pub web_search_phrases: Vec<String>,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelinePolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            top_k: config.top_k,
            alpha: config.alpha,
            relevance_threshold: config.relevance_threshold,
            max_retrieval_attempts: config.max_retrieval_attempts,
            max_generation_attempts: config.max_generation_attempts,
            call_timeout: config.call_timeout(),
            max_steps: config.max_steps,
            max_run: config.max_run(),
            regenerate_on_ungrounded: config.regenerate_on_ungrounded,
            web_search_phrases: config
                .web_search_phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

impl PipelinePolicy {
    /// First explicit web-search phrase contained in `question`
    pub fn explicit_web_search_phrase(&self, question: &str) -> Option<&str> {
        let lowered = question.to_lowercase();
        self.web_search_phrases
            .iter()
            .find(|phrase| lowered.contains(phrase.as_str()))
            .map(String::as_str)
    }

    /// Whether the latest verdicts call for another generation
    pub fn wants_regeneration(&self, state: &PipelineState) -> bool {
        !state.answer_quality.is_yes()
            || (self.regenerate_on_ungrounded && !state.hallucination_grounded.is_yes())
    }
}

/// Stage that follows `stage` given the state it left behind
pub fn next_stage(stage: Stage, state: &PipelineState, policy: &PipelinePolicy) -> Stage {
    match stage {
        Stage::Routing => {
            if state.route_to_web_search {
                Stage::WebSearching
            } else {
                Stage::Retrieving
            }
        }
        Stage::Retrieving | Stage::WebSearching => Stage::GradingDocuments,
        Stage::GradingDocuments => {
            if state.web_search_needed && state.retrieval_attempts < policy.max_retrieval_attempts {
                Stage::WebSearching
            } else {
                Stage::Generating
            }
        }
        Stage::Generating => Stage::CheckingGrounding,
        Stage::CheckingGrounding => Stage::CheckingQuality,
        Stage::CheckingQuality => {
            if policy.wants_regeneration(state)
                && state.generation_attempts < policy.max_generation_attempts
            {
                Stage::Generating
            } else {
                Stage::Done
            }
        }
        Stage::Done => Stage::Done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Grade;

    fn policy() -> PipelinePolicy {
        PipelinePolicy::default()
    }

    #[test]
    fn test_routing_branches() {
        let mut state = PipelineState::new("q");
        assert_eq!(next_stage(Stage::Routing, &state, &policy()), Stage::Retrieving);

        state.route_to_web_search = true;
        assert_eq!(next_stage(Stage::Routing, &state, &policy()), Stage::WebSearching);
    }

    #[test]
    fn test_retrieval_escalation_is_bounded() {
        let mut state = PipelineState::new("q");
        state.web_search_needed = true;

        state.retrieval_attempts = 1;
        assert_eq!(next_stage(Stage::GradingDocuments, &state, &policy()), Stage::WebSearching);

        state.retrieval_attempts = 2;
        assert_eq!(next_stage(Stage::GradingDocuments, &state, &policy()), Stage::Generating);

        state.retrieval_attempts = 1;
        state.web_search_needed = false;
        assert_eq!(next_stage(Stage::GradingDocuments, &state, &policy()), Stage::Generating);
    }

    #[test]
    fn test_quality_gates_regeneration() {
        let mut state = PipelineState::new("q");
        state.generation_attempts = 1;
        assert_eq!(next_stage(Stage::CheckingQuality, &state, &policy()), Stage::Done);

        state.answer_quality = Grade::No;
        assert_eq!(next_stage(Stage::CheckingQuality, &state, &policy()), Stage::Generating);

        state.generation_attempts = 3;
        assert_eq!(next_stage(Stage::CheckingQuality, &state, &policy()), Stage::Done);
    }

    #[test]
    fn test_ungrounded_answer_accepted_by_default() {
        let mut state = PipelineState::new("q");
        state.generation_attempts = 1;
        state.hallucination_grounded = Grade::No;
        assert_eq!(next_stage(Stage::CheckingQuality, &state, &policy()), Stage::Done);

        let strict = PipelinePolicy {
            regenerate_on_ungrounded: true,
            ..policy()
        };
        assert_eq!(next_stage(Stage::CheckingQuality, &state, &strict), Stage::Generating);

        state.generation_attempts = 3;
        assert_eq!(next_stage(Stage::CheckingQuality, &state, &strict), Stage::Done);
    }

    #[test]
    fn test_linear_edges() {
        let state = PipelineState::new("q");
        let p = policy();
        assert_eq!(next_stage(Stage::Retrieving, &state, &p), Stage::GradingDocuments);
        assert_eq!(next_stage(Stage::WebSearching, &state, &p), Stage::GradingDocuments);
        assert_eq!(next_stage(Stage::Generating, &state, &p), Stage::CheckingGrounding);
        assert_eq!(next_stage(Stage::CheckingGrounding, &state, &p), Stage::CheckingQuality);
        assert_eq!(next_stage(Stage::Done, &state, &p), Stage::Done);
    }

    #[test]
    fn test_explicit_phrase_detection() {
        let p = policy();
        assert_eq!(
            p.explicit_web_search_phrase("Check my notes and ALSO SEARCH for news"),
            Some("also search")
        );
        assert_eq!(p.explicit_web_search_phrase("what is in my resume?"), None);
    }
}
