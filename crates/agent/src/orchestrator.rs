//! Pipeline orchestrator
//!
//! Drives one question through the stage graph, owning the per-request
//! [`PipelineState`]. Every external call runs under the policy timeout,
//! and every failure is replaced by a fail-closed default so a run always
//! reaches `Done`:
//!
//! | call          | on failure                       |
//! |---------------|----------------------------------|
//! | router        | route to the vector store        |
//! | rewrite       | search with the original question|
//! | vector search | no candidates                    |
//! | fusion        | order by raw vector score        |
//! | web search    | no results                       |
//! | relevance     | document dropped                 |
//! | generator     | fixed apology answer             |
//! | grounding     | not grounded (recorded only)     |
//! | quality       | accepted                         |
//!
//! The run as a whole is bounded by the policy deadline; an expired run
//! ends in `Done` with the latest completed answer, or the fallback one.
//!
//! Dropping the future returned by [`Orchestrator::run_pipeline`] cancels
//! the in-flight call and no further stage runs.

use crate::graders;
use crate::graph::{next_stage, PipelinePolicy, Stage};
use crate::prompts::FALLBACK_ANSWER;
use crate::state::{Grade, PipelineState, Route};
use docresearch_common::config::PipelineConfig;
use docresearch_common::errors::{AppError, Result};
use docresearch_common::llm::{Generator, Judge};
use docresearch_common::metrics;
use docresearch_common::websearch::WebSearch;
use docresearch_search::{rank_by_vector_score, FusionRetriever, Tokenizer, VectorSearch};
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

/// Long-lived collaborators shared by every run
#[derive(Clone)]
pub struct PipelineDeps {
    pub judge: Arc<dyn Judge>,
    pub generator: Arc<dyn Generator>,
    pub vector_search: Arc<dyn VectorSearch>,
    pub web_search: Arc<dyn WebSearch>,
    pub tokenizer: Arc<Tokenizer>,
}

/// Result of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub run_id: Uuid,
    pub question: String,
    pub answer: String,
    pub documents: Vec<String>,
    pub search_query: Option<String>,
    pub retrieval_attempts: u32,
    pub generation_attempts: u32,
    pub hallucination_grounded: Grade,
    pub answer_quality: Grade,
    pub docs_retrieved_total: usize,
    pub route_to_web_search: bool,
    pub web_search_triggered: bool,

    /// Stages in execution order, ending with `Done`
    pub stages: Vec<Stage>,

    /// The run was cut short by the step ceiling
    pub step_limit_reached: bool,

    /// The run was cut short by the run deadline
    pub deadline_reached: bool,

    pub elapsed_ms: u64,
}

/// Self-correcting answering pipeline
pub struct Orchestrator {
    deps: PipelineDeps,
    fusion: FusionRetriever,
    policy: PipelinePolicy,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps, config: &PipelineConfig) -> Self {
        Self::with_policy(deps, PipelinePolicy::from(config))
    }

    pub fn with_policy(deps: PipelineDeps, policy: PipelinePolicy) -> Self {
        let fusion = FusionRetriever::new(deps.tokenizer.clone()).with_alpha(policy.alpha);
        Self { deps, fusion, policy }
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    /// Answer a question, returning only the final answer text
    pub async fn answer_question(&self, question: &str) -> String {
        self.run_pipeline(question).await.answer
    }

    /// Run the full pipeline for `question`. Never fails; degraded runs
    /// show up in the grades and attempt counters of the outcome.
    pub async fn run_pipeline(&self, question: &str) -> PipelineOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline", %run_id);
        self.execute(run_id, question).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid, question: &str) -> PipelineOutcome {
        let started = Instant::now();
        let deadline = started + self.policy.max_run;
        let mut state = PipelineState::new(question);
        let mut stage = Stage::Routing;
        let mut stages = Vec::new();
        let mut step_limit_reached = false;
        let mut deadline_reached = false;

        info!(question_len = question.len(), "Pipeline started");

        while !stage.is_terminal() {
            if stages.len() >= self.policy.max_steps {
                warn!(
                    max_steps = self.policy.max_steps,
                    stage = %stage,
                    "Step limit reached, finishing with current answer"
                );
                step_limit_reached = true;
                break;
            }
            if Instant::now() >= deadline {
                deadline_reached = true;
                break;
            }

            stages.push(stage);
            metrics::record_stage(stage.as_str());
            let finished = tokio::time::timeout_at(deadline, self.execute_stage(stage, &mut state)).await;
            if finished.is_err() {
                deadline_reached = true;
                break;
            }
            stage = next_stage(stage, &state, &self.policy);
        }
        stages.push(Stage::Done);

        if deadline_reached {
            warn!(
                max_run_ms = self.policy.max_run.as_millis() as u64,
                stage = %stage,
                "Run deadline reached, finishing with current answer"
            );
        }

        if state.generation.trim().is_empty() {
            state.generation = FALLBACK_ANSWER.to_string();
        }

        let elapsed = started.elapsed();
        let label = if deadline_reached {
            "deadline"
        } else if step_limit_reached {
            "step_limit"
        } else if state.hallucination_grounded.is_yes() && state.answer_quality.is_yes() {
            "verified"
        } else {
            "unverified"
        };
        metrics::record_pipeline(elapsed.as_secs_f64(), label);
        metrics::record_attempts(state.retrieval_attempts, state.generation_attempts);

        info!(
            outcome = label,
            retrieval_attempts = state.retrieval_attempts,
            generation_attempts = state.generation_attempts,
            grounded = state.hallucination_grounded.as_str(),
            quality = state.answer_quality.as_str(),
            documents = state.documents.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Pipeline finished"
        );

        PipelineOutcome {
            run_id,
            question: state.question,
            answer: state.generation,
            documents: state.documents,
            search_query: state.search_query,
            retrieval_attempts: state.retrieval_attempts,
            generation_attempts: state.generation_attempts,
            hallucination_grounded: state.hallucination_grounded,
            answer_quality: state.answer_quality,
            docs_retrieved_total: state.docs_retrieved_total,
            route_to_web_search: state.route_to_web_search,
            web_search_triggered: state.web_search_triggered,
            stages,
            step_limit_reached,
            deadline_reached,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    #[instrument(skip_all, fields(stage = %stage))]
    async fn execute_stage(&self, stage: Stage, state: &mut PipelineState) {
        match stage {
            Stage::Routing => self.route(state).await,
            Stage::Retrieving => self.retrieve(state).await,
            Stage::WebSearching => self.search_web(state).await,
            Stage::GradingDocuments => self.grade_documents(state).await,
            Stage::Generating => self.generate(state).await,
            Stage::CheckingGrounding => self.check_grounding(state).await,
            Stage::CheckingQuality => self.check_quality(state).await,
            Stage::Done => {}
        }
    }

    async fn route(&self, state: &mut PipelineState) {
        if let Some(phrase) = self.policy.explicit_web_search_phrase(&state.question) {
            info!(phrase, "Explicit web search requested, consulting vector store first");
            state.route_to_web_search = false;
            state.explicit_web_search_requested = true;
            return;
        }

        let route = self
            .call("router", graders::route_question(self.deps.judge.as_ref(), &state.question))
            .await
            .unwrap_or_else(|e| {
                record_fallback("router", &e);
                Route::VectorStore
            });

        state.route_to_web_search = route == Route::WebSearch;
        info!(route = route.as_str(), "Routed question");
    }

    async fn retrieve(&self, state: &mut PipelineState) {
        let rewritten = self
            .call("rewrite", graders::rewrite_query(self.deps.generator.as_ref(), &state.question))
            .await;
        state.search_query = match rewritten {
            Ok(query) => Some(query),
            Err(e) => {
                record_fallback("rewrite", &e);
                None
            }
        };
        let query = state.index_query().to_string();

        let candidates = self
            .call("vector_search", self.deps.vector_search.search(&query, self.policy.top_k))
            .await
            .unwrap_or_else(|e| {
                record_fallback("vector_search", &e);
                Vec::new()
            });

        state.docs_retrieved_total = candidates.len();
        if candidates.is_empty() {
            warn!(query = %query, "Vector search returned no candidates");
        }

        state.documents = match self.fusion.rerank(&candidates, &query) {
            Ok(documents) => documents,
            Err(e) => {
                record_fallback("fusion", &e);
                rank_by_vector_score(&candidates)
            }
        };

        info!(
            retrieved = state.docs_retrieved_total,
            kept = state.documents.len(),
            "Retrieved candidates"
        );
    }

    async fn search_web(&self, state: &mut PipelineState) {
        state.web_search_triggered = true;

        let result = self
            .call("web_search", self.deps.web_search.search(&state.question))
            .await;
        metrics::record_web_search(result.is_ok());

        let results = match result {
            Ok(blob) if blob.trim().is_empty() => Vec::new(),
            Ok(blob) => vec![blob],
            Err(e) => {
                record_fallback("web_search", &e);
                Vec::new()
            }
        };

        let added = state.merge_web_results(results);
        info!(added, documents = state.documents.len(), "Web search complete");
    }

    async fn grade_documents(&self, state: &mut PipelineState) {
        // Candidates stay in place until grading completes
        let candidates = state.documents.clone();
        let graded = candidates.len();

        state.documents = self.filter_relevant(&state.question, candidates).await;
        state.retrieval_attempts += 1;

        let relevant = state.documents.len();
        state.web_search_needed =
            relevant < self.policy.relevance_threshold || state.explicit_web_search_requested;
        metrics::record_grading(relevant, graded - relevant);

        info!(
            graded,
            relevant,
            web_search_needed = state.web_search_needed,
            attempt = state.retrieval_attempts,
            "Graded documents"
        );
    }

    /// Keep the documents the judge grades relevant, in input order.
    ///
    /// Documents are graded concurrently; a failed grading drops the document.
    pub async fn filter_relevant(&self, question: &str, documents: Vec<String>) -> Vec<String> {
        let judge = self.deps.judge.as_ref();
        let grades = join_all(documents.iter().map(|document| async move {
            self.call("relevance", graders::grade_document(judge, question, document))
                .await
                .unwrap_or_else(|e| {
                    record_fallback("relevance", &e);
                    Grade::No
                })
        }))
        .await;

        documents
            .into_iter()
            .zip(grades)
            .filter(|(_, grade)| grade.is_yes())
            .map(|(document, _)| document)
            .collect()
    }

    async fn generate(&self, state: &mut PipelineState) {
        state.generation_attempts += 1;

        let generation = self
            .call(
                "generator",
                graders::generate_answer(self.deps.generator.as_ref(), &state.question, &state.documents),
            )
            .await
            .unwrap_or_else(|e| {
                record_fallback("generator", &e);
                FALLBACK_ANSWER.to_string()
            });
        state.generation = generation;

        info!(
            attempt = state.generation_attempts,
            chars = state.generation.len(),
            context_documents = state.documents.len(),
            "Generated answer"
        );
    }

    async fn check_grounding(&self, state: &mut PipelineState) {
        let grade = self
            .call(
                "grounding",
                graders::check_grounding(self.deps.judge.as_ref(), &state.documents, &state.generation),
            )
            .await
            .unwrap_or_else(|e| {
                record_fallback("grounding", &e);
                Grade::No
            });
        state.hallucination_grounded = grade;
        info!(grounded = grade.as_str(), "Checked grounding");
    }

    async fn check_quality(&self, state: &mut PipelineState) {
        if state.generation_attempts >= self.policy.max_generation_attempts {
            warn!(
                attempts = state.generation_attempts,
                "Max generation attempts reached, accepting answer"
            );
            state.answer_quality = Grade::Yes;
            return;
        }

        let grade = self
            .call(
                "quality",
                graders::grade_answer(self.deps.judge.as_ref(), &state.question, &state.generation),
            )
            .await
            .unwrap_or_else(|e| {
                record_fallback("quality", &e);
                Grade::Yes
            });
        state.answer_quality = grade;
        info!(
            quality = grade.as_str(),
            attempt = state.generation_attempts,
            "Checked answer quality"
        );
    }

    /// Await an external call under the policy timeout
    async fn call<T>(&self, operation: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.policy.call_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::UpstreamTimeout {
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

fn record_fallback(kind: &'static str, err: &AppError) {
    if err.is_transient() {
        warn!(kind, error = %err, "External call failed, using fallback");
    } else {
        error!(kind, error = %err, code = ?err.code(), "External call failed, using fallback");
    }
    metrics::record_fallback(kind);
}
