//! Question answering handlers

use axum::{extract::State, Json};
use docresearch_agent::{EvaluationStats, EvaluationTracker, Grade, Orchestrator, PipelineOutcome, QueryEvaluation};
use docresearch_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::AppState;

/// Question request
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,
}

/// Answer with the pipeline counters that produced it
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub question: String,
    pub answer: String,
    pub sources_count: usize,
    pub retrieval_attempts: u32,
    pub generation_attempts: u32,
    pub hallucination_grounded: Grade,
    pub answer_quality: Grade,
    pub docs_retrieved_total: usize,
    pub processing_time_ms: u64,
}

impl From<PipelineOutcome> for QueryResponse {
    fn from(outcome: PipelineOutcome) -> Self {
        Self {
            sources_count: outcome.documents.len(),
            question: outcome.question,
            answer: outcome.answer,
            retrieval_attempts: outcome.retrieval_attempts,
            generation_attempts: outcome.generation_attempts,
            hallucination_grounded: outcome.hallucination_grounded,
            answer_quality: outcome.answer_quality,
            docs_retrieved_total: outcome.docs_retrieved_total,
            processing_time_ms: outcome.elapsed_ms,
        }
    }
}

impl QueryRequest {
    fn checked_question(&self) -> Result<&str> {
        self.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: Some("question".to_string()),
        })?;

        let question = self.question.trim();
        if question.is_empty() {
            return Err(AppError::Validation {
                message: "Question must not be blank".to_string(),
                field: Some("question".to_string()),
            });
        }
        Ok(question)
    }
}

/// Answer a question
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let question = request.checked_question()?;
    let response = answer(&state.orchestrator, &state.evaluations, question).await;
    Ok(Json(response))
}

/// Aggregated evaluation statistics since startup
pub async fn evaluation_stats(State(state): State<AppState>) -> Json<EvaluationStats> {
    Json(state.evaluations.stats())
}

/// Run the pipeline and record its evaluation
async fn answer(orchestrator: &Orchestrator, evaluations: &EvaluationTracker, question: &str) -> QueryResponse {
    let outcome = orchestrator.run_pipeline(question).await;

    let evaluation = QueryEvaluation::from_outcome(&outcome);
    evaluations.record(&evaluation);

    info!(
        run_id = %outcome.run_id,
        precision = evaluation.retrieval_precision,
        grounded = evaluation.hallucination_check.as_str(),
        quality = evaluation.quality_check.as_str(),
        web_search = evaluation.web_search_triggered,
        latency_ms = outcome.elapsed_ms,
        "Query answered"
    );

    QueryResponse::from(outcome)
}
