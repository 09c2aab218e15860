//! Judge and generator calls used by the pipeline stages
//!
//! Each function issues exactly one model call and returns its error
//! untouched. Timeouts and fail-closed defaults are applied by the
//! orchestrator, which knows the stage a call belongs to.

use crate::prompts::{self, render};
use crate::state::{Grade, Route};
use docresearch_common::errors::{AppError, Result};
use docresearch_common::llm::{Generator, Judge};
use tracing::debug;

/// Verdict values accepted from the router
pub const ROUTE_SCHEMA: &[&str] = &["vectorstore", "websearch"];

/// Verdict values accepted from binary graders
pub const BINARY_SCHEMA: &[&str] = &["yes", "no"];

pub async fn route_question(judge: &dyn Judge, question: &str) -> Result<Route> {
    let user = render(prompts::ROUTER_USER, &[("question", question)]);
    let verdict = judge.classify(prompts::ROUTER_SYSTEM, &user, ROUTE_SCHEMA).await?;
    Ok(Route::from_verdict(&verdict))
}

pub async fn grade_document(judge: &dyn Judge, question: &str, document: &str) -> Result<Grade> {
    let user = render(
        prompts::DOCUMENT_GRADER_USER,
        &[("document", document), ("question", question)],
    );
    let verdict = judge
        .classify(prompts::DOCUMENT_GRADER_SYSTEM, &user, BINARY_SCHEMA)
        .await?;
    Ok(Grade::from_verdict(&verdict))
}

pub async fn check_grounding(judge: &dyn Judge, documents: &[String], generation: &str) -> Result<Grade> {
    let joined = documents.join("\n\n");
    let user = render(
        prompts::HALLUCINATION_GRADER_USER,
        &[("documents", joined.as_str()), ("generation", generation)],
    );
    let verdict = judge
        .classify(prompts::HALLUCINATION_GRADER_SYSTEM, &user, BINARY_SCHEMA)
        .await?;
    Ok(Grade::from_verdict(&verdict))
}

pub async fn grade_answer(judge: &dyn Judge, question: &str, generation: &str) -> Result<Grade> {
    let user = render(
        prompts::ANSWER_GRADER_USER,
        &[("question", question), ("generation", generation)],
    );
    let verdict = judge
        .classify(prompts::ANSWER_GRADER_SYSTEM, &user, BINARY_SCHEMA)
        .await?;
    Ok(Grade::from_verdict(&verdict))
}

/// Rewrite a question into a search phrase. An empty rewrite is an error.
pub async fn rewrite_query(generator: &dyn Generator, question: &str) -> Result<String> {
    let user = render(prompts::QUERY_REWRITER_USER, &[("question", question)]);
    let rewritten = generator.complete(prompts::QUERY_REWRITER_SYSTEM, &user).await?;
    let rewritten = rewritten.trim().trim_matches('"').trim().to_string();

    if rewritten.is_empty() {
        return Err(AppError::LlmError {
            message: "Query rewrite returned no text".to_string(),
        });
    }

    debug!(question, rewritten = %rewritten, "Rewrote query");
    Ok(rewritten)
}

/// Answer `question` from `documents`. An empty answer is an error.
pub async fn generate_answer(
    generator: &dyn Generator,
    question: &str,
    documents: &[String],
) -> Result<String> {
    let context = documents.join("\n\n");
    let system = render(prompts::GENERATION_SYSTEM, &[("context", context.as_str())]);
    let user = render(prompts::GENERATION_USER, &[("question", question)]);

    let answer = generator.complete(&system, &user).await?;
    if answer.trim().is_empty() {
        return Err(AppError::LlmError {
            message: "Generation returned no text".to_string(),
        });
    }
    Ok(answer)
}
