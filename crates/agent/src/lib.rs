//! DocResearch agent
//!
//! Self-correcting answering pipeline: routes a question, retrieves and
//! fuses candidates, grades them, escalates to web search, generates an
//! answer and checks it before returning.

pub mod evaluation;
pub mod graders;
pub mod graph;
pub mod orchestrator;
pub mod prompts;
pub mod state;

pub use evaluation::{EvaluationStats, EvaluationTracker, QueryEvaluation};
pub use graph::{next_stage, PipelinePolicy, Stage};
pub use orchestrator::{Orchestrator, PipelineDeps, PipelineOutcome};
pub use prompts::FALLBACK_ANSWER;
pub use state::{Grade, PipelineState, Route};
