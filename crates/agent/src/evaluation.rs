//! Per-query evaluation records and process-wide aggregates

use crate::orchestrator::PipelineOutcome;
use crate::state::Grade;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Quality signals for one answered question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEvaluation {
    pub question: String,

    /// Relevant documents over retrieved documents, capped at 1
    pub retrieval_precision: f64,

    pub docs_retrieved: usize,
    pub docs_relevant: usize,
    pub hallucination_check: Grade,
    pub quality_check: Grade,
    pub web_search_triggered: bool,
    pub generation_attempts: u32,
    pub latency_ms: f64,
    pub recorded_at: DateTime<Utc>,
}

impl QueryEvaluation {
    pub fn from_outcome(outcome: &PipelineOutcome) -> Self {
        let docs_retrieved = outcome.docs_retrieved_total;
        let docs_relevant = outcome.documents.len();
        let retrieval_precision = if docs_retrieved > 0 {
            (docs_relevant as f64 / docs_retrieved as f64).min(1.0)
        } else {
            0.0
        };

        Self {
            question: outcome.question.clone(),
            retrieval_precision,
            docs_retrieved,
            docs_relevant,
            hallucination_check: outcome.hallucination_grounded,
            quality_check: outcome.answer_quality,
            web_search_triggered: outcome.web_search_triggered,
            generation_attempts: outcome.generation_attempts,
            latency_ms: outcome.elapsed_ms as f64,
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregated evaluation statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStats {
    pub total_queries: u64,
    pub hallucination_pass_rate: f64,
    pub quality_pass_rate: f64,
    pub web_search_rate: f64,
    pub avg_docs_retrieved: f64,
    pub avg_docs_relevant: f64,
    pub avg_retrieval_precision: f64,
    pub avg_latency_ms: f64,
    pub avg_generation_attempts: f64,
}

#[derive(Debug, Default)]
struct Totals {
    queries: u64,
    hallucination_passed: u64,
    quality_passed: u64,
    web_search_triggered: u64,
    docs_retrieved: u64,
    docs_relevant: u64,
    latency_ms: f64,
    generation_attempts: u64,
}

/// Thread-safe accumulator shared by all requests
#[derive(Debug, Default)]
pub struct EvaluationTracker {
    totals: Mutex<Totals>,
}

impl EvaluationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, evaluation: &QueryEvaluation) {
        let mut totals = match self.totals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        totals.queries += 1;
        if evaluation.hallucination_check.is_yes() {
            totals.hallucination_passed += 1;
        }
        if evaluation.quality_check.is_yes() {
            totals.quality_passed += 1;
        }
        if evaluation.web_search_triggered {
            totals.web_search_triggered += 1;
        }
        totals.docs_retrieved += evaluation.docs_retrieved as u64;
        totals.docs_relevant += evaluation.docs_relevant as u64;
        totals.latency_ms += evaluation.latency_ms;
        totals.generation_attempts += u64::from(evaluation.generation_attempts);
    }

    /// Current aggregates; all zero before the first query
    pub fn stats(&self) -> EvaluationStats {
        let totals = match self.totals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if totals.queries == 0 {
            return EvaluationStats::default();
        }

        let n = totals.queries as f64;
        EvaluationStats {
            total_queries: totals.queries,
            hallucination_pass_rate: totals.hallucination_passed as f64 / n,
            quality_pass_rate: totals.quality_passed as f64 / n,
            web_search_rate: totals.web_search_triggered as f64 / n,
            avg_docs_retrieved: totals.docs_retrieved as f64 / n,
            avg_docs_relevant: totals.docs_relevant as f64 / n,
            avg_retrieval_precision: if totals.docs_retrieved > 0 {
                (totals.docs_relevant as f64 / totals.docs_retrieved as f64).min(1.0)
            } else {
                0.0
            },
            avg_latency_ms: totals.latency_ms / n,
            avg_generation_attempts: totals.generation_attempts as f64 / n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluation(retrieved: usize, relevant: usize, grounded: Grade, web: bool) -> QueryEvaluation {
        QueryEvaluation {
            question: "q".to_string(),
            retrieval_precision: 0.0,
            docs_retrieved: retrieved,
            docs_relevant: relevant,
            hallucination_check: grounded,
            quality_check: Grade::Yes,
            web_search_triggered: web,
            generation_attempts: 1,
            latency_ms: 100.0,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_tracker_is_all_zero() {
        let tracker = EvaluationTracker::new();
        assert_eq!(tracker.stats(), EvaluationStats::default());
        assert_eq!(tracker.stats().avg_retrieval_precision, 0.0);
    }

    #[test]
    fn test_aggregates() {
        let tracker = EvaluationTracker::new();
        tracker.record(&evaluation(10, 2, Grade::Yes, true));
        tracker.record(&evaluation(10, 6, Grade::No, false));

        let stats = tracker.stats();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.hallucination_pass_rate, 0.5);
        assert_eq!(stats.quality_pass_rate, 1.0);
        assert_eq!(stats.web_search_rate, 0.5);
        assert_eq!(stats.avg_docs_retrieved, 10.0);
        assert_eq!(stats.avg_docs_relevant, 4.0);
        assert!((stats.avg_retrieval_precision - 0.4).abs() < 1e-12);
        assert_eq!(stats.avg_latency_ms, 100.0);
        assert_eq!(stats.avg_generation_attempts, 1.0);
    }

    #[test]
    fn test_concurrent_recording() {
        let tracker = std::sync::Arc::new(EvaluationTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.record(&evaluation(5, 5, Grade::Yes, false)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.stats().total_queries, 8);
    }
}
