//! End-to-end pipeline runs against scripted collaborators

use async_trait::async_trait;
use docresearch_agent::prompts;
use docresearch_agent::{Grade, Orchestrator, PipelineDeps, PipelinePolicy, Stage, FALLBACK_ANSWER};
use docresearch_common::errors::{AppError, Result};
use docresearch_common::llm::{Generator, Judge};
use docresearch_common::websearch::WebSearch;
use docresearch_search::{ScoredCandidate, Tokenizer, VectorSearch};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Say(&'static str),
    Fail,
    Hang,
    /// Answers after a delay
    Slow(u64, &'static str),
}

impl Reply {
    async fn resolve(&self) -> Result<String> {
        match self {
            Reply::Say(text) => Ok(text.to_string()),
            Reply::Fail => Err(AppError::LlmError {
                message: "scripted failure".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
            Reply::Slow(secs, text) => {
                tokio::time::sleep(Duration::from_secs(*secs)).await;
                Ok(text.to_string())
            }
        }
    }
}

/// Judge that answers per prompt kind and records which kinds were asked
struct ScriptedJudge {
    route: Reply,
    /// Documents containing any marker are graded relevant
    relevant_markers: Vec<&'static str>,
    relevance_fallback: Reply,
    grounded: Reply,
    quality: Mutex<VecDeque<Reply>>,
    quality_default: Reply,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedJudge {
    fn agreeable() -> Self {
        Self {
            route: Reply::Say("vectorstore"),
            relevant_markers: Vec::new(),
            relevance_fallback: Reply::Say("yes"),
            grounded: Reply::Say("yes"),
            quality: Mutex::new(VecDeque::new()),
            quality_default: Reply::Say("yes"),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn uniform(reply: Reply) -> Self {
        Self {
            route: reply.clone(),
            relevant_markers: Vec::new(),
            relevance_fallback: reply.clone(),
            grounded: reply.clone(),
            quality: Mutex::new(VecDeque::new()),
            quality_default: reply,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn count(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| **k == kind).count()
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn classify(&self, system: &str, user: &str, _schema: &[&str]) -> Result<String> {
        let (kind, reply) = if system == prompts::ROUTER_SYSTEM {
            ("route", self.route.clone())
        } else if system == prompts::DOCUMENT_GRADER_SYSTEM {
            let reply = if self.relevant_markers.iter().any(|m| user.contains(m)) {
                Reply::Say("yes")
            } else if self.relevant_markers.is_empty() {
                self.relevance_fallback.clone()
            } else {
                Reply::Say("no")
            };
            ("relevance", reply)
        } else if system == prompts::HALLUCINATION_GRADER_SYSTEM {
            ("grounding", self.grounded.clone())
        } else if system == prompts::ANSWER_GRADER_SYSTEM {
            let next = self.quality.lock().unwrap().pop_front();
            ("quality", next.unwrap_or_else(|| self.quality_default.clone()))
        } else {
            panic!("unexpected judge prompt: {}", system);
        };

        self.calls.lock().unwrap().push(kind);
        reply.resolve().await
    }
}

struct ScriptedGenerator {
    rewrite: Reply,
    answer: Reply,
    rewrites: Mutex<usize>,
    answers: Mutex<usize>,
}

impl ScriptedGenerator {
    fn new(rewrite: Reply, answer: Reply) -> Self {
        Self {
            rewrite,
            answer,
            rewrites: Mutex::new(0),
            answers: Mutex::new(0),
        }
    }

    fn answers(&self) -> usize {
        *self.answers.lock().unwrap()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, system: &str, _user: &str) -> Result<String> {
        if system == prompts::QUERY_REWRITER_SYSTEM {
            *self.rewrites.lock().unwrap() += 1;
            self.rewrite.resolve().await
        } else {
            *self.answers.lock().unwrap() += 1;
            self.answer.resolve().await
        }
    }
}

struct StubVectorSearch {
    candidates: Vec<ScoredCandidate>,
    hang: bool,
    queries: Mutex<Vec<(String, usize)>>,
}

impl StubVectorSearch {
    fn with(candidates: &[(&str, f64)]) -> Self {
        Self {
            candidates: candidates
                .iter()
                .map(|(text, score)| ScoredCandidate::new(*text, *score))
                .collect(),
            hang: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::with(&[])
        }
    }

    fn queries(&self) -> Vec<(String, usize)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorSearch for StubVectorSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredCandidate>> {
        self.queries.lock().unwrap().push((query.to_string(), k));
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(self.candidates.iter().take(k).cloned().collect())
    }
}

struct StubWebSearch {
    reply: Reply,
    queries: Mutex<Vec<String>>,
}

impl StubWebSearch {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearch for StubWebSearch {
    async fn search(&self, query: &str) -> Result<String> {
        self.queries.lock().unwrap().push(query.to_string());
        self.reply.resolve().await.map_err(|_| AppError::WebSearch {
            message: "scripted failure".to_string(),
        })
    }
}

struct Harness {
    judge: Arc<ScriptedJudge>,
    generator: Arc<ScriptedGenerator>,
    vector: Arc<StubVectorSearch>,
    web: Arc<StubWebSearch>,
}

impl Harness {
    fn new(
        judge: ScriptedJudge,
        generator: ScriptedGenerator,
        vector: StubVectorSearch,
        web: StubWebSearch,
    ) -> Self {
        Self {
            judge: Arc::new(judge),
            generator: Arc::new(generator),
            vector: Arc::new(vector),
            web: Arc::new(web),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(PipelinePolicy::default())
    }

    fn orchestrator_with(&self, policy: PipelinePolicy) -> Orchestrator {
        let deps = PipelineDeps {
            judge: self.judge.clone(),
            generator: self.generator.clone(),
            vector_search: self.vector.clone(),
            web_search: self.web.clone(),
            tokenizer: Arc::new(Tokenizer::new()),
        };
        Orchestrator::with_policy(deps, policy)
    }
}

fn default_generator() -> ScriptedGenerator {
    ScriptedGenerator::new(Reply::Say("rewritten search phrase"), Reply::Say("A grounded answer."))
}

#[tokio::test]
async fn test_index_only_run() {
    let harness = Harness::new(
        ScriptedJudge::agreeable(),
        default_generator(),
        StubVectorSearch::with(&[("first passage", 0.9), ("second passage", 0.7), ("third passage", 0.5)]),
        StubWebSearch::new(Reply::Say("unused")),
    );

    let outcome = harness.orchestrator().run_pipeline("what do my notes say?").await;

    assert_eq!(
        outcome.stages,
        vec![
            Stage::Routing,
            Stage::Retrieving,
            Stage::GradingDocuments,
            Stage::Generating,
            Stage::CheckingGrounding,
            Stage::CheckingQuality,
            Stage::Done,
        ]
    );
    assert_eq!(outcome.answer, "A grounded answer.");
    assert_eq!(outcome.retrieval_attempts, 1);
    assert_eq!(outcome.generation_attempts, 1);
    assert_eq!(outcome.docs_retrieved_total, 3);
    assert_eq!(outcome.documents.len(), 3);
    assert_eq!(outcome.search_query.as_deref(), Some("rewritten search phrase"));
    assert!(!outcome.web_search_triggered);
    assert!(!outcome.step_limit_reached);
    assert_eq!(outcome.hallucination_grounded, Grade::Yes);
    assert_eq!(outcome.answer_quality, Grade::Yes);

    assert_eq!(harness.vector.queries(), vec![("rewritten search phrase".to_string(), 10)]);
    assert!(harness.web.queries().is_empty());
}

#[tokio::test]
async fn test_insufficient_relevance_escalates_to_web() {
    let mut judge = ScriptedJudge::agreeable();
    judge.relevant_markers = vec!["OWASP"];

    let harness = Harness::new(
        judge,
        ScriptedGenerator::new(Reply::Say("OWASP top 10 AI agents risks"), Reply::Say("OWASP lists...")),
        StubVectorSearch::with(&[
            ("OWASP top 10 for LLM applications covers prompt injection", 0.8),
            ("Quarterly sales figures for the northern region", 0.3),
            ("Team offsite agenda and travel details", 0.2),
        ]),
        StubWebSearch::new(Reply::Say("OWASP agentic AI threats and mitigations overview")),
    );

    let question = "tell me about owasp top 10 for AI agents";
    let outcome = harness.orchestrator().run_pipeline(question).await;

    assert_eq!(
        outcome.stages,
        vec![
            Stage::Routing,
            Stage::Retrieving,
            Stage::GradingDocuments,
            Stage::WebSearching,
            Stage::GradingDocuments,
            Stage::Generating,
            Stage::CheckingGrounding,
            Stage::CheckingQuality,
            Stage::Done,
        ]
    );
    assert_eq!(outcome.retrieval_attempts, 2);
    assert_eq!(outcome.generation_attempts, 1);
    assert_eq!(outcome.docs_retrieved_total, 3);
    assert!(outcome.web_search_triggered);
    assert_eq!(
        outcome.documents,
        vec![
            "OWASP top 10 for LLM applications covers prompt injection",
            "OWASP agentic AI threats and mitigations overview",
        ]
    );

    // web search always receives the user's question, not the rewrite
    assert_eq!(harness.web.queries(), vec![question.to_string()]);
}

#[tokio::test]
async fn test_always_negative_judge_terminates() {
    let harness = Harness::new(
        ScriptedJudge::uniform(Reply::Say("no")),
        default_generator(),
        StubVectorSearch::with(&[("a passage", 0.9), ("another passage", 0.4)]),
        StubWebSearch::new(Reply::Say("web text")),
    );

    let outcome = harness.orchestrator().run_pipeline("anything").await;

    assert_eq!(outcome.retrieval_attempts, 2);
    assert_eq!(outcome.generation_attempts, 3);
    assert_eq!(outcome.hallucination_grounded, Grade::No);
    // accepted once generation attempts run out
    assert_eq!(outcome.answer_quality, Grade::Yes);
    assert!(outcome.documents.is_empty());
    assert!(outcome.web_search_triggered);
    assert_eq!(outcome.stages.last(), Some(&Stage::Done));

    assert_eq!(harness.judge.count("quality"), 2);
    assert_eq!(harness.generator.answers(), 3);
}

#[tokio::test]
async fn test_failing_judge_uses_fail_closed_defaults() {
    let harness = Harness::new(
        ScriptedJudge::uniform(Reply::Fail),
        default_generator(),
        StubVectorSearch::with(&[("a passage", 0.9)]),
        StubWebSearch::new(Reply::Say("web text")),
    );

    let outcome = harness.orchestrator().run_pipeline("anything").await;

    // router failure falls back to the index
    assert_eq!(outcome.stages[1], Stage::Retrieving);
    assert!(!outcome.route_to_web_search);
    // relevance failure drops every document
    assert!(outcome.documents.is_empty());
    assert_eq!(outcome.retrieval_attempts, 2);
    // grounding failure is recorded, quality failure accepts
    assert_eq!(outcome.hallucination_grounded, Grade::No);
    assert_eq!(outcome.answer_quality, Grade::Yes);
    assert_eq!(outcome.generation_attempts, 1);
    assert_eq!(outcome.answer, "A grounded answer.");
}

#[tokio::test]
async fn test_generator_failure_returns_fallback_answer() {
    let harness = Harness::new(
        ScriptedJudge::agreeable(),
        ScriptedGenerator::new(Reply::Fail, Reply::Fail),
        StubVectorSearch::with(&[("a passage", 0.9), ("b passage", 0.8)]),
        StubWebSearch::new(Reply::Say("unused")),
    );

    let outcome = harness.orchestrator().run_pipeline("original question").await;

    assert_eq!(outcome.answer, FALLBACK_ANSWER);
    assert_eq!(outcome.generation_attempts, 1);
    assert!(outcome.search_query.is_none());
    assert_eq!(harness.vector.queries()[0].0, "original question");
}

#[tokio::test]
async fn test_answer_question_returns_pipeline_answer() {
    let harness = Harness::new(
        ScriptedJudge::agreeable(),
        default_generator(),
        StubVectorSearch::with(&[("a passage", 0.9), ("b passage", 0.8)]),
        StubWebSearch::new(Reply::Say("unused")),
    );
    let orchestrator = harness.orchestrator();

    let answer = orchestrator.answer_question("what do my notes say?").await;
    let outcome = orchestrator.run_pipeline("what do my notes say?").await;

    assert_eq!(answer, outcome.answer);
    assert_eq!(answer, "A grounded answer.");
}

#[tokio::test]
async fn test_answer_question_falls_back_when_generator_fails() {
    let harness = Harness::new(
        ScriptedJudge::agreeable(),
        ScriptedGenerator::new(Reply::Say("rewritten"), Reply::Fail),
        StubVectorSearch::with(&[("a passage", 0.9)]),
        StubWebSearch::new(Reply::Say("unused")),
    );

    let answer = harness.orchestrator().answer_question("anything").await;

    assert_eq!(answer, FALLBACK_ANSWER);
    assert_eq!(harness.generator.answers(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_collaborators_stop_at_run_deadline() {
    // every call fits the 60 s call timeout, the run as a whole does not
    let harness = Harness::new(
        ScriptedJudge::uniform(Reply::Slow(40, "no")),
        ScriptedGenerator::new(Reply::Slow(40, "rewritten"), Reply::Slow(40, "late answer")),
        StubVectorSearch::with(&[("a passage", 0.9)]),
        StubWebSearch::new(Reply::Say("web text")),
    );
    let policy = PipelinePolicy::default();
    assert!(policy.call_timeout > Duration::from_secs(40));

    let outcome = harness.orchestrator_with(policy.clone()).run_pipeline("anything").await;

    assert!(outcome.deadline_reached);
    assert!(!outcome.step_limit_reached);
    let max_run_ms = policy.max_run.as_millis() as u64;
    assert!(outcome.elapsed_ms >= max_run_ms && outcome.elapsed_ms < max_run_ms + 1_000);
    assert_eq!(outcome.stages.last(), Some(&Stage::Done));
    // cut during the second grading pass, before any generation
    assert_eq!(outcome.stages[outcome.stages.len() - 2], Stage::GradingDocuments);
    assert_eq!(outcome.retrieval_attempts, 1);
    assert_eq!(outcome.answer, FALLBACK_ANSWER);
    assert_eq!(harness.generator.answers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_keeps_latest_answer() {
    let harness = Harness::new(
        ScriptedJudge::uniform(Reply::Say("no")),
        ScriptedGenerator::new(Reply::Say("rewritten"), Reply::Slow(40, "draft answer")),
        StubVectorSearch::with(&[("a passage", 0.9)]),
        StubWebSearch::new(Reply::Say("web text")),
    );
    let policy = PipelinePolicy {
        max_run: Duration::from_secs(100),
        ..PipelinePolicy::default()
    };

    let outcome = harness.orchestrator_with(policy).run_pipeline("anything").await;

    // the third generation is cut short, the second one stands
    assert!(outcome.deadline_reached);
    assert_eq!(outcome.generation_attempts, 3);
    assert_eq!(outcome.answer, "draft answer");
    assert!(outcome.elapsed_ms >= 100_000 && outcome.elapsed_ms < 101_000);
    assert_eq!(outcome.stages[outcome.stages.len() - 2], Stage::Generating);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_collaborators_time_out() {
    let harness = Harness::new(
        ScriptedJudge::uniform(Reply::Hang),
        ScriptedGenerator::new(Reply::Hang, Reply::Hang),
        StubVectorSearch::hanging(),
        StubWebSearch::new(Reply::Hang),
    );

    let policy = PipelinePolicy {
        call_timeout: Duration::from_secs(5),
        ..PipelinePolicy::default()
    };
    let outcome = harness.orchestrator_with(policy).run_pipeline("anything").await;

    assert_eq!(outcome.answer, FALLBACK_ANSWER);
    assert_eq!(outcome.generation_attempts, 1);
    assert_eq!(outcome.retrieval_attempts, 2);
    assert_eq!(outcome.docs_retrieved_total, 0);
    assert_eq!(outcome.hallucination_grounded, Grade::No);
    assert_eq!(outcome.answer_quality, Grade::Yes);
    assert!(outcome.web_search_triggered);
}

#[tokio::test]
async fn test_explicit_web_search_phrase_skips_router() {
    let mut judge = ScriptedJudge::agreeable();
    judge.route = Reply::Say("websearch");

    let harness = Harness::new(
        judge,
        default_generator(),
        StubVectorSearch::with(&[("resume lists Rust", 0.9), ("resume lists Go", 0.8)]),
        StubWebSearch::new(Reply::Say("Rust 2024 edition news")),
    );

    let outcome = harness
        .orchestrator()
        .run_pipeline("What languages are on my resume? Also search for recent Rust news")
        .await;

    assert_eq!(harness.judge.count("route"), 0);
    assert!(!outcome.route_to_web_search);
    assert_eq!(outcome.stages[1], Stage::Retrieving);
    assert!(outcome.stages.contains(&Stage::WebSearching));
    assert!(outcome.web_search_triggered);
    assert_eq!(outcome.retrieval_attempts, 2);
    assert_eq!(outcome.documents.len(), 3);
}

#[tokio::test]
async fn test_router_web_route_skips_index() {
    let mut judge = ScriptedJudge::agreeable();
    judge.route = Reply::Say("websearch");

    let harness = Harness::new(
        judge,
        default_generator(),
        StubVectorSearch::with(&[("never read", 0.9)]),
        StubWebSearch::new(Reply::Say("today's weather is sunny")),
    );

    let outcome = harness.orchestrator().run_pipeline("weather today?").await;

    assert!(outcome.route_to_web_search);
    assert_eq!(&outcome.stages[..2], &[Stage::Routing, Stage::WebSearching]);
    assert!(harness.vector.queries().is_empty());
    assert_eq!(outcome.docs_retrieved_total, 0);
    assert_eq!(outcome.documents, vec!["today's weather is sunny"]);
}

#[tokio::test]
async fn test_empty_web_result_adds_nothing() {
    let harness = Harness::new(
        ScriptedJudge::uniform(Reply::Say("no")),
        default_generator(),
        StubVectorSearch::with(&[]),
        StubWebSearch::new(Reply::Say("   ")),
    );

    let outcome = harness.orchestrator().run_pipeline("anything").await;

    assert!(outcome.web_search_triggered);
    assert!(outcome.documents.is_empty());
    assert_eq!(harness.judge.count("relevance"), 0);
}

#[tokio::test]
async fn test_retrieval_reranks_with_keyword_signal() {
    let harness = Harness::new(
        ScriptedJudge::agreeable(),
        ScriptedGenerator::new(Reply::Say("rust ownership"), Reply::Say("answer")),
        StubVectorSearch::with(&[
            ("quarterly sales report", 0.9),
            ("rust ownership and borrowing", 0.85),
            ("team offsite agenda", 0.8),
            ("   ", 0.1),
        ]),
        StubWebSearch::new(Reply::Say("unused")),
    );

    let policy = PipelinePolicy {
        alpha: 0.3,
        ..PipelinePolicy::default()
    };
    let outcome = harness.orchestrator_with(policy).run_pipeline("how does rust ownership work?").await;

    assert_eq!(outcome.docs_retrieved_total, 4);
    assert_eq!(
        outcome.documents,
        vec!["rust ownership and borrowing", "quarterly sales report", "team offsite agenda"]
    );
}

#[tokio::test]
async fn test_filter_relevant_keeps_order_and_is_repeatable() {
    let mut judge = ScriptedJudge::agreeable();
    judge.relevant_markers = vec!["keep"];

    let harness = Harness::new(
        judge,
        default_generator(),
        StubVectorSearch::with(&[]),
        StubWebSearch::new(Reply::Say("unused")),
    );
    let orchestrator = harness.orchestrator();

    let docs: Vec<String> = ["keep one", "drop two", "keep three", "drop four", "keep five"]
        .iter()
        .map(|d| d.to_string())
        .collect();

    let first = orchestrator.filter_relevant("question", docs.clone()).await;
    let second = orchestrator.filter_relevant("question", docs).await;

    assert_eq!(first, vec!["keep one", "keep three", "keep five"]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_regenerate_on_ungrounded_policy() {
    let mut judge = ScriptedJudge::agreeable();
    judge.grounded = Reply::Say("no");

    let harness = Harness::new(
        judge,
        default_generator(),
        StubVectorSearch::with(&[("a passage", 0.9), ("b passage", 0.8)]),
        StubWebSearch::new(Reply::Say("unused")),
    );

    let lenient = harness.orchestrator().run_pipeline("q").await;
    assert_eq!(lenient.generation_attempts, 1);
    assert_eq!(lenient.hallucination_grounded, Grade::No);

    let policy = PipelinePolicy {
        regenerate_on_ungrounded: true,
        ..PipelinePolicy::default()
    };
    let strict = harness.orchestrator_with(policy).run_pipeline("q").await;
    assert_eq!(strict.generation_attempts, 3);
}

#[tokio::test]
async fn test_quality_retry_then_accept() {
    let judge = ScriptedJudge::agreeable();
    judge.quality.lock().unwrap().push_back(Reply::Say("no"));

    let harness = Harness::new(
        judge,
        default_generator(),
        StubVectorSearch::with(&[("a passage", 0.9), ("b passage", 0.8)]),
        StubWebSearch::new(Reply::Say("unused")),
    );

    let outcome = harness.orchestrator().run_pipeline("q").await;
    assert_eq!(outcome.generation_attempts, 2);
    assert_eq!(outcome.answer_quality, Grade::Yes);
    assert_eq!(harness.judge.count("quality"), 2);
}

#[tokio::test]
async fn test_step_limit_finishes_with_fallback() {
    let harness = Harness::new(
        ScriptedJudge::agreeable(),
        default_generator(),
        StubVectorSearch::with(&[("a passage", 0.9)]),
        StubWebSearch::new(Reply::Say("web")),
    );

    let policy = PipelinePolicy {
        max_steps: 3,
        ..PipelinePolicy::default()
    };
    let outcome = harness.orchestrator_with(policy).run_pipeline("q").await;

    assert!(outcome.step_limit_reached);
    assert_eq!(outcome.stages.len(), 4);
    assert_eq!(outcome.stages.last(), Some(&Stage::Done));
    assert_eq!(outcome.answer, FALLBACK_ANSWER);
    assert_eq!(harness.generator.answers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_run_cancels_remaining_stages() {
    let harness = Harness::new(
        ScriptedJudge::agreeable(),
        default_generator(),
        StubVectorSearch::hanging(),
        StubWebSearch::new(Reply::Say("web")),
    );
    let orchestrator = harness.orchestrator();

    let cancelled =
        tokio::time::timeout(Duration::from_secs(1), orchestrator.run_pipeline("q")).await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(harness.vector.queries().len(), 1);
    assert_eq!(harness.judge.count("relevance"), 0);
    assert_eq!(harness.generator.answers(), 0);
    assert!(harness.web.queries().is_empty());
}
