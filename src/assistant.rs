//! Pipeline orchestration and session state.
//!
//! One linear pipeline per turn: parse, synthesize, validate, execute,
//! analyze, compose. A single bounded re-attempt is permitted on the
//! synthesize/validate edge, driven by an explicit counter; no other edge
//! retries. Each session owns a bounded rolling window of prior turns and an
//! async mutex that keeps its turns strictly sequential, while separate
//! sessions run concurrently. A per-session generation counter aborts an
//! in-flight turn between stages when a newer question arrives.

use crate::analyzer::ResultAnalyzer;
use crate::composer::{ChartDescriptor, ResponseComposer};
use crate::config::Config;
use crate::error::{AssistantError, Result};
use crate::extractor::IntentExtractor;
use crate::llm::LanguageBackend;
use crate::query_validator::QueryValidator;
use crate::schema::TableSchema;
use crate::sql_compiler::SqlCompiler;
use crate::sql_engine::SqlEngine;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// At most one re-attempt after a validation rejection.
const MAX_SYNTH_RETRIES: u8 = 1;
/// Answer summaries stored in the context window are clipped to this.
const SUMMARY_MAX_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    ClarificationNeeded,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub answer: String,
    pub chart: Option<ChartDescriptor>,
    /// The literal statement the validator approved, present on ok turns.
    pub executed_query: Option<String>,
    pub status: ResponseStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Parsing,
    Synthesizing,
    Validating,
    Executing,
    Analyzing,
    Composing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub question: String,
    pub intent_summary: Option<String>,
    pub answer_summary: Option<String>,
    pub failed: bool,
}

/// Bounded rolling window of prior turns, oldest evicted first.
pub struct SessionContext {
    turns: VecDeque<TurnRecord>,
    capacity: usize,
}

impl SessionContext {
    fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, record: TurnRecord) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(record);
    }

    fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| {
                if t.failed {
                    format!("Q: {} (failed)", t.question)
                } else {
                    format!(
                        "Q: {} -> {} | A: {}",
                        t.question,
                        t.intent_summary.as_deref().unwrap_or("?"),
                        t.answer_summary.as_deref().unwrap_or("")
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn records(&self) -> Vec<TurnRecord> {
        self.turns.iter().cloned().collect()
    }
}

#[derive(Clone)]
struct SessionHandle {
    context: Arc<Mutex<SessionContext>>,
    generation: Arc<AtomicU64>,
}

impl SessionHandle {
    fn new(capacity: usize) -> Self {
        Self {
            context: Arc::new(Mutex::new(SessionContext::new(capacity))),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

struct TurnOutcome {
    answer: String,
    chart: Option<ChartDescriptor>,
    executed_query: String,
    intent_summary: String,
    answer_summary: String,
}

pub struct Assistant {
    config: Config,
    extractor: IntentExtractor,
    compiler: SqlCompiler,
    validator: QueryValidator,
    engine: SqlEngine,
    sessions: DashMap<String, SessionHandle>,
}

impl Assistant {
    pub fn new(config: Config, backend: Arc<dyn LanguageBackend>) -> Self {
        let schema = TableSchema::service_requests();
        let extractor =
            IntentExtractor::new(backend, schema.clone(), config.detail_cues.clone());
        let compiler = SqlCompiler::new(schema.clone());
        let validator = QueryValidator::new(&schema, config.max_limit);
        let engine = SqlEngine::new(
            config.database_path.clone(),
            schema,
            config.row_cap,
            config.query_timeout,
        );
        Self {
            config,
            extractor,
            compiler,
            validator,
            engine,
            sessions: DashMap::new(),
        }
    }

    /// Process one question for one session. Never panics out; every
    /// failure is mapped to a short user-facing message and a status.
    pub async fn submit_question(&self, question: &str, session_id: &str) -> AssistantResponse {
        let turn_id = Uuid::new_v4();
        let handle = self.session(session_id);
        let generation = handle.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut context = handle.context.lock().await;
        info!(%turn_id, session = session_id, question, "processing question");

        let context_text = context.render();
        match self.run_turn(question, &context_text, &handle, generation).await {
            Ok(outcome) => {
                context.push(TurnRecord {
                    question: question.to_string(),
                    intent_summary: Some(outcome.intent_summary),
                    answer_summary: Some(outcome.answer_summary),
                    failed: false,
                });
                AssistantResponse {
                    answer: outcome.answer,
                    chart: outcome.chart,
                    executed_query: Some(outcome.executed_query),
                    status: ResponseStatus::Ok,
                }
            }
            Err(error) => {
                warn!(%turn_id, stage = ?PipelineStage::Failed, %error, "turn failed");
                context.push(TurnRecord {
                    question: question.to_string(),
                    intent_summary: None,
                    answer_summary: None,
                    failed: true,
                });
                let (status, answer) = failure_reply(&error);
                AssistantResponse {
                    answer,
                    chart: None,
                    executed_query: None,
                    status,
                }
            }
        }
    }

    /// Prior turns of a session, for history views and tests.
    pub async fn session_history(&self, session_id: &str) -> Vec<TurnRecord> {
        let context = match self.sessions.get(session_id) {
            Some(handle) => handle.context.clone(),
            None => return Vec::new(),
        };
        let guard = context.lock().await;
        guard.records()
    }

    async fn run_turn(
        &self,
        question: &str,
        context_text: &str,
        handle: &SessionHandle,
        generation: u64,
    ) -> Result<TurnOutcome> {
        let context = if context_text.is_empty() {
            None
        } else {
            Some(context_text)
        };

        let mut hint: Option<String> = None;
        let mut attempts: u8 = 0;
        let (intent, candidate) = loop {
            attempts += 1;
            debug!(stage = ?PipelineStage::Parsing, attempts, "pipeline stage");
            self.ensure_current(handle, generation)?;
            let intent = self.extractor.extract(question, context, hint.as_deref()).await?;

            debug!(stage = ?PipelineStage::Synthesizing, "pipeline stage");
            self.ensure_current(handle, generation)?;
            let validated = match self.compiler.compile(&intent) {
                Ok(candidate) => {
                    debug!(stage = ?PipelineStage::Validating, "pipeline stage");
                    self.validator.validate(&candidate).map(|()| candidate)
                }
                Err(error) => Err(error),
            };

            match validated {
                Ok(candidate) => break (intent, candidate),
                Err(error) if attempts <= MAX_SYNTH_RETRIES && is_retryable(&error) => {
                    warn!(%error, "re-prompting once with the rejection reason");
                    hint = Some(error.to_string());
                }
                Err(error) => return Err(error),
            }
        };

        debug!(stage = ?PipelineStage::Executing, "pipeline stage");
        self.ensure_current(handle, generation)?;
        let table = self.engine.execute(&candidate).await?;

        debug!(stage = ?PipelineStage::Analyzing, "pipeline stage");
        self.ensure_current(handle, generation)?;
        let insight = ResultAnalyzer::analyze(&intent, &table)?;

        debug!(stage = ?PipelineStage::Composing, "pipeline stage");
        let (answer, chart) =
            ResponseComposer::compose(&intent, &insight, &table, &candidate.statement);

        debug!(stage = ?PipelineStage::Done, "pipeline stage");
        Ok(TurnOutcome {
            intent_summary: intent.summary(),
            answer_summary: summarize(&answer),
            executed_query: candidate.statement,
            answer,
            chart,
        })
    }

    fn ensure_current(&self, handle: &SessionHandle, generation: u64) -> Result<()> {
        if handle.generation.load(Ordering::SeqCst) != generation {
            return Err(AssistantError::TurnSuperseded);
        }
        Ok(())
    }

    fn session(&self, session_id: &str) -> SessionHandle {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionHandle::new(self.config.context_window))
            .clone()
    }
}

fn is_retryable(error: &AssistantError) -> bool {
    matches!(
        error,
        AssistantError::QueryRejected(_) | AssistantError::UnsupportedIntent(_)
    )
}

/// Map a pipeline failure to a short user-facing message. Raw backend and
/// database text never reaches the user; it was already logged at the
/// failure site.
fn failure_reply(error: &AssistantError) -> (ResponseStatus, String) {
    match error {
        AssistantError::IntentInvalid(detail) => (
            ResponseStatus::ClarificationNeeded,
            format!(
                "I couldn't map that question onto the service-request data ({}). \
                 Try questions like:\n\
                 - What are the top 10 complaint types?\n\
                 - Which borough has the most requests?\n\
                 - What percentage of requests are closed within 3 days?",
                detail
            ),
        ),
        AssistantError::UnsupportedIntent(detail) => (
            ResponseStatus::ClarificationNeeded,
            format!(
                "I can't answer that shape of question yet ({}). Could you rephrase it?",
                detail
            ),
        ),
        AssistantError::QueryRejected(_) => (
            ResponseStatus::Error,
            "I could not turn that question into a safe query. Please try rephrasing it."
                .to_string(),
        ),
        AssistantError::BackendUnavailable(_) => (
            ResponseStatus::Error,
            "The language service is not responding right now. Please try again in a moment."
                .to_string(),
        ),
        AssistantError::ExecutionTimeout(_) => (
            ResponseStatus::Error,
            "That query took too long and was cancelled. Try narrowing the date range or asking \
             about fewer groups."
                .to_string(),
        ),
        AssistantError::ExecutionError(_) => (
            ResponseStatus::Error,
            "Something went wrong while querying the data. Please try again.".to_string(),
        ),
        AssistantError::TurnSuperseded => (
            ResponseStatus::Error,
            "This question was superseded by a newer one.".to_string(),
        ),
        _ => (
            ResponseStatus::Error,
            "An unexpected problem occurred while answering. Please try again.".to_string(),
        ),
    }
}

/// First line of the answer, clipped, without the transparency footer.
fn summarize(answer: &str) -> String {
    let first_line = answer
        .lines()
        .find(|line| !line.trim().is_empty() && !line.starts_with("Query used:"))
        .unwrap_or("");
    first_line.chars().take(SUMMARY_MAX_CHARS).collect()
}
