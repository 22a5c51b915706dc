//! Core agent loop implementation.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::events::{AgentEvent, AlertLevel, DisplayRole, EventEmitter};
use crate::llm::{ChatMessage, CompletionOptions, LlmClient};
use crate::tools::ToolExecutor;

use super::conversation::ConversationState;

/// Hard cap on tool-using iterations per turn.
pub const MAX_ITERATIONS: usize = 10;

pub const COMPLETION_MESSAGE: &str =
    "✅ I have completed all the tasks assigned by you. Let me know if you need help with anything else.";

pub const BOUNDED_NOTICE: &str = "⚠️ Maximum loop iterations reached. Task completed.";

pub const BOUNDED_ADVISORY: &str =
    "I have completed all the tasks assigned by you. Let me know if you need help with anything else.";

/// Where a turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Dispatching { iteration: usize },
    Completed,
    Bounded,
    Failed,
}

/// Terminal state of a turn. Exactly one is reached per turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Completed,
    /// The iteration cap was reached while the model still wanted tools.
    Bounded,
    /// The completion endpoint failed; carries the error text.
    Failed(String),
}

impl TurnOutcome {
    pub fn phase(&self) -> TurnPhase {
        match self {
            TurnOutcome::Completed => TurnPhase::Completed,
            TurnOutcome::Bounded => TurnPhase::Bounded,
            TurnOutcome::Failed(_) => TurnPhase::Failed,
        }
    }
}

impl fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnOutcome::Completed => write!(f, "completed"),
            TurnOutcome::Bounded => write!(f, "bounded"),
            TurnOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Ephemeral bookkeeping for one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub iterations: usize,
    pub tools_used: BTreeSet<String>,
    pub tool_calls: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    fn start() -> Self {
        Self {
            iterations: 0,
            tools_used: BTreeSet::new(),
            tool_calls: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn note_call(&mut self, tool: &str) {
        self.tool_calls += 1;
        self.tools_used.insert(tool.to_string());
    }

    /// One-line description of the turn.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} iteration{}, {} tool call{}",
            self.iterations,
            if self.iterations == 1 { "" } else { "s" },
            self.tool_calls,
            if self.tool_calls == 1 { "" } else { "s" },
        );
        if !self.tools_used.is_empty() {
            let tools: Vec<&str> = self.tools_used.iter().map(String::as_str).collect();
            line.push_str(&format!(" ({})", tools.join(", ")));
        }
        if let Some(finished) = self.finished_at {
            let elapsed = finished - self.started_at;
            line.push_str(&format!(" in {}ms", elapsed.num_milliseconds()));
        }
        line
    }
}

/// Result of [`AgentLoop::run_turn`]: the grown state plus how the turn ended.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub state: ConversationState,
    pub outcome: TurnOutcome,
    pub record: RunRecord,
}

/// Drives the request/act/observe cycle.
pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
    tools: ToolExecutor,
    events: EventEmitter,
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolExecutor, events: EventEmitter) -> Self {
        Self { llm, tools, events }
    }

    /// Run one user turn.
    ///
    /// `state` must already end with the user's message. The state is
    /// returned in every outcome; on failure it holds exactly what was
    /// appended before the failing request.
    pub async fn run_turn(&self, mut state: ConversationState) -> TurnReport {
        let mut record = RunRecord::start();
        let schemas = self.tools.registry().get_tool_schemas();

        tracing::debug!(phase = ?TurnPhase::Idle, messages = state.len(), "Turn started");
        self.events.status("🤖 Agent thinking...");

        let outcome = 'turn: loop {
            if record.iterations >= MAX_ITERATIONS {
                break TurnOutcome::Bounded;
            }

            let phase = TurnPhase::Dispatching {
                iteration: record.iterations + 1,
            };
            tracing::debug!(?phase, messages = state.len(), "Agent iteration");

            let response = match self
                .llm
                .chat_completion(state.messages(), Some(&schemas), &CompletionOptions::AGENT)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(error = %e, iteration = record.iterations + 1, "Completion request failed");
                    break TurnOutcome::Failed(e.to_string());
                }
            };

            if let Some(text) = response.text() {
                self.events.message(DisplayRole::Assistant, text);
            }

            // Rebuilt so whatever the client returned lands as an assistant message.
            let calls = response.requested_tool_calls().to_vec();
            let assistant = ChatMessage::assistant(response.content, response.tool_calls);

            if calls.is_empty() {
                if let Err(e) = state.push(assistant) {
                    break TurnOutcome::Failed(e.to_string());
                }
                break TurnOutcome::Completed;
            }

            if let Err(e) = state.push(assistant) {
                break TurnOutcome::Failed(e.to_string());
            }

            for call in &calls {
                self.events
                    .status(format!("🔧 Executing: {}", call.function.name));

                let result = self.tools.execute(call).await;
                record.note_call(&call.function.name);

                if let Some(error) = &result.error {
                    self.events
                        .alert(AlertLevel::Warning, format!("Tool execution failed: {}", error));
                }

                let message = ChatMessage::tool_result(call.id.clone(), result.to_message_content());
                // Answers a call appended just above, so a rejection means the log is corrupt.
                if let Err(e) = state.push(message) {
                    tracing::error!(call_id = %call.id, error = %e, "Tool result rejected");
                    break 'turn TurnOutcome::Failed(e.to_string());
                }
            }

            record.iterations += 1;
        };

        self.finish(&outcome, &mut record);

        TurnReport {
            state,
            outcome,
            record,
        }
    }

    fn finish(&self, outcome: &TurnOutcome, record: &mut RunRecord) {
        match outcome {
            TurnOutcome::Completed => {
                self.events.message(DisplayRole::Assistant, COMPLETION_MESSAGE);
            }
            TurnOutcome::Bounded => {
                tracing::warn!(max = MAX_ITERATIONS, "Iteration cap reached");
                self.events.system(BOUNDED_NOTICE);
                self.events.message(DisplayRole::Assistant, BOUNDED_ADVISORY);
            }
            TurnOutcome::Failed(error) => {
                self.events
                    .alert(AlertLevel::Danger, format!("Error in agentic loop: {}", error));
                self.events.system(format!("❌ Error: {}", error));
            }
        }

        record.finished_at = Some(Utc::now());
        let summary = format!("Turn {}: {}", outcome, record.summary());
        tracing::info!(
            outcome = %outcome,
            iterations = record.iterations,
            tool_calls = record.tool_calls,
            "Turn finished"
        );
        self.events.emit(AgentEvent::TurnFinished { summary });
        self.events.status("Ready to chat!");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LlmSettings};
    use crate::llm::{LlmError, Role, ToolCall, ToolSchema};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Scripted {
        Reply(ChatMessage),
        Fail(LlmError),
    }

    /// Replays a fixed script and records the history length of each request.
    struct ScriptedLlm {
        script: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<usize>>,
        /// Reply used once the script runs out.
        fallback: Option<ChatMessage>,
    }

    impl ScriptedLlm {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
                fallback: None,
            }
        }

        fn forever(reply: ChatMessage) -> Self {
            Self {
                fallback: Some(reply),
                ..Self::new(Vec::new())
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion(
            &self,
            messages: &[ChatMessage],
            tools: Option<&[ToolSchema]>,
            _options: &CompletionOptions,
        ) -> Result<ChatMessage, LlmError> {
            assert_eq!(tools.map(|t| t.len()), Some(3));
            self.requests.lock().unwrap().push(messages.len());
            match self.script.lock().unwrap().pop_front() {
                Some(Scripted::Reply(message)) => Ok(message),
                Some(Scripted::Fail(error)) => Err(error),
                None => self.fallback.clone().ok_or(LlmError::EmptyResponse),
            }
        }
    }

    fn text(content: &str) -> Scripted {
        Scripted::Reply(ChatMessage::assistant(Some(content.to_string()), None))
    }

    fn calls(calls: Vec<ToolCall>) -> ChatMessage {
        ChatMessage::assistant(None, Some(calls))
    }

    fn eval_call(id: &str, code: &str) -> ToolCall {
        ToolCall::new(id, "execute_javascript", serde_json::json!({ "code": code }).to_string())
    }

    fn agent(llm: Arc<ScriptedLlm>, events: EventEmitter) -> AgentLoop {
        let config = Config::new(LlmSettings::new("https://api.openai.com/v1", "", "m"));
        let tools = ToolExecutor::new(&config, None, events.clone());
        AgentLoop::new(llm, tools, events)
    }

    fn user_state(input: &str) -> ConversationState {
        let mut state = ConversationState::new();
        state.push_user(input);
        state
    }

    fn tool_messages(state: &ConversationState) -> Vec<&ChatMessage> {
        state.messages().iter().filter(|m| m.role == Role::Tool).collect()
    }

    #[tokio::test]
    async fn plain_answer_completes_in_one_request() {
        let llm = Arc::new(ScriptedLlm::new(vec![text("Hello!")]));
        let (events, mut rx) = EventEmitter::channel();
        let report = agent(llm.clone(), events).run_turn(user_state("hi")).await;

        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(report.record.iterations, 0);
        assert_eq!(report.state.len(), 2);
        assert_eq!(report.state.last().unwrap().content.as_deref(), Some("Hello!"));
        assert_eq!(llm.request_count(), 1);

        let mut assistant_lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::Message {
                role: DisplayRole::Assistant,
                content,
            } = event
            {
                assistant_lines.push(content);
            }
        }
        assert_eq!(assistant_lines, vec!["Hello!".to_string(), COMPLETION_MESSAGE.to_string()]);
    }

    #[tokio::test]
    async fn tool_results_follow_calls_in_order() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Scripted::Reply(calls(vec![
                eval_call("A", "let s = 0; for (let i = 0; i < 20000; i++) s += i; return 'A'"),
                eval_call("B", "'B'"),
                eval_call("C", "return 'C'"),
            ])),
            text("done"),
        ]));
        let report = agent(llm.clone(), EventEmitter::silent())
            .run_turn(user_state("run three"))
            .await;

        assert_eq!(report.outcome, TurnOutcome::Completed);
        let results = tool_messages(&report.state);
        let ids: Vec<_> = results.iter().map(|m| m.tool_call_id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        for (message, expected) in results.iter().zip(["A", "B", "C"]) {
            let content: serde_json::Value =
                serde_json::from_str(message.content.as_deref().unwrap()).unwrap();
            assert_eq!(content["displayResult"], expected);
        }

        // user, assistant(calls), 3 results, final answer
        assert_eq!(report.state.len(), 6);
        assert_eq!(*llm.requests.lock().unwrap(), vec![1, 5]);
        assert_eq!(report.record.tool_calls, 3);
        assert_eq!(report.record.iterations, 1);
    }

    #[tokio::test]
    async fn stops_at_the_iteration_cap() {
        let llm = Arc::new(ScriptedLlm::forever(calls(vec![eval_call("loop", "1")])));
        let (events, mut rx) = EventEmitter::channel();
        let report = agent(llm.clone(), events).run_turn(user_state("never stop")).await;

        assert_eq!(report.outcome, TurnOutcome::Bounded);
        assert_eq!(report.record.iterations, MAX_ITERATIONS);
        assert_eq!(llm.request_count(), MAX_ITERATIONS);
        assert_eq!(tool_messages(&report.state).len(), MAX_ITERATIONS);

        let mut saw_notice = false;
        while let Ok(event) = rx.try_recv() {
            if event
                == (AgentEvent::Message {
                    role: DisplayRole::System,
                    content: BOUNDED_NOTICE.to_string(),
                })
            {
                saw_notice = true;
            }
        }
        assert!(saw_notice);
    }

    #[tokio::test]
    async fn transport_failure_ends_the_turn_and_keeps_prior_state() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Scripted::Reply(calls(vec![eval_call("first", "2 * 21")])),
            Scripted::Fail(LlmError::Http {
                status: 500,
                body: "boom".to_string(),
            }),
        ]));
        let (events, mut rx) = EventEmitter::channel();
        let report = agent(llm.clone(), events).run_turn(user_state("go")).await;

        assert_eq!(report.outcome, TurnOutcome::Failed("HTTP 500: boom".to_string()));
        assert_eq!(report.outcome.phase(), TurnPhase::Failed);
        // user, assistant(call), result; nothing from the failed request
        assert_eq!(report.state.len(), 3);
        assert_eq!(report.state.last().unwrap().role, Role::Tool);
        assert_eq!(llm.request_count(), 2);

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::Message { content, .. } = &event {
                saw_error |= content == "❌ Error: HTTP 500: boom";
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn unknown_tool_is_answered_and_the_loop_continues() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Scripted::Reply(calls(vec![
                ToolCall::new("x", "delete_universe", "{}"),
                eval_call("y", "return 2+2"),
            ])),
            text("I cannot do that."),
        ]));
        let (events, mut rx) = EventEmitter::channel();
        let report = agent(llm, events).run_turn(user_state("destroy")).await;

        assert_eq!(report.outcome, TurnOutcome::Completed);
        let results = tool_messages(&report.state);
        assert_eq!(results.len(), 2);

        let first: serde_json::Value =
            serde_json::from_str(results[0].content.as_deref().unwrap()).unwrap();
        assert_eq!(first["success"], false);
        assert!(first["error"].as_str().unwrap().contains("delete_universe"));

        let second: serde_json::Value =
            serde_json::from_str(results[1].content.as_deref().unwrap()).unwrap();
        assert_eq!(second["displayResult"], "4");

        let mut warnings = 0;
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::Alert {
                level: AlertLevel::Warning,
                ..
            } = event
            {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn every_call_gets_exactly_one_result() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Scripted::Reply(calls(vec![
                eval_call("1", "throw new Error('nope')"),
                ToolCall::new("2", "google_search", "not json"),
                ToolCall::new("3", "google_search", r#"{"query":"rust"}"#),
            ])),
            Scripted::Reply(calls(vec![ToolCall::new("4", "ai_task", r#"{"task":"t"}"#)])),
            text("ok"),
        ]));
        let report = agent(llm, EventEmitter::silent()).run_turn(user_state("mixed")).await;

        assert_eq!(report.outcome, TurnOutcome::Completed);
        let ids: Vec<_> = tool_messages(&report.state)
            .iter()
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert!(report.state.outstanding_call_ids().is_empty());
        assert_eq!(report.record.iterations, 2);
        assert_eq!(
            report.record.tools_used.iter().cloned().collect::<Vec<_>>(),
            vec!["ai_task", "execute_javascript", "google_search"]
        );
    }

    #[tokio::test]
    async fn odd_call_ids_are_still_answered() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Scripted::Reply(calls(vec![
                eval_call("dup", "1"),
                eval_call("dup", "2"),
                eval_call("", "3"),
            ])),
            text("ok"),
        ]));
        let report = agent(llm, EventEmitter::silent()).run_turn(user_state("ids")).await;

        assert_eq!(report.outcome, TurnOutcome::Completed);
        let ids: Vec<_> = tool_messages(&report.state)
            .iter()
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["dup", "dup", ""]);
        assert!(report.state.outstanding_call_ids().is_empty());
    }

    #[test]
    fn summary_mentions_tools() {
        let mut record = RunRecord::start();
        record.iterations = 2;
        record.note_call("google_search");
        record.note_call("google_search");
        assert_eq!(record.summary(), "2 iterations, 2 tool calls (google_search)");
    }
}
