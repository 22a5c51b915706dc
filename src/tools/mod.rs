//! Tools module - the callable tools the model may invoke.
//!
//! Three tools exist and the set is closed:
//! - `google_search` ([`WebSearch`]): web search with a synthetic fallback
//! - `execute_javascript` ([`EvaluateCode`]): sandboxed code evaluation
//! - `ai_task` ([`DelegateTask`]): a secondary, tool-less completion
//!
//! Dispatch goes through [`ToolKind`], resolved against the [`ToolRegistry`]
//! at call time. Every call yields exactly one [`ToolResult`]; failures are
//! data, never a panic or an early return out of the agent loop.

mod delegate;
mod eval;
mod web;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::Config;
use crate::events::EventEmitter;
use crate::llm::{FunctionSchema, LlmClient, ToolCall, ToolSchema};

pub use delegate::{DelegateTask, DELEGATE_SYSTEM_PROMPT};
pub use eval::EvaluateCode;
pub use web::{SearchHit, WebSearch};

/// Failure inside a single tool call. Recoverable: it becomes a failed
/// [`ToolResult`] and is fed back to the model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("{0}")]
    Execution(String),
}

/// A tool the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name used in the function-calling schema.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with already-parsed arguments.
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// The closed set of tool kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolKind {
    Search,
    Evaluate,
    Delegate,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [ToolKind::Search, ToolKind::Evaluate, ToolKind::Delegate];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Search => "google_search",
            ToolKind::Evaluate => "execute_javascript",
            ToolKind::Delegate => "ai_task",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Declaration of one registered tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    pub kind: ToolKind,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Declared tools and their schemas. Pure data.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolInfo>,
}

impl ToolRegistry {
    /// Build the registry from tool implementations.
    ///
    /// A tool whose name is not a known [`ToolKind`] is skipped.
    pub fn from_tools(tools: &[&dyn Tool]) -> Self {
        let tools = tools
            .iter()
            .filter_map(|tool| {
                let kind = ToolKind::from_name(tool.name())?;
                Some(ToolInfo {
                    kind,
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                })
            })
            .collect();
        Self { tools }
    }

    pub fn list_tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    /// Schemas in the form the completion endpoint expects.
    pub fn get_tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema {
                schema_type: "function",
                function: FunctionSchema {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Map a requested name to a registered kind.
    pub fn resolve(&self, name: &str) -> Result<ToolKind, ToolError> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.kind)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }
}

/// Outcome of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            payload: json!({ "success": false, "error": error }),
            error: Some(error),
        }
    }

    /// Text fed back to the model as the tool message content.
    pub fn to_message_content(&self) -> String {
        serde_json::to_string_pretty(&self.payload).unwrap_or_else(|_| self.payload.to_string())
    }
}

/// Executes tool calls by closed-kind dispatch.
pub struct ToolExecutor {
    registry: ToolRegistry,
    search: WebSearch,
    evaluate: EvaluateCode,
    delegate: DelegateTask,
}

impl ToolExecutor {
    /// Build the executor. Without an LLM client `ai_task` stays declared but
    /// every call to it fails.
    pub fn new(config: &Config, llm: Option<Arc<dyn LlmClient>>, events: EventEmitter) -> Self {
        let search = WebSearch::new(config.search.clone(), events.clone());
        let evaluate = EvaluateCode::new(config.eval_max_steps, events.clone());
        let delegate = DelegateTask::new(llm, events);
        let registry = ToolRegistry::from_tools(&[&search as &dyn Tool, &evaluate, &delegate]);

        Self {
            registry,
            search,
            evaluate,
            delegate,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute one call. Always returns a result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.dispatch(call).await {
            Ok(payload) => ToolResult::ok(payload),
            Err(e) => {
                tracing::warn!(tool = %call.function.name, call_id = %call.id, error = %e, "Tool call failed");
                ToolResult::failed(e.to_string())
            }
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let kind = self.registry.resolve(&call.function.name)?;
        let args = parse_arguments(kind.name(), &call.function.arguments)?;

        tracing::info!(tool = kind.name(), call_id = %call.id, "Executing tool");

        match kind {
            ToolKind::Search => self.search.execute(args).await,
            ToolKind::Evaluate => self.evaluate.execute(args).await,
            ToolKind::Delegate => self.delegate.execute(args).await,
        }
    }
}

/// Parse a serialized arguments payload. Blank means no arguments.
pub fn parse_arguments(tool: &str, raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let args: Value = serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: format!("arguments are not valid JSON: {}", e),
    })?;

    if !args.is_object() {
        return Err(ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: "arguments must be a JSON object".to_string(),
        });
    }

    Ok(args)
}

/// A required string argument.
fn required_str<'a>(args: &'a Value, tool: &str, field: &str) -> Result<&'a str, ToolError> {
    args[field].as_str().ok_or_else(|| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: format!("missing '{}' argument", field),
    })
}

/// An optional string argument; blank counts as absent.
fn optional_str<'a>(args: &'a Value, field: &str) -> Option<&'a str> {
    args[field].as_str().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmSettings;

    fn executor() -> ToolExecutor {
        let config = Config::new(LlmSettings::new("https://api.openai.com/v1", "", "m"));
        ToolExecutor::new(&config, None, EventEmitter::silent())
    }

    #[test]
    fn kinds_round_trip_names() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("delete_universe"), None);
    }

    #[test]
    fn registry_declares_all_three_tools() {
        let exec = executor();
        let names: Vec<_> = exec.registry().list_tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["google_search", "execute_javascript", "ai_task"]);

        let schemas = exec.registry().get_tool_schemas();
        assert_eq!(schemas.len(), 3);
        assert_eq!(schemas[1].schema_type, "function");
        assert_eq!(schemas[1].function.parameters["required"], json!(["code"]));
    }

    #[test]
    fn argument_parsing() {
        assert_eq!(parse_arguments("t", "").unwrap(), json!({}));
        assert_eq!(parse_arguments("t", r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(matches!(
            parse_arguments("t", "{not json"),
            Err(ToolError::InvalidArguments { .. })
        ));
        assert!(matches!(
            parse_arguments("t", "[1]"),
            Err(ToolError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn failed_result_content_carries_the_error() {
        let result = ToolResult::failed("Unknown tool: x");
        let content: Value = serde_json::from_str(&result.to_message_content()).unwrap();
        assert_eq!(content, json!({"success": false, "error": "Unknown tool: x"}));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result_naming_the_tool() {
        let result = executor()
            .execute(&ToolCall::new("c1", "delete_universe", "{}"))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("delete_universe"));
    }

    #[tokio::test]
    async fn malformed_arguments_do_not_escape() {
        let result = executor()
            .execute(&ToolCall::new("c1", "execute_javascript", "{\"code\":"))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Invalid arguments for execute_javascript"));
    }

    #[tokio::test]
    async fn evaluate_two_plus_two() {
        let result = executor()
            .execute(&ToolCall::new("c1", "execute_javascript", r#"{"code":"return 2+2","description":""}"#))
            .await;
        assert!(result.success);
        assert_eq!(result.payload["displayResult"], "4");
    }

    #[tokio::test]
    async fn delegate_without_llm_fails_cleanly() {
        let result = executor()
            .execute(&ToolCall::new("c1", "ai_task", r#"{"task":"summarize"}"#))
            .await;
        assert!(!result.success);
    }
}
