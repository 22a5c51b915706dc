//! Secondary model call for focused reasoning or generation tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, required_str, Tool, ToolError};
use crate::events::EventEmitter;
use crate::llm::{ChatMessage, CompletionOptions, LlmClient};

pub const DELEGATE_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant performing a specific task. Be concise and accurate.";

/// Hand a task to an independent, tool-less completion.
pub struct DelegateTask {
    llm: Option<Arc<dyn LlmClient>>,
    events: EventEmitter,
}

impl DelegateTask {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, events: EventEmitter) -> Self {
        Self { llm, events }
    }
}

fn task_messages(task: &str, context: Option<&str>) -> Vec<ChatMessage> {
    let user = match context {
        Some(context) => format!("Task: {}\n\nContext: {}", task, context),
        None => format!("Task: {}", task),
    };
    vec![ChatMessage::system(DELEGATE_SYSTEM_PROMPT), ChatMessage::user(user)]
}

#[async_trait]
impl Tool for DelegateTask {
    fn name(&self) -> &str {
        "ai_task"
    }

    fn description(&self) -> &str {
        "Use AI for complex reasoning, analysis, or generation tasks that require advanced language model capabilities."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The AI task to perform"
                },
                "context": {
                    "type": "string",
                    "description": "Additional context for the task"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let task = required_str(&args, self.name(), "task")?;
        let context = optional_str(&args, "context");

        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| ToolError::Execution("ai_task requires a configured LLM".to_string()))?;

        self.events.system(format!("🤖 Performing AI task: {}", task));

        // Unlike the primary call, a transport failure here is recoverable.
        let reply = llm
            .chat_completion(&task_messages(task, context), None, &CompletionOptions::DELEGATE)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let result = reply.content.unwrap_or_default();
        self.events.system(format!("📝 AI Task Result:\n{}", result));

        Ok(json!({
            "task": task,
            "context": context,
            "result": result,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, Role, ToolSchema};
    use std::sync::Mutex;

    /// Records the single request it receives.
    struct Recorder {
        reply: Result<String, u16>,
        seen: Mutex<Option<(Vec<ChatMessage>, bool, CompletionOptions)>>,
    }

    #[async_trait]
    impl LlmClient for Recorder {
        async fn chat_completion(
            &self,
            messages: &[ChatMessage],
            tools: Option<&[ToolSchema]>,
            options: &CompletionOptions,
        ) -> Result<ChatMessage, LlmError> {
            *self.seen.lock().unwrap() = Some((messages.to_vec(), tools.is_some(), *options));
            match &self.reply {
                Ok(text) => Ok(ChatMessage::assistant(Some(text.clone()), None)),
                Err(status) => Err(LlmError::Http {
                    status: *status,
                    body: "upstream down".to_string(),
                }),
            }
        }
    }

    fn recorder(reply: Result<String, u16>) -> Arc<Recorder> {
        Arc::new(Recorder {
            reply,
            seen: Mutex::new(None),
        })
    }

    #[tokio::test]
    async fn sends_task_and_context_without_tools() {
        let llm = recorder(Ok("Paris".to_string()));
        let tool = DelegateTask::new(Some(llm.clone() as Arc<dyn LlmClient>), EventEmitter::silent());

        let payload = tool
            .execute(json!({"task": "Capital of France?", "context": "geography quiz"}))
            .await
            .unwrap();
        assert_eq!(payload, json!({"task": "Capital of France?", "context": "geography quiz", "result": "Paris"}));

        let (messages, had_tools, options) = llm.seen.lock().unwrap().clone().unwrap();
        assert!(!had_tools);
        assert_eq!(options, CompletionOptions::DELEGATE);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[1].content.as_deref(),
            Some("Task: Capital of France?\n\nContext: geography quiz")
        );
    }

    #[tokio::test]
    async fn empty_context_is_omitted() {
        let llm = recorder(Ok("ok".to_string()));
        let tool = DelegateTask::new(Some(llm.clone() as Arc<dyn LlmClient>), EventEmitter::silent());
        tool.execute(json!({"task": "t", "context": ""})).await.unwrap();

        let (messages, _, _) = llm.seen.lock().unwrap().clone().unwrap();
        assert_eq!(messages[1].content.as_deref(), Some("Task: t"));
    }

    #[tokio::test]
    async fn transport_failure_is_a_tool_error() {
        let tool = DelegateTask::new(Some(recorder(Err(503)) as Arc<dyn LlmClient>), EventEmitter::silent());
        let err = tool.execute(json!({"task": "t"})).await.unwrap_err();
        assert_eq!(err, ToolError::Execution("HTTP 503: upstream down".to_string()));
    }
}
