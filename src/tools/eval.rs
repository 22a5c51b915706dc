//! Sandboxed code evaluation tool.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, required_str, Tool, ToolError};
use crate::events::{AgentEvent, EventEmitter};
use crate::sandbox::{self, Limits};

/// Evaluate a JavaScript snippet in the restricted interpreter.
pub struct EvaluateCode {
    limits: Limits,
    events: EventEmitter,
}

impl EvaluateCode {
    pub fn new(max_steps: u64, events: EventEmitter) -> Self {
        Self {
            limits: Limits::with_max_steps(max_steps),
            events,
        }
    }
}

#[async_trait]
impl Tool for EvaluateCode {
    fn name(&self) -> &str {
        "execute_javascript"
    }

    fn description(&self) -> &str {
        "Execute JavaScript code in a sandbox. Use this for calculations, data processing, or demonstrations. Always return the result. There is no network, file system or DOM access."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The JavaScript code to execute. Make sure to return a value."
                },
                "description": {
                    "type": "string",
                    "description": "Brief description of what the code does"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let code = required_str(&args, self.name(), "code")?;
        let description = optional_str(&args, "description");

        self.events.system(format!(
            "💻 Executing JavaScript: {}",
            description.unwrap_or("Code execution")
        ));
        self.events.emit(AgentEvent::CodeBlock {
            code: code.to_string(),
        });

        match sandbox::evaluate_isolated(code.to_string(), self.limits.clone()).await {
            Ok(evaluation) => {
                tracing::debug!(display = %evaluation.display, logs = evaluation.logs.len(), "Evaluation finished");
                self.events.emit(AgentEvent::CodeResult {
                    output: evaluation.display.clone(),
                    success: true,
                });

                let mut payload = json!({
                    "code": code,
                    "description": description,
                    "result": evaluation.value,
                    "displayResult": evaluation.display,
                    "success": true,
                });
                if !evaluation.logs.is_empty() {
                    payload["logs"] = json!(evaluation.logs);
                }
                Ok(payload)
            }
            Err(e) => {
                self.events.emit(AgentEvent::CodeResult {
                    output: format!("Error: {}", e),
                    success: false,
                });
                Err(ToolError::Execution(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EVAL_MAX_STEPS;
    use crate::sandbox::NO_VALUE_DISPLAY;

    fn tool() -> EvaluateCode {
        EvaluateCode::new(DEFAULT_EVAL_MAX_STEPS, EventEmitter::silent())
    }

    #[tokio::test]
    async fn return_two_plus_two_is_always_four() {
        for _ in 0..3 {
            let payload = tool()
                .execute(json!({"code": "return 2+2", "description": ""}))
                .await
                .unwrap();
            assert_eq!(payload["displayResult"], "4");
            assert_eq!(payload["result"], 4);
            assert_eq!(payload["success"], true);
            assert_eq!(payload["description"], Value::Null);
        }
    }

    #[tokio::test]
    async fn no_value_uses_the_sentinel() {
        let payload = tool().execute(json!({"code": "let a = 1;"})).await.unwrap();
        assert_eq!(payload["displayResult"], NO_VALUE_DISPLAY);
        assert_eq!(payload["result"], Value::Null);
    }

    #[tokio::test]
    async fn logs_are_included_when_present() {
        let payload = tool()
            .execute(json!({"code": "console.log('step'); return 1"}))
            .await
            .unwrap();
        assert_eq!(payload["logs"], json!(["step"]));
    }

    #[tokio::test]
    async fn thrown_errors_become_tool_errors() {
        let (events, mut rx) = EventEmitter::channel();
        let tool = EvaluateCode::new(DEFAULT_EVAL_MAX_STEPS, events);

        let err = tool
            .execute(json!({"code": "throw new TypeError('bad input')", "description": "fails"}))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Execution("TypeError: bad input".to_string()));

        let mut outputs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::CodeResult { output, success } = event {
                assert!(!success);
                outputs.push(output);
            }
        }
        assert_eq!(outputs, vec!["Error: TypeError: bad input".to_string()]);
    }

    #[tokio::test]
    async fn step_budget_comes_from_config() {
        let tool = EvaluateCode::new(500, EventEmitter::silent());
        let err = tool.execute(json!({"code": "for (;;) {}"})).await.unwrap_err();
        assert!(err.to_string().contains("step limit of 500"));
    }
}
