//! OpenAI-compatible `POST {base}/chat/completions` client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ChatMessage, CompletionOptions, ToolCall, ToolSchema};
use super::{LlmClient, LlmError};
use crate::config::LlmSettings;

/// User prompt sent by [`OpenAiClient::test_connection`].
pub const CONNECTION_TEST_PROMPT: &str = "Say \"Connection test successful\" if you can read this.";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolSchema]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

/// `choices[0].message`. Role is implied.
#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl OpenAiClient {
    /// Build a client. Refuses unconfigured settings (empty key or base URL).
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        if !settings.is_configured() {
            return Err(LlmError::NotConfigured);
        }

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }

    /// Send a minimal request and return the model's textual reply.
    pub async fn test_connection(&self) -> Result<String, LlmError> {
        let messages = [ChatMessage::user(CONNECTION_TEST_PROMPT)];
        let reply = self
            .chat_completion(&messages, None, &CompletionOptions::CONNECTION_TEST)
            .await?;
        Ok(reply.content.unwrap_or_default())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
        options: &CompletionOptions,
    ) -> Result<ChatMessage, LlmError> {
        let body = build_request(&self.settings.model, messages, tools, options);

        tracing::debug!(
            model = %self.settings.model,
            messages = messages.len(),
            tools = tools.map(|t| t.len()).unwrap_or(0),
            "Sending chat completion request"
        );

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.settings.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_completion(&text)
    }
}

fn build_request<'a>(
    model: &'a str,
    messages: &'a [ChatMessage],
    tools: Option<&'a [ToolSchema]>,
    options: &CompletionOptions,
) -> ChatCompletionRequest<'a> {
    let tools = tools.filter(|t| !t.is_empty());
    ChatCompletionRequest {
        model,
        messages,
        tools,
        tool_choice: tools.map(|_| "auto"),
        temperature: options.temperature,
        max_tokens: options.max_tokens,
    }
}

/// Extract `choices[0].message` from a successful response body.
fn parse_completion(body: &str) -> Result<ChatMessage, LlmError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Decode(e.to_string()))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?;

    Ok(ChatMessage::assistant(
        choice.message.content,
        choice.message.tool_calls,
    ))
}

/// Translate a connection failure into advice for the user.
pub fn describe_connection_error(error: &LlmError) -> String {
    match error {
        LlmError::Network(_) => {
            "Network error - the endpoint could not be reached. Check the base URL and your connection."
                .to_string()
        }
        LlmError::Http { status, body } => {
            let lower = body.to_lowercase();
            if *status == 401 || lower.contains("unauthorized") {
                "Invalid API key. Please check your credentials.".to_string()
            } else if lower.contains("quota") || lower.contains("billing") {
                "API quota exceeded or billing issue. Check your account.".to_string()
            } else {
                provider_error_message(body).unwrap_or_else(|| format!("HTTP {}", status))
            }
        }
        other => other.to_string(),
    }
}

/// `error.message` from an OpenAI-style error body.
fn provider_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FunctionSchema, Role};
    use serde_json::json;

    fn schema() -> ToolSchema {
        ToolSchema {
            schema_type: "function",
            function: FunctionSchema {
                name: "google_search".to_string(),
                description: "Search".to_string(),
                parameters: json!({"type": "object"}),
            },
        }
    }

    #[test]
    fn request_with_tools_sets_auto_tool_choice() {
        let messages = vec![ChatMessage::user("hi")];
        let tools = vec![schema()];
        let body = build_request("gpt-4o-mini", &messages, Some(tools.as_slice()), &CompletionOptions::AGENT);
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["tool_choice"], "auto");
        assert_eq!(value["tools"][0]["function"]["name"], "google_search");
        assert!((value["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn connection_test_request_has_no_tools() {
        let messages = vec![ChatMessage::user(CONNECTION_TEST_PROMPT)];
        let body = build_request("m", &messages, None, &CompletionOptions::CONNECTION_TEST);
        let value = serde_json::to_value(&body).unwrap();

        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
        assert_eq!(value["max_tokens"], 10);
        assert_eq!(value["temperature"], 0.0);
    }

    #[test]
    fn parses_tool_calls_from_first_choice() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "execute_javascript", "arguments": "{\"code\":\"1+1\"}"}
                    }]
                }
            }]
        })
        .to_string();

        let msg = parse_completion(&body).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.content.is_none());
        assert_eq!(msg.requested_tool_calls().len(), 1);
        assert_eq!(msg.requested_tool_calls()[0].id, "call_abc");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = parse_completion(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));

        let err = parse_completion("not json").unwrap_err();
        assert!(matches!(err, LlmError::Decode(_)));
    }

    fn client(base_url: String) -> OpenAiClient {
        OpenAiClient::new(LlmSettings::new(base_url, "sk-test", "gpt-4o-mini")).unwrap()
    }

    #[tokio::test]
    async fn non_success_status_is_an_http_error() {
        let body = r#"{"error":{"message":"upstream exploded"}}"#;
        let base = crate::testing::serve_once("500 Internal Server Error", body).await;

        let err = client(base)
            .chat_completion(&[ChatMessage::user("hi")], None, &CompletionOptions::AGENT)
            .await
            .unwrap_err();
        match err {
            LlmError::Http { status, body: text } => {
                assert_eq!(status, 500);
                assert_eq!(text, body);
            }
            other => panic!("expected an HTTP error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn successful_response_yields_the_assistant_message() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "Connection test successful"}}]});
        let base = crate::testing::serve_once("200 OK", &body.to_string()).await;

        let reply = client(base).test_connection().await.unwrap();
        assert_eq!(reply, "Connection test successful");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let base = crate::testing::closed_endpoint().await;
        let err = client(base).test_connection().await.unwrap_err();
        assert!(matches!(err, LlmError::Network(_)));
    }

    #[test]
    fn unconfigured_settings_are_rejected() {
        let settings = LlmSettings::new("https://api.openai.com/v1", "", "m");
        assert!(matches!(OpenAiClient::new(settings), Err(LlmError::NotConfigured)));
    }

    #[test]
    fn friendly_connection_errors() {
        let unauthorized = LlmError::Http {
            status: 401,
            body: "{}".to_string(),
        };
        assert_eq!(
            describe_connection_error(&unauthorized),
            "Invalid API key. Please check your credentials."
        );

        let quota = LlmError::Http {
            status: 429,
            body: r#"{"error":{"message":"You exceeded your current quota"}}"#.to_string(),
        };
        assert!(describe_connection_error(&quota).starts_with("API quota exceeded"));

        let provider = LlmError::Http {
            status: 404,
            body: r#"{"error":{"message":"The model does not exist"}}"#.to_string(),
        };
        assert_eq!(describe_connection_error(&provider), "The model does not exist");

        let plain = LlmError::Http {
            status: 502,
            body: "<html>bad gateway</html>".to_string(),
        };
        assert_eq!(describe_connection_error(&plain), "HTTP 502");

        let network = LlmError::Network("connection refused".to_string());
        assert!(describe_connection_error(&network).starts_with("Network error"));
    }
}
