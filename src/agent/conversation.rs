//! Append-only conversation log.

use thiserror::Error;

use crate::llm::{ChatMessage, Role};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversationError {
    #[error("Tool result message is missing its tool_call_id")]
    MissingToolCallId,

    #[error("Tool result for '{0}' does not answer an outstanding call")]
    UnmatchedToolResult(String),

    #[error("Tool result messages must use the tool role")]
    UnexpectedBackReference,
}

/// The ordered message history of one session.
///
/// Messages are only ever appended. A tool-result message is accepted only
/// when it answers a call introduced by the latest assistant message and not
/// already answered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    /// Append any message, checking the tool-result back-reference.
    pub fn push(&mut self, message: ChatMessage) -> Result<(), ConversationError> {
        match (message.role, message.tool_call_id.as_deref()) {
            (Role::Tool, None) => return Err(ConversationError::MissingToolCallId),
            (Role::Tool, Some(id)) => {
                if !self.outstanding_call_ids().contains(&id) {
                    return Err(ConversationError::UnmatchedToolResult(id.to_string()));
                }
            }
            (_, Some(_)) => return Err(ConversationError::UnexpectedBackReference),
            (_, None) => {}
        }
        self.messages.push(message);
        Ok(())
    }

    /// Ids from the latest assistant message that have no result yet.
    pub fn outstanding_call_ids(&self) -> Vec<&str> {
        let Some(start) = self.messages.iter().rposition(|m| m.role == Role::Assistant) else {
            return Vec::new();
        };

        let mut answered: Vec<&str> = self.messages[start + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        // Each result answers one call, so repeated ids need repeated results.
        self.messages[start]
            .requested_tool_calls()
            .iter()
            .map(|call| call.id.as_str())
            .filter(|id| match answered.iter().position(|a| a == id) {
                Some(i) => {
                    answered.swap_remove(i);
                    false
                }
                None => true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;

    fn assistant_calling(ids: &[&str]) -> ChatMessage {
        ChatMessage::assistant(
            None,
            Some(ids.iter().map(|id| ToolCall::new(*id, "google_search", "{}")).collect()),
        )
    }

    #[test]
    fn results_must_answer_outstanding_calls() {
        let mut state = ConversationState::new();
        state.push_user("hi");
        state.push(assistant_calling(&["a", "b"])).unwrap();

        assert_eq!(state.outstanding_call_ids(), vec!["a", "b"]);
        state.push(ChatMessage::tool_result("a", "{}")).unwrap();
        assert_eq!(state.outstanding_call_ids(), vec!["b"]);

        assert_eq!(
            state.push(ChatMessage::tool_result("a", "{}")),
            Err(ConversationError::UnmatchedToolResult("a".to_string()))
        );
        assert_eq!(
            state.push(ChatMessage::tool_result("zzz", "{}")),
            Err(ConversationError::UnmatchedToolResult("zzz".to_string()))
        );
        state.push(ChatMessage::tool_result("b", "{}")).unwrap();
        assert!(state.outstanding_call_ids().is_empty());
        assert_eq!(state.len(), 4);
    }

    #[test]
    fn orphan_result_without_assistant_is_rejected() {
        let mut state = ConversationState::new();
        state.push(ChatMessage::system("sys")).unwrap();
        assert!(state.push(ChatMessage::tool_result("a", "{}")).is_err());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn only_latest_assistant_calls_are_outstanding() {
        let mut state = ConversationState::new();
        state.push(assistant_calling(&["old"])).unwrap();
        state.push(assistant_calling(&["new"])).unwrap();
        assert!(state.push(ChatMessage::tool_result("old", "{}")).is_err());
        assert!(state.push(ChatMessage::tool_result("new", "{}")).is_ok());
    }

    #[test]
    fn malformed_back_references_are_rejected() {
        let mut state = ConversationState::new();
        let mut missing = ChatMessage::tool_result("x", "{}");
        missing.tool_call_id = None;
        assert_eq!(state.push(missing), Err(ConversationError::MissingToolCallId));

        let mut user = ChatMessage::user("hi");
        user.tool_call_id = Some("x".to_string());
        assert_eq!(state.push(user), Err(ConversationError::UnexpectedBackReference));
        assert!(state.is_empty());
    }
}
