//! Agent module - the agentic tool-use loop.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. The caller appends the user's message to a [`ConversationState`]
//! 2. Call the LLM with the full history and the tool schemas
//! 3. If the LLM requests tool calls, execute them in order and append one
//!    result per call
//! 4. Repeat until the LLM answers without tools, the iteration cap is
//!    reached, or the completion endpoint fails

mod agent_loop;
mod conversation;

pub use agent_loop::{
    AgentLoop, RunRecord, TurnOutcome, TurnPhase, TurnReport, BOUNDED_ADVISORY, BOUNDED_NOTICE,
    COMPLETION_MESSAGE, MAX_ITERATIONS,
};
pub use conversation::{ConversationError, ConversationState};
