//! # Agentic Chat
//!
//! An interactive chat agent that lets an LLM call tools on its own.
//!
//! This library provides:
//! - A bounded tool-use loop over an OpenAI-compatible completion endpoint
//! - Three tools: web search, sandboxed JavaScript evaluation, and a
//!   secondary delegate completion
//! - A restricted in-process JavaScript interpreter backing evaluation
//! - An event stream for whatever front end renders the conversation
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Append the user's message to the conversation
//! 2. Call the LLM with the full history and the tool schemas
//! 3. Execute any requested tool calls in order, appending one result each
//! 4. Repeat until the LLM answers without tools or 10 iterations have run
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agentic_chat::{agent::{AgentLoop, ConversationState}, config::Config};
//! use agentic_chat::{events::EventEmitter, llm::{LlmClient, OpenAiClient}, tools::ToolExecutor};
//!
//! let config = Config::from_env()?;
//! let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(config.llm.clone())?);
//! let (events, _rx) = EventEmitter::channel();
//! let tools = ToolExecutor::new(&config, Some(llm.clone()), events.clone());
//! let agent = AgentLoop::new(llm, tools, events);
//!
//! let mut state = ConversationState::new();
//! state.push_user("What is the 20th Fibonacci number?");
//! let report = agent.run_turn(state).await;
//! ```

pub mod agent;
pub mod config;
pub mod demo;
pub mod events;
pub mod llm;
pub mod sandbox;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::Config;
