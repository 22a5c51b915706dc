//! Display-layer events.
//!
//! The core never renders anything itself; it emits [`AgentEvent`]s and the
//! front end decides how to show them. Emission never fails: a missing or
//! closed receiver is ignored.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::tools::SearchHit;

/// Who a displayed message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayRole {
    User,
    Assistant,
    System,
}

/// Severity of a transient alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Success,
    Warning,
    Danger,
}

/// Events consumed by the display layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A role-tagged chat line.
    Message { role: DisplayRole, content: String },
    /// Short status-bar text.
    Status { text: String },
    /// Transient alert.
    Alert { level: AlertLevel, message: String },
    /// Code about to be evaluated.
    CodeBlock { code: String },
    /// Output of an evaluation.
    CodeResult { output: String, success: bool },
    /// Search hits, flagged when they are placeholders.
    SearchResults {
        results: Vec<SearchHit>,
        synthetic: bool,
    },
    /// A turn reached its terminal state.
    TurnFinished { summary: String },
}

/// Cheap cloneable handle for emitting events.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// An emitter that drops everything.
    pub fn silent() -> Self {
        Self { tx: None }
    }

    /// Create an emitter together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is watching; the turn carries on.
            let _ = tx.send(event);
        }
    }

    pub fn message(&self, role: DisplayRole, content: impl Into<String>) {
        self.emit(AgentEvent::Message {
            role,
            content: content.into(),
        });
    }

    pub fn system(&self, content: impl Into<String>) {
        self.message(DisplayRole::System, content);
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(AgentEvent::Status { text: text.into() });
    }

    pub fn alert(&self, level: AlertLevel, message: impl Into<String>) {
        self.emit(AgentEvent::Alert {
            level,
            message: message.into(),
        });
    }
}
