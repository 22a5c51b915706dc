//! Keyword-driven demo used when no LLM is configured.
//!
//! There is no model in the loop here: the input is matched against a few
//! keywords and canned tool invocations are run directly.

use serde_json::json;

use crate::config::Config;
use crate::events::{DisplayRole, EventEmitter};
use crate::tools::{EvaluateCode, Tool, WebSearch};

pub const DEMO_NOTICE: &str = "⚠️ LLM not configured. Running in demo mode with limited functionality.";

const GREETING: &str = "Hello! I'm working in demo mode. Here's what I can do:\n\n\
🧮 Try: \"Calculate 15% tip on $84\"\n\
🔍 Try: \"Search for latest AI news\"\n\
💻 Try: \"Generate fibonacci numbers\"\n\
🔢 Try: \"Sort array [3,1,4,1,5]\"\n\n\
🚀 Set LLM_API_KEY for full AI capabilities!";

const HELP: &str = "Demo mode active! I can demonstrate:\n\n\
• ✨ **JavaScript execution** - \"calculate tip\" or \"fibonacci\"\n\
• 🔍 **Search simulation** - \"search for information\"\n\
• 🤖 **Tool usage** - \"sort an array\"\n\n\
Set LLM_API_KEY for intelligent conversation and automatic tool selection!";

/// A canned evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snippet {
    pub description: &'static str,
    pub code: &'static str,
}

const FIBONACCI: Snippet = Snippet {
    description: "Generate Fibonacci sequence up to 10 numbers",
    code: "function fibonacci(n) {
    let fib = [0, 1];
    for (let i = 2; i < n; i++) {
        fib[i] = fib[i-1] + fib[i-2];
    }
    return fib.slice(0, n);
}

return fibonacci(10);",
};

const TIP: Snippet = Snippet {
    description: "Calculate tip amount",
    code: "const bill = 84;
const tipPercent = 15;
const tipAmount = (bill * tipPercent) / 100;
const total = bill + tipAmount;

return {
    bill: bill,
    tipPercent: tipPercent + '%',
    tipAmount: tipAmount,
    total: total
};",
};

const SORT: Snippet = Snippet {
    description: "Sort array of numbers",
    code: "const array = [3, 1, 4, 1, 5, 9, 2, 6];
const sorted = [...array].sort((a, b) => a - b);

return {
    original: array,
    sorted: sorted
};",
};

const MATH: Snippet = Snippet {
    description: "Mathematical calculation example",
    code: "const result = Math.pow(2, 8) + Math.sqrt(144);
return {
    calculation: \"2^8 + √144\",
    result: result
};",
};

/// What the demo decided to do with an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoAction {
    Evaluate(Snippet),
    Search,
    Greeting,
    Help,
}

/// Pick the demo action for a user input.
pub fn classify(input: &str) -> DemoAction {
    let message = input.to_lowercase();
    let has = |word: &str| message.contains(word);

    if ["calculate", "math", "fibonacci", "javascript", "tip", "sort"]
        .iter()
        .any(|w| has(w))
    {
        let snippet = if has("fibonacci") {
            FIBONACCI
        } else if has("tip") {
            TIP
        } else if has("sort") {
            SORT
        } else {
            MATH
        };
        DemoAction::Evaluate(snippet)
    } else if has("search") {
        DemoAction::Search
    } else if has("test") || has("hello") {
        DemoAction::Greeting
    } else {
        DemoAction::Help
    }
}

/// Answers user input without a model.
pub struct DemoResponder {
    evaluate: EvaluateCode,
    search: WebSearch,
    events: EventEmitter,
}

impl DemoResponder {
    pub fn new(config: &Config, events: EventEmitter) -> Self {
        Self {
            evaluate: EvaluateCode::new(config.eval_max_steps, events.clone()),
            search: WebSearch::new(config.search.clone(), events.clone()),
            events,
        }
    }

    /// Respond to one input through the event stream.
    pub async fn respond(&self, input: &str) -> DemoAction {
        let action = classify(input);
        tracing::debug!(?action, "Demo response");

        match action {
            DemoAction::Evaluate(snippet) => {
                self.events.message(
                    DisplayRole::Assistant,
                    "I can help with calculations! Let me execute some JavaScript for you.",
                );
                let args = json!({ "code": snippet.code, "description": snippet.description });
                // The tool reports failures through events already.
                if let Err(e) = self.evaluate.execute(args).await {
                    tracing::warn!(error = %e, "Demo snippet failed");
                }
            }
            DemoAction::Search => {
                self.events
                    .message(DisplayRole::Assistant, "I can search for information!");
                if let Err(e) = self.search.execute(json!({ "query": input })).await {
                    tracing::warn!(error = %e, "Demo search failed");
                }
            }
            DemoAction::Greeting => self.events.message(DisplayRole::Assistant, GREETING),
            DemoAction::Help => self.events.message(DisplayRole::Assistant, HELP),
        }

        action
    }
}
