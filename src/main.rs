//! Agentic Chat - terminal front end.
//!
//! Reads user input line by line and renders the agent's event stream to
//! stdout. Logs go to stderr.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use agentic_chat::agent::{AgentLoop, ConversationState};
use agentic_chat::config::Config;
use agentic_chat::demo::{DemoResponder, DEMO_NOTICE};
use agentic_chat::events::{AgentEvent, AlertLevel, DisplayRole, EventEmitter};
use agentic_chat::llm::{describe_connection_error, LlmClient, OpenAiClient};
use agentic_chat::tools::ToolExecutor;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "Commands: /test (check the LLM connection), /reset (new conversation), /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentic_chat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        model = %config.llm.model,
        endpoint = config.llm.endpoint_label(),
        configured = config.llm.is_configured(),
        search = config.search.credentials().is_some(),
        "Loaded configuration"
    );

    let (events, mut rx) = EventEmitter::channel();

    let client = if config.llm.is_configured() {
        Some(Arc::new(OpenAiClient::new(config.llm.clone())?))
    } else {
        None
    };

    let agent = client.as_ref().map(|client| {
        let llm: Arc<dyn LlmClient> = client.clone();
        let tools = ToolExecutor::new(&config, Some(llm.clone()), events.clone());
        AgentLoop::new(llm, tools, events.clone())
    });
    let demo = DemoResponder::new(&config, events.clone());

    match &client {
        Some(client) => println!(
            "Agentic Chat - {} via {}",
            client.settings().model,
            client.settings().endpoint_label()
        ),
        None => println!("Agentic Chat - demo mode (set LLM_API_KEY to enable the agent)"),
    }
    println!("{}", HELP);

    let mut state = ConversationState::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/reset" => {
                state = ConversationState::new();
                events.system("🔄 Conversation reset.");
            }
            "/test" => match &client {
                Some(client) => {
                    events.status("Testing connection...");
                    match drive(client.test_connection(), &mut rx).await {
                        Ok(reply) => events.alert(
                            AlertLevel::Success,
                            format!("✅ Connection successful! Response: {}", reply),
                        ),
                        Err(e) => events.alert(
                            AlertLevel::Danger,
                            format!("❌ Connection failed: {}", describe_connection_error(&e)),
                        ),
                    }
                }
                None => events.alert(
                    AlertLevel::Warning,
                    "LLM not configured. Set LLM_API_KEY (and optionally LLM_BASE_URL).",
                ),
            },
            _ => match &agent {
                Some(agent) => {
                    state.push_user(input);
                    let report = drive(agent.run_turn(std::mem::take(&mut state)), &mut rx).await;
                    state = report.state;
                }
                None => {
                    events.system(DEMO_NOTICE);
                    drive(demo.respond(input), &mut rx).await;
                }
            },
        }

        while let Ok(event) = rx.try_recv() {
            render(&event);
        }
    }

    Ok(())
}

/// Await `work` while rendering events as they arrive.
async fn drive<F: Future>(work: F, rx: &mut UnboundedReceiver<AgentEvent>) -> F::Output {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => {
                while let Ok(event) = rx.try_recv() {
                    render(&event);
                }
                return output;
            }
            Some(event) = rx.recv() => render(&event),
        }
    }
}

fn render(event: &AgentEvent) {
    match event {
        // Already on screen as typed.
        AgentEvent::Message {
            role: DisplayRole::User,
            ..
        } => {}
        AgentEvent::Message {
            role: DisplayRole::Assistant,
            content,
        } => println!("\n🤖 {}", content),
        AgentEvent::Message {
            role: DisplayRole::System,
            content,
        } => println!("\n{}", content),
        AgentEvent::Status { text } => println!("  · {}", text),
        AgentEvent::Alert { level, message } => {
            let tag = match level {
                AlertLevel::Info => "info",
                AlertLevel::Success => "ok",
                AlertLevel::Warning => "warning",
                AlertLevel::Danger => "error",
            };
            println!("[{}] {}", tag, message);
        }
        AgentEvent::CodeBlock { code } => println!("```javascript\n{}\n```", code.trim()),
        AgentEvent::CodeResult { output, success } => {
            let mark = if *success { "✔" } else { "✘" };
            println!("{} Execution Result:\n{}", mark, output);
        }
        AgentEvent::SearchResults { results, synthetic } => {
            println!("{}Search Results", if *synthetic { "Synthetic " } else { "" });
            for (i, hit) in results.iter().enumerate() {
                println!("  {}. {}\n     {}\n     {}", i + 1, hit.title, hit.link, hit.snippet);
            }
        }
        AgentEvent::TurnFinished { summary } => println!("\n-- {}", summary),
    }
}
