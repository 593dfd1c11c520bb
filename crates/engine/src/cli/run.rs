//! `palaver run`: one-shot execution command.
//!
//! Runs a single turn, streams the response to stdout, and exits.  The
//! conversation id goes to stderr so the next invocation can continue it
//! with `--session`.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;

use pv_domain::config::Config;

use crate::bootstrap;
use crate::cli::local_collaborators;
use crate::runtime::{run_turn_streaming, TurnEvent, TurnOptions};

pub async fn run(
    config: Arc<Config>,
    message: String,
    session: Option<String>,
    model: Option<String>,
    json_output: bool,
) -> anyhow::Result<()> {
    // 1. Boot the engine (without background tasks).
    let engine = bootstrap::build_engine(config, local_collaborators())?;

    let mut options = TurnOptions::text(message);
    options.conversation_id = session;
    options.model = model;

    // 2. Print events while the turn runs.
    let (tx, mut rx) = mpsc::channel::<TurnEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if json_output {
                continue;
            }
            match event {
                TurnEvent::AssistantDelta { text } => {
                    print!("{text}");
                    std::io::stdout().flush().ok();
                }
                TurnEvent::ToolCall { tool_name, .. } => {
                    eprintln!("\x1b[2m[tool: {tool_name}]\x1b[0m");
                }
                TurnEvent::ToolResult {
                    tool_name,
                    is_error: true,
                    ..
                } => {
                    eprintln!("\x1b[2m[tool failed: {tool_name}]\x1b[0m");
                }
                _ => {}
            }
        }
    });

    let result = run_turn_streaming(&engine, options, tx).await;
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "event printer ended abnormally");
    }

    // 3. Flush session store before exit.
    if let Err(e) = engine.sessions.flush().await {
        tracing::warn!(error = %e, "session store flush on exit failed");
    }

    let outcome = result?;
    if json_output {
        let json = serde_json::to_string_pretty(&outcome)
            .map_err(|e| anyhow::anyhow!("serializing turn outcome: {e}"))?;
        println!("{json}");
    } else {
        println!();
        eprintln!("conversation: {}", outcome.conversation_id);
    }

    Ok(())
}
