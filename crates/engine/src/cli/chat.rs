//! `palaver chat`: line-oriented conversation on stdin.
//!
//! Every line is one turn on the same conversation.  Background tasks run
//! for the lifetime of the session and are shut down on EOF or `/quit`.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use pv_domain::config::Config;

use crate::bootstrap;
use crate::cli::local_collaborators;
use crate::runtime::{run_turn_streaming, TurnEvent, TurnOptions};

pub async fn chat(
    config: Arc<Config>,
    session: Option<String>,
    model: Option<String>,
) -> anyhow::Result<()> {
    let engine = bootstrap::build_engine(config, local_collaborators())?;
    let tasks = bootstrap::spawn_background_tasks(&engine);

    let mut conversation_id = session;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            _ => {}
        }

        let mut options = TurnOptions::text(line);
        options.conversation_id = conversation_id.clone();
        options.model = model.clone();

        let (tx, mut rx) = mpsc::channel::<TurnEvent>(64);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    TurnEvent::AssistantDelta { text } => {
                        print!("{text}");
                        std::io::stdout().flush().ok();
                    }
                    TurnEvent::ToolCall { tool_name, .. } => {
                        eprintln!("\x1b[2m[tool: {tool_name}]\x1b[0m");
                    }
                    _ => {}
                }
            }
        });

        let result = run_turn_streaming(&engine, options, tx).await;
        printer.await.ok();
        println!();

        match result {
            Ok(outcome) => {
                if !outcome.meta.sources.is_empty() {
                    let labels: Vec<_> =
                        outcome.meta.sources.iter().map(|s| s.label.as_str()).collect();
                    eprintln!("\x1b[2m[sources: {}]\x1b[0m", labels.join(", "));
                }
                conversation_id = Some(outcome.conversation_id);
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }

    tasks.shutdown().await;
    Ok(())
}
