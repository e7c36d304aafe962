//! Headless text adventure.
//!
//! Reads player actions from stdin, one per line, and streams the narration
//! to stdout. Ctrl-C interrupts the narration in progress, or saves and exits
//! when no narration is running.
//!
//! ```bash
//! OLLAMA_HOST=http://localhost:11434 ADVENTURE_MODEL=llama3.2 cargo run -p adventure-core
//! ```

use adventure_core::{AdventureSession, FileStore, SessionConfig};
use ollama::Ollama;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::warn;

const HELP: &str = "\
Commands:
  #status         - Show where you are and what you carry
  #journal [text] - Show the journal, or add a note to it
  #models         - List installed models
  #model <name>   - Switch the narrating model
  #trim [n]       - Keep only the last n messages (default 10)
  #new            - Start a new adventure
  #help           - Show this help
  #quit           - Save and exit
Anything else is your next action. Ctrl-C interrupts the narrator, or exits
at the prompt. Ctrl-D also exits.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let save_dir = std::env::var("ADVENTURE_SAVE_DIR").unwrap_or_else(|_| "saves".to_string());
    let client = Ollama::from_env()?;
    let config = SessionConfig::from_env();

    let mut session =
        AdventureSession::new(client, config).with_store(Arc::new(FileStore::new(&save_dir)));

    match session.restore().await {
        Ok(true) => println!("[LOADED] Resuming your adventure from {save_dir}"),
        Ok(false) => {}
        Err(e) => println!("[ERROR] {}", e.player_message()),
    }

    let quit = Arc::new(Notify::new());
    {
        let cancel = session.cancel_handle();
        let quit = quit.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !cancel.interrupt() {
                    quit.notify_one();
                }
            }
        });
    }

    println!("=== Text Adventure ({}) ===", session.model());
    println!("{HELP}");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = quit.notified() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            let (name, arg) = command
                .split_once(char::is_whitespace)
                .map(|(name, arg)| (name, arg.trim()))
                .unwrap_or((command, ""));

            match name {
                "quit" | "exit" => break,
                "help" => println!("{HELP}"),
                "status" => print_status(&session),
                "journal" if arg.is_empty() => {
                    for entry in session.memory().journal() {
                        println!("  [{}] {}", entry.timestamp.format("%Y-%m-%d %H:%M"), entry.text);
                    }
                }
                "journal" => match session.add_journal_entry(arg).await {
                    Ok(_) => println!("[JOURNAL] Noted."),
                    Err(e) => println!("[ERROR] {}", e.player_message()),
                },
                "models" => match session.available_models().await {
                    Ok(models) => {
                        for model in models {
                            let marker = if model.name == session.model() { "*" } else { " " };
                            println!("  {marker} {}", model.name);
                        }
                    }
                    Err(e) => println!("[ERROR] {}", e.player_message()),
                },
                "model" if !arg.is_empty() => {
                    session.switch_model(arg).await;
                    println!("[MODEL] Now narrated by {arg}");
                }
                "trim" => {
                    let keep = arg.parse().unwrap_or(10);
                    session.trim_history(keep);
                    println!("[TRIM] Kept the last {keep} messages.");
                }
                "new" => match session.new_adventure().await {
                    Ok(()) => println!("[NEW] A fresh adventure begins."),
                    Err(e) => println!("[ERROR] {}", e.player_message()),
                },
                _ => println!("[ERROR] Unknown command. Try #help"),
            }
            continue;
        }

        let mut printed = 0;
        let result = session
            .player_action(line, |shown| {
                if let Some(new) = shown.get(printed..) {
                    print!("{new}");
                    let _ = std::io::stdout().flush();
                }
                printed = shown.len();
            })
            .await;
        println!();

        match result {
            Ok(outcome) => {
                for command in &outcome.commands {
                    tracing::debug!(?command, "applied");
                }
            }
            Err(e) if e.is_user_visible() => println!("[ERROR] {}", e.player_message()),
            Err(_) => println!("[INTERRUPTED]"),
        }
        println!();
    }

    if let Err(e) = session.save().await {
        warn!(error = %e, "final save failed");
    }
    println!("Goodbye!");
    Ok(())
}

fn print_status<B: adventure_core::narrator::Backend>(session: &AdventureSession<B>) {
    let memory = session.memory();
    println!("[STATUS]");
    match memory.current_location() {
        Some(location) => println!("  Location: {}", location.name),
        None => println!("  Location: unknown"),
    }

    let here: Vec<&str> = memory.npcs_here().iter().map(|npc| npc.name.as_str()).collect();
    if !here.is_empty() {
        println!("  Present: {}", here.join(", "));
    }

    if memory.inventory().is_empty() {
        println!("  Inventory: empty");
    } else {
        println!("  Inventory:");
        for item in memory.inventory() {
            println!("    {} x{} - {}", item.name, item.quantity, item.description);
        }
    }

    for event in memory.recent_events(3) {
        println!("  Recently: {}", event.description);
    }
}
