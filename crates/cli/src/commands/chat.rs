//! `crabwire chat` — interactive or single-message chat mode.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crabwire_agent::{AgentEvent, AgentRuntime, ChatParams};
use crabwire_config::AppConfig;
use crabwire_core::tool::{ConfirmError, ConfirmRequest, Confirmer};
use crabwire_providers::ModelRouter;

const SENDER: &str = "cli";

/// How long a confirmation prompt waits before counting as a refusal.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn run(
    message: Option<String>,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for an API key early — give a clear error.
    if !config.providers.iter().any(|p| p.api_key.is_some()) {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set an environment variable for a configured provider:");
        eprintln!("    export CRABWIRE_DEEPSEEK_API_KEY='sk-...'");
        eprintln!("    export CRABWIRE_QWEN_API_KEY='sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let runtime = build_runtime(&config).await?;
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Some(text) = message {
        // Single message mode
        run_turn(&runtime, &session_id, &text).await;
        eprintln!("  (session: {session_id})");
    } else {
        // Interactive mode
        println!();
        println!("  ╔══════════════════════════════════════════╗");
        println!("  ║        crabwire — Interactive Chat       ║");
        println!("  ╚══════════════════════════════════════════╝");
        println!();
        println!("  Model:    {}", config.model);
        println!("  Session:  {session_id}");
        println!();
        println!("  Type your message and press Enter.");
        println!("  Type 'exit' or Ctrl+C to quit.");
        println!();

        loop {
            print!("  You > ");
            std::io::stdout().flush()?;

            let Some(line) = read_line().await? else {
                break;
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if text == "exit" || text == "quit" {
                break;
            }

            println!();
            run_turn(&runtime, &session_id, text).await;
            println!();
        }

        println!();
        println!("  Goodbye! 👋");
        println!();
    }

    Ok(())
}

/// Wire the runtime from config: router, tools, store, audit.
async fn build_runtime(config: &AppConfig) -> Result<AgentRuntime, Box<dyn std::error::Error>> {
    let router = ModelRouter::from_config(config);
    let tools = crabwire_tools::default_registry(config)?;

    let mut runtime = AgentRuntime::new(
        Arc::new(router),
        Arc::new(tools),
        &config.model,
        config.agent.clone(),
    );

    if config.storage.enabled {
        let store = crabwire_storage::SqliteStore::new(&config.storage.database_path()).await?;
        runtime = runtime.with_store(Arc::new(store));
    }

    if config.audit.enabled {
        let sink = crabwire_audit::JsonlAuditSink::new(&config.audit.log_path())?;
        runtime = runtime.with_audit(Arc::new(sink));
    }

    Ok(runtime)
}

/// Drive one turn to completion, printing events as they stream in.
async fn run_turn(runtime: &AgentRuntime, session_id: &str, text: &str) {
    let params = ChatParams::new(SENDER).with_confirm(Arc::new(CliConfirmer));
    let mut rx = runtime.chat(session_id, text, params);

    let mut mid_line = false;
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Delta { text } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
                mid_line = true;
            }
            AgentEvent::ToolCall {
                name,
                output,
                success,
                ..
            } => {
                if mid_line {
                    println!();
                    mid_line = false;
                }
                let marker = if success { "✓" } else { "✗" };
                let first_line = output.lines().next().unwrap_or("");
                println!("  [{marker} {name}] {first_line}");
            }
            AgentEvent::Done { .. } => {
                if mid_line {
                    println!();
                }
            }
            AgentEvent::Error { message } => {
                if mid_line {
                    println!();
                }
                eprintln!("  [Error] {message}");
            }
        }
    }
}

/// Read one line from stdin without blocking the async runtime.
/// Returns `None` on end of input.
async fn read_line() -> std::io::Result<Option<String>> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let read = std::io::stdin().read_line(&mut line)?;
        Ok(if read == 0 { None } else { Some(line) })
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Confirmation handshake over stdin. No reply within the timeout counts
/// as a refusal.
struct CliConfirmer;

#[async_trait]
impl Confirmer for CliConfirmer {
    async fn confirm(&self, request: &ConfirmRequest) -> Result<bool, ConfirmError> {
        println!();
        println!("  The agent wants to run \"{}\":", request.name);
        println!("    {}", request.arguments);
        print!("  Allow? [y/N] ");
        let _ = std::io::stdout().flush();

        match tokio::time::timeout(CONFIRM_TIMEOUT, read_line()).await {
            Ok(Ok(Some(line))) => {
                let reply = line.trim().to_lowercase();
                Ok(reply == "y" || reply == "yes")
            }
            Ok(Ok(None)) => Ok(false),
            Ok(Err(e)) => Err(ConfirmError(e.to_string())),
            Err(_) => Err(ConfirmError(format!(
                "no reply within {}s",
                CONFIRM_TIMEOUT.as_secs()
            ))),
        }
    }
}
