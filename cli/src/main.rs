//! CLI entrypoint for parley
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod commands;
mod output;

use anyhow::{Context, Result, bail};
use clap::Parser;
use commands::{Cli, Command};
use output::ConsolePrinter;
use parley_application::{
    ChannelEventSink, ConversationLogger, ConversationStore, NoConversationLogger,
    RunWorkflowUseCase, UuidIdGenerator,
};
use parley_domain::{ExtendRequest, RecomputeRequest, Turn, WorkflowRequest};
use parley_infrastructure::{
    ConfigLoader, FileConfig, InMemoryConversationStore, JsonFileConversationStore,
    JsonlConversationLogger, ProcessOrchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_ref())
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to load configuration")?
    };
    config.validate().context("Invalid configuration")?;

    let Cli {
        command,
        store: store_path,
        ephemeral,
        json,
        events,
        ..
    } = cli;
    let store_options = StoreOptions {
        path: store_path,
        ephemeral,
    };

    let defaults = config.defaults.to_turn_options();
    let request = match command {
        Command::Config => {
            ConfigLoader::print_config_sources();
            println!();
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Command::Show { session } => {
            let store = open_store(store_options, &config)?;
            return show(store.as_ref(), session.as_deref()).await;
        }
        Command::Ask { message, turn } => {
            WorkflowRequest::initialize(message, turn.into_options(defaults))
        }
        Command::Continue {
            session,
            message,
            turn,
            reset,
        } => WorkflowRequest::Extend(ExtendRequest {
            session_id: session,
            user_message: message,
            options: turn.into_options(defaults),
            reset_providers: reset,
        }),
        Command::Recompute {
            session,
            turn,
            step,
            provider,
            message,
            thinking,
        } => WorkflowRequest::Recompute(RecomputeRequest {
            session_id: session,
            source_turn_id: turn,
            step_type: step,
            target_provider: provider,
            user_message: message,
            use_thinking: thinking,
        }),
    };

    // === Dependency Injection ===
    let store = open_store(store_options, &config)?;
    let orchestrator = Arc::new(ProcessOrchestrator::from_config(&config.providers));
    let logger: Arc<dyn ConversationLogger> = match config
        .logging
        .conversation_log
        .as_ref()
        .and_then(JsonlConversationLogger::open)
    {
        Some(logger) => Arc::new(logger),
        None => Arc::new(NoConversationLogger),
    };

    let use_case = RunWorkflowUseCase::new(orchestrator, store, Arc::new(UuidIdGenerator))
        .with_config(config.engine_config())
        .with_conversation_logger(logger);

    info!("Running {} workflow", request.kind());

    let printer = ConsolePrinter::new();
    let outcome = if events {
        let (sink, mut rx) = ChannelEventSink::new();
        let forward = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
            }
        });
        let result = use_case.execute_with_events(request, &sink).await;
        drop(sink);
        let _ = forward.await;
        result?
    } else if json {
        use_case.execute(request).await?
    } else {
        use_case.execute_with_events(request, &printer).await?
    };

    if json {
        println!("{}", output::format_outcome_json(&outcome));
    } else if !events {
        print!("{}", output::format_outcome(&outcome, &printer));
    }

    if let Err(e) = &outcome.persisted {
        bail!("Turn was not saved: {}", e);
    }
    Ok(())
}

struct StoreOptions {
    path: Option<PathBuf>,
    ephemeral: bool,
}

fn open_store(options: StoreOptions, config: &FileConfig) -> Result<Arc<dyn ConversationStore>> {
    if options.ephemeral || config.storage.in_memory {
        return Ok(Arc::new(InMemoryConversationStore::new()));
    }
    let path = options
        .path
        .or_else(|| config.storage.path.clone())
        .or_else(ConfigLoader::default_store_path)
        .context("No store path configured and no data directory available")?;
    let store = JsonFileConversationStore::open(&path)
        .with_context(|| format!("Failed to open store {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn show(store: &dyn ConversationStore, session_id: Option<&str>) -> Result<()> {
    let Some(session_id) = session_id else {
        let sessions = store.list_sessions().await?;
        print!("{}", output::format_sessions(&sessions));
        return Ok(());
    };

    let Some(session) = store.get_session(session_id).await? else {
        bail!("Session not found: {}", session_id);
    };
    let mut turns = Vec::new();
    for turn in store.turns_for_session(session_id).await? {
        let responses = match &turn {
            Turn::Ai(ai) => store.responses_for_turn(&ai.id).await?,
            Turn::User(_) => Vec::new(),
        };
        turns.push((turn, responses));
    }
    print!("{}", output::format_session(&session, &turns));
    Ok(())
}
