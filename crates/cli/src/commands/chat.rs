//! `aiq chat`: single-message or interactive chat.

use std::io::{BufRead, Write};
use std::sync::Arc;

use aiq_agent::{Orchestrator, OrchestratorConfig, PromptCompressor, PromptTemplates, QueryResult};
use aiq_config::AppConfig;
use aiq_core::tool::names;
use aiq_core::{AutoConfirm, Confirmer, DomainEvent, Mode, Provider, Session};
use aiq_skills::{SkillsManager, SkillsMatcher};
use aiq_tools::render_table;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::confirm::StdinConfirmer;

pub async fn run(
    message: Option<String>,
    database: Option<String>,
    engine: Option<String>,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for API key early and give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    AIQ_API_KEY     = 'sk-...'");
        eprintln!("    OPENAI_API_KEY  = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider: Arc<dyn Provider> = Arc::new(aiq_providers::from_config(&config)?);

    // --- Mode ---
    let (mode, db) = match database.or_else(|| config.database.url.clone()) {
        Some(url) => {
            let expected = engine.as_deref().or(config.database.engine.as_deref());
            let (db, mode) = aiq_tools::connect_bound(&url, expected).await?;
            (mode, Some(db))
        }
        None => (Mode::Free, None),
    };

    let tools = Arc::new(aiq_tools::default_registry(&config, db));

    let skills = Arc::new(SkillsManager::from_dir(&config.skills_dir()));
    let mut matcher = SkillsMatcher::new().with_max_skills(config.skills.max_skills);
    if config.skills.semantic_matching {
        matcher = matcher.with_provider(provider.clone(), config.model.clone());
    }

    let confirmer: Arc<dyn Confirmer> = if yes {
        Arc::new(AutoConfirm)
    } else {
        Arc::new(StdinConfirmer)
    };

    let orchestrator = Orchestrator::new(provider, tools, OrchestratorConfig::from(&config))
        .with_confirmer(confirmer)
        .with_skills(skills.clone(), Arc::new(matcher))
        .with_compressor(PromptCompressor::new(config.agent.context_window))
        .with_templates(PromptTemplates::load_or_builtin(&AppConfig::prompts_dir()));

    let mut session = Session::new(mode);
    info!(session_id = %session.id, free_mode = session.mode.is_free(), "Chat session started");

    if let Some(msg) = message {
        // Single message mode
        return answer(&orchestrator, &mut session, &msg).await;
    }

    // Interactive mode
    println!();
    println!("  AIQ Interactive Mode");
    println!();
    match &session.mode {
        Mode::Free => println!("  Mode:    free (no database)"),
        Mode::Bound { engine, .. } => println!("  Mode:    database ({engine})"),
    }
    println!("  Model:   {}", config.model);
    println!("  Skills:  {} installed", skills.list_metadata().len());
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or 'quit' to leave.");
    println!();

    while let Some(line) = prompt_line().await? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "exit" || query == "quit" {
            break;
        }
        if let Err(e) = answer(&orchestrator, &mut session, query).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Read one line after a `aiq> ` prompt; `None` at end of input.
async fn prompt_line() -> Result<Option<String>, Box<dyn std::error::Error>> {
    print!("  aiq> ");
    std::io::stdout().flush()?;

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map(|n| (n > 0).then_some(line))
    })
    .await??;
    Ok(line)
}

/// Run one turn, printing progress events as they arrive and any query
/// result before the answer. Ctrl+C cancels the turn, not the program.
async fn answer(
    orchestrator: &Orchestrator,
    session: &mut Session,
    query: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let mut events = orchestrator.events().subscribe();
    eprint!("  Thinking...");
    let turn = orchestrator.run_turn(session, query, &cancel);
    tokio::pin!(turn);
    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            event = events.recv() => match event {
                Ok(event) => show_progress(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Progress events dropped"),
                Err(RecvError::Closed) => break (&mut turn).await,
            },
        }
    };
    while let Ok(event) = events.try_recv() {
        show_progress(&event);
    }
    eprint!("\r              \r");
    watcher.abort();

    match result {
        Ok(outcome) => {
            print_result(outcome.last_result.as_ref());
            println!("{}", outcome.text);
            Ok(())
        }
        Err(e) => {
            print_result(e.last_result());
            Err(e.into())
        }
    }
}

fn show_progress(event: &DomainEvent) {
    if let Some(line) = progress_line(event) {
        eprintln!("\r  {line}");
    }
}

/// What the user sees for an event; token accounting stays in the logs.
fn progress_line(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::ResponseGenerated { .. } => None,
        DomainEvent::ToolStarted { tool_name, .. } => {
            let waiting = match tool_name.as_str() {
                names::EXECUTE_SQL => "\n    Executing SQL...",
                names::EXECUTE_COMMAND => "\n    Waiting for command to complete...",
                names::HTTP_REQUEST => "\n    Waiting for HTTP response...",
                _ => "",
            };
            Some(format!("{event}{waiting}"))
        }
        _ => Some(event.to_string()),
    }
}

fn print_result(result: Option<&QueryResult>) {
    if let Some(result) = result
        && !result.rows.is_empty()
    {
        print!("{}", render_table(&result.columns, &result.rows));
        println!("({} rows)", result.rows.len());
        println!();
    }
}
