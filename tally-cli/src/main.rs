mod cli;
mod config;
mod render;
mod session_store;

use std::{io::Write, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tally_core::{
    adapters::outbound::{DevTaskService, FileStore, HttpTaskService, MemoryStore},
    AuthEvent, Clock, LocalStore, RemoteTaskService, SyncOutcome, SystemClock, TaskEngine,
    TaskFilter, TaskId, TaskInput, TaskPatch,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::TallyConfig;
use crate::render::{format_elapsed, render_forest};

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TallyConfig::load()?;
    init_tracing(&config.log_filter);
    tracing::debug!(?config, "Loaded config");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match &cli.command {
        Commands::ConfigPath => {
            let path = TallyConfig::ensure_exists()?;
            println!("{}", path.display());
            return Ok(());
        }
        Commands::Login { token } => return login(&config, clock, token).await,
        Commands::Logout => return logout(&config, clock).await,
        _ => {}
    }

    if cli.dev {
        let engine = TaskEngine::new(
            Arc::new(DevTaskService::demo()),
            Arc::new(MemoryStore::new()),
            clock,
        );
        return run(engine, cli.command).await;
    }

    let store = Arc::new(FileStore::new(config.data_dir()?));
    match &config.api_url {
        Some(url) => {
            let token = session_store::load_session()?;
            if token.is_none() {
                eprintln!(
                    "Warning: not logged in, working offline. \
                     Run `tally login --token <TOKEN>`."
                );
            }
            let remote = HttpTaskService::new(url, token).context("Failed to create API client")?;
            run(TaskEngine::new(Arc::new(remote), store, clock), cli.command).await
        }
        None => run(TaskEngine::new(Arc::new(()), store, clock), cli.command).await,
    }
}

async fn login(config: &TallyConfig, clock: Arc<dyn Clock>, token: &str) -> Result<()> {
    session_store::save_session(token)?;

    let Some(url) = &config.api_url else {
        println!(
            "Token saved. Set api_url in {} to sync with a server.",
            TallyConfig::config_path()?.display()
        );
        return Ok(());
    };

    let remote = Arc::new(HttpTaskService::new(url, None).context("Failed to create API client")?);
    let store = Arc::new(FileStore::new(config.data_dir()?));
    let engine = TaskEngine::new(remote.clone(), store, clock);

    engine.reload_local().await;
    remote.sign_in(token.trim());
    println!("Logged in to {}", remote.base_url());
    let outcome = engine.handle_auth_event(AuthEvent::SignedIn).await;
    report_outcome(&outcome);
    Ok(())
}

async fn logout(config: &TallyConfig, clock: Arc<dyn Clock>) -> Result<()> {
    session_store::clear_session()?;

    let store = Arc::new(FileStore::new(config.data_dir()?));
    let engine = TaskEngine::new(Arc::new(()), store, clock);
    let outcome = engine.handle_auth_event(AuthEvent::SignedOut).await;
    println!("Logged out. {} task(s) available offline.", outcome.task_count());
    Ok(())
}

fn report_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Local { tasks } => println!("Loaded {tasks} local task(s)."),
        SyncOutcome::Merged { tasks, restored } => {
            println!("Synced {tasks} task(s).");
            if *restored > 0 {
                println!("Restored {restored} running timer(s).");
            }
        }
        SyncOutcome::Fallback { tasks, error } => {
            eprintln!("Warning: sync failed ({error}), showing {tasks} local task(s).")
        }
    }
}

async fn run<R, S>(engine: TaskEngine<R, S>, command: Commands) -> Result<()>
where
    R: RemoteTaskService,
    S: LocalStore,
{
    let outcome = if matches!(command, Commands::Watch { .. }) {
        engine.init().await
    } else {
        engine.mount().await
    };
    if let SyncOutcome::Fallback { .. } = outcome {
        report_outcome(&outcome);
        engine.take_error();
    }

    let result = execute(&engine, command, &outcome).await;

    if let Some(error) = engine.take_error() {
        eprintln!("Warning: {error}. Changes are saved locally.");
    }
    engine.dispose();
    result
}

async fn execute<R, S>(
    engine: &TaskEngine<R, S>,
    command: Commands,
    outcome: &SyncOutcome,
) -> Result<()>
where
    R: RemoteTaskService,
    S: LocalStore,
{
    match command {
        Commands::List { status, search, all } => {
            let filter = TaskFilter { status, search };
            let forest = engine.filtered_tree(&filter).await;
            if forest.is_empty() {
                println!("No tasks.");
                return Ok(());
            }
            let expanded = engine.expanded().await;
            let show_all = all || !filter.is_empty();
            print!("{}", render_forest(&forest, &expanded, show_all, SystemClock.now_ms()));
        }
        Commands::Add {
            title,
            parent,
            description,
            due,
        } => {
            let mut input = TaskInput::new(title).with_description(description.unwrap_or_default());
            if let Some(parent) = parent {
                input = input.with_parent(parent);
            }
            if let Some(due) = due {
                input = input.with_due_date(due);
            }
            let id = engine.create_task(input).await?;
            println!("Created {id}");
        }
        Commands::Edit {
            id,
            title,
            description,
        } => {
            let patch = TaskPatch {
                title,
                description,
                ..Default::default()
            };
            if patch.is_empty() {
                anyhow::bail!("Nothing to change: pass --title or --description");
            }
            engine.update_task(&TaskId::from(id.as_str()), patch).await?;
            println!("Updated {id}");
        }
        Commands::Move { id, status } => {
            engine.move_task(&TaskId::from(id.as_str()), status).await?;
            println!("{id} is now {status}");
        }
        Commands::Start { id } => {
            engine.start_timer(&TaskId::from(id.as_str())).await?;
            println!("Started {id}");
        }
        Commands::Pause { id } => match engine.pause_timer(&TaskId::from(id.as_str())).await? {
            Some(duration) => println!("Paused {id} after {}", format_elapsed(duration)),
            None => println!("{id} was not running"),
        },
        Commands::Elapsed { id } => {
            let elapsed = engine
                .elapsed(&TaskId::from(id.as_str()))
                .await
                .ok_or_else(|| anyhow!("task not found: {id}"))?;
            println!("{}", format_elapsed(elapsed));
        }
        Commands::Rm { id } => {
            let removed = engine.delete_task(&TaskId::from(id.as_str())).await?;
            println!("Deleted {} task(s)", removed.len());
        }
        Commands::Toggle { id } => {
            let expanded = engine.toggle_expanded(&TaskId::from(id.as_str())).await?;
            println!("{id} {}", if expanded { "expanded" } else { "collapsed" });
        }
        Commands::Sync { push } => {
            report_outcome(outcome);
            if push {
                let pushed = engine.push_local_tasks().await?;
                println!("Pushed {pushed} local task(s).");
            }
        }
        Commands::Watch { id } => watch(engine, TaskId::from(id)).await?,
        Commands::Login { .. } | Commands::Logout | Commands::ConfigPath => {}
    }
    Ok(())
}

/// Redraw the task's elapsed time every second until Ctrl-C.
async fn watch<R, S>(engine: &TaskEngine<R, S>, id: TaskId) -> Result<()>
where
    R: RemoteTaskService,
    S: LocalStore,
{
    let task = engine
        .task(&id)
        .await
        .ok_or_else(|| anyhow!("task not found: {id}"))?;
    println!("Watching {} ({id}). Press Ctrl-C to stop.", task.title);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (paused, credited) in engine.enforce_session_cap().await {
                    println!(
                        "\nSession cap reached, paused {paused} after {}",
                        format_elapsed(credited)
                    );
                }
                let Some(elapsed) = engine.elapsed(&id).await else {
                    println!("\nTask {id} was deleted.");
                    return Ok(());
                };
                let running = engine
                    .task(&id)
                    .await
                    .is_some_and(|task| task.time_tracking.is_active);
                let label = if running { "running" } else { "paused " };
                print!("\r{} {label}", format_elapsed(elapsed));
                stdout.flush()?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                println!();
                return Ok(());
            }
        }
    }
}
