#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use documentdb_copy::helpers::{
    format_duration, format_number, host_from_uri, redact_uri_password, validate_mongodb_uri,
};
use documentdb_copy::models::{
    CollectionRef, ConflictResolutionStrategy, CopyPasteConfig, DocumentWriteError, SavedConnection,
};
use documentdb_copy::session::CopySession;
use documentdb_copy::state::{ConfigManager, CopySettings};
use documentdb_copy::tasks::{Task, TaskState, TaskStatus};
use documentdb_copy::transfer::{CopyPasteCollectionTask, CopyTaskMetrics, CopyTaskOptions};

#[derive(Parser)]
#[command(name = "documentdb-copy", version, about = "Copy collections between clusters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage saved connections
    Connections {
        #[command(subcommand)]
        command: ConnectionsCommand,
    },
    /// Copy every document of one collection into another
    Copy(CopyArgs),
    /// Inspect persisted settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Subcommand)]
enum ConnectionsCommand {
    /// Save a connection string under a name
    Add {
        uri: String,
        /// Defaults to the first host in the URI
        #[arg(long)]
        name: Option<String>,
    },
    List,
    /// Remove by id or name
    Remove { key: String },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
}

#[derive(clap::Args)]
struct CopyArgs {
    /// Source as <connection>/<database>/<collection>
    #[arg(long)]
    source: CollectionRef,
    /// Target as <connection>/<database>/<collection>
    #[arg(long)]
    target: CollectionRef,
    #[arg(long, default_value_t = ConflictResolutionStrategy::Abort)]
    on_conflict: ConflictResolutionStrategy,
    #[arg(long)]
    batch_size: Option<u32>,
    /// Read the source cursor directly, without background reads
    #[arg(long)]
    no_keep_alive: bool,
    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct CopyReport<'a> {
    task_id: String,
    name: &'a str,
    source: String,
    target: String,
    on_conflict: ConflictResolutionStrategy,
    status: &'a TaskStatus,
    duration_ms: Option<u128>,
    batches_written: Option<u64>,
    keep_alive_read_count: Option<u64>,
    errors: Vec<ReportedError>,
}

#[derive(Serialize)]
struct ReportedError {
    document_id: Option<String>,
    error: String,
}

impl From<&DocumentWriteError> for ReportedError {
    fn from(error: &DocumentWriteError) -> Self {
        Self {
            document_id: error.document_id.as_ref().map(ToString::to_string),
            error: error.error.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ConfigManager::new()?;

    match cli.command {
        Command::Connections { command } => {
            connections_command(&config, command)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Settings { command: SettingsCommand::Show } => {
            let settings = config.load_settings()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            println!("# {}", config.config_dir().display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Copy(args) => copy_command(&config, args).await,
    }
}

fn connections_command(config: &ConfigManager, command: ConnectionsCommand) -> Result<()> {
    match command {
        ConnectionsCommand::Add { uri, name } => {
            validate_mongodb_uri(&uri).map_err(anyhow::Error::msg)?;
            let name = name
                .or_else(|| host_from_uri(&uri))
                .context("Could not derive a connection name, pass --name")?;
            if config.find_connection(&name)?.is_some() {
                bail!("A connection named '{name}' already exists");
            }
            let connection = SavedConnection::new(name, uri);
            println!("{}  {}", connection.id, connection.name);
            config.upsert_connection(connection)?;
        }
        ConnectionsCommand::List => {
            for connection in config.load_connections()? {
                let last = connection
                    .last_connected
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {:<20} {}  (last connected: {last})",
                    connection.id,
                    connection.name,
                    redact_uri_password(&connection.uri)
                );
            }
        }
        ConnectionsCommand::Remove { key } => match config.remove_connection(&key)? {
            Some(removed) => println!("Removed {}", removed.name),
            None => bail!("No connection matches '{key}'"),
        },
    }
    Ok(())
}

/// Resolve the connection part of `reference` to a saved connection id.
fn resolve(config: &ConfigManager, reference: CollectionRef) -> Result<(CollectionRef, SavedConnection)> {
    let saved = config
        .find_connection(&reference.connection_id)?
        .with_context(|| format!("No saved connection matches '{}'", reference.connection_id))?;
    let resolved =
        CollectionRef::new(saved.id.clone(), reference.database_name, reference.collection_name);
    Ok((resolved, saved))
}

async fn copy_command(config: &ConfigManager, args: CopyArgs) -> Result<ExitCode> {
    let mut settings: CopySettings = config.load_settings()?.copy;
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }
    if args.no_keep_alive {
        settings.keep_alive_enabled = false;
    }

    let (source, source_connection) = resolve(config, args.source)?;
    let (target, target_connection) = resolve(config, args.target)?;
    if source == target {
        bail!("Source and target are the same collection");
    }

    let session = CopySession::new(settings.clone());
    let mut connected = HashSet::new();
    for saved in [source_connection, target_connection] {
        if !connected.insert(saved.id.clone()) {
            continue;
        }
        let updated = session
            .connections()
            .connect(&saved)
            .await
            .with_context(|| format!("Failed to connect to '{}'", saved.name))?;
        if let Err(err) = config.upsert_connection(updated) {
            log::warn!("Failed to record last connection time: {err:#}");
        }
    }

    let copy_config = CopyPasteConfig::new(source, target, args.on_conflict);
    let mut options = CopyTaskOptions::from(&settings);
    if !args.json {
        options.progress = Some(Arc::new(|processed: u64| {
            eprint!("\rProcessed {} documents", format_number(processed));
        }));
    }
    let task = session.create_copy_task_with(copy_config, options);
    let _state_log = task.on_did_change_state(Box::new(|change| {
        log::debug!("{} -> {}", change.previous_state.label(), change.new_state.label());
    }));

    let handle = session.tasks().spawn_task(task.id())?;
    let interrupt = {
        let task = Arc::clone(&task);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling...");
                task.cancel();
            }
        })
    };
    let state = handle.await??;
    interrupt.abort();
    if !args.json {
        eprintln!();
    }

    let status = task.status();
    let metrics = task.metrics();
    if args.json {
        let report = build_report(task.as_ref(), &status, metrics.as_ref());
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(task.as_ref(), &status, metrics.as_ref());
    }

    Ok(match state {
        TaskState::Completed => ExitCode::SUCCESS,
        TaskState::Cancelled => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    })
}

fn build_report<'a>(
    task: &'a CopyPasteCollectionTask,
    status: &'a TaskStatus,
    metrics: Option<&CopyTaskMetrics>,
) -> CopyReport<'a> {
    CopyReport {
        task_id: task.id().to_string(),
        name: task.name(),
        source: task.config().source.to_string(),
        target: task.config().target.to_string(),
        on_conflict: task.conflict_strategy(),
        status,
        duration_ms: metrics.map(|m| m.duration.as_millis()),
        batches_written: metrics.map(|m| m.batches_written),
        keep_alive_read_count: metrics.map(|m| m.keep_alive_read_count),
        errors: task.recorded_errors().iter().map(ReportedError::from).collect(),
    }
}

fn print_summary(
    task: &CopyPasteCollectionTask,
    status: &TaskStatus,
    metrics: Option<&CopyTaskMetrics>,
) {
    let strategy = task.conflict_strategy();
    println!("{}: {}", task.name(), status.state.label());
    println!("  on conflict: {strategy} ({})", strategy.description());
    println!(
        "  processed {}, inserted {}, errors {}",
        format_number(status.processed_count),
        format_number(status.inserted_count),
        format_number(status.error_count)
    );
    if let Some(metrics) = metrics {
        println!(
            "  {} batches in {} ({} keep-alive reads)",
            metrics.batches_written,
            format_duration(metrics.duration),
            metrics.keep_alive_read_count
        );
    }
    for error in task.recorded_errors() {
        let id = error.document_id.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into());
        println!("  {id}: {}", error.error);
    }
    if let Some(error) = &status.error {
        println!("  error: {error}");
    }
}
