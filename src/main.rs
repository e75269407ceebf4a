//! `ctx` — the indexing CLI and MCP server entry point for
//! docs-retrieval-core.

mod chunk;
mod config;
mod coordinator;
mod db;
mod embedding;
mod indexer;
mod migrate;
mod models;
mod parser;
mod quality_gate;
mod registry;
mod search;
mod server;
mod source_adapters;
mod text_store;
mod vector_store;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use coordinator::{Coordinator, SourceState};
use registry::Registry;
use text_store::TextStore;
use vector_store::VectorStore;

#[derive(Parser)]
#[command(
    name = "ctx",
    about = "docs-retrieval-core — multi-project documentation retrieval for AI coding agents",
    version
)]
struct Cli {
    /// Path to the ambient configuration file.
    #[arg(long, global = true, default_value = "./config/ctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enumerate projects, or run an indexing pass over one project's sources.
    Index {
        /// Project id to index. Mutually exclusive with `--list`.
        #[arg(long)]
        project: Option<String>,

        /// List configured projects and exit, instead of indexing.
        #[arg(long)]
        list: bool,

        /// Restrict indexing to a single source id within the project.
        #[arg(long)]
        source: Option<String>,

        /// Report what would be indexed without fetching or writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Resume from the last saved cursor per source instead of starting over.
        #[arg(long)]
        resume: bool,
    },

    /// Start the MCP-compatible JSON-RPC server.
    Serve,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Commands::Index {
            project,
            list,
            source,
            dry_run,
            resume,
        } => run_index(&cfg, project, list, source, dry_run, resume).await,
        Commands::Serve => match server::run_server(&cfg).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("server error: {err:#}");
                ExitCode::from(2)
            }
        },
    }
}

async fn run_index(
    cfg: &config::Config,
    project: Option<String>,
    list: bool,
    source: Option<String>,
    dry_run: bool,
    resume: bool,
) -> ExitCode {
    if list && project.is_some() {
        eprintln!("configuration error: --list and --project are mutually exclusive");
        return ExitCode::from(1);
    }
    if !list && project.is_none() {
        eprintln!("configuration error: one of --project <id> or --list is required");
        return ExitCode::from(1);
    }

    let registry = match Registry::load(&cfg.registry.config_root, &cfg.quality) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return ExitCode::from(1);
        }
    };

    if list {
        let mut projects: Vec<&models::Project> = registry.list_projects();
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        for project in projects {
            println!("{}\t{}", project.id, project.name);
        }
        return ExitCode::SUCCESS;
    }

    let project_id = project.expect("checked above");
    if !registry.contains_project(&project_id) {
        eprintln!("configuration error: unknown project '{project_id}'");
        return ExitCode::from(1);
    }

    let sources = registry.list_sources_for(&project_id);
    if let Some(filter) = &source {
        if !sources.iter().any(|s| s.id() == filter) {
            eprintln!("configuration error: unknown source '{filter}' for project '{project_id}'");
            return ExitCode::from(1);
        }
    }

    if dry_run {
        println!("dry-run: project '{project_id}' would index {} source(s):", sources.len());
        for src in &sources {
            if let Some(filter) = &source {
                if src.id() != filter {
                    continue;
                }
            }
            println!("  {}", src.id());
        }
        return ExitCode::SUCCESS;
    }

    if let Err(err) = migrate::run_migrations(cfg).await {
        eprintln!("run error: failed to initialize database: {err:#}");
        return ExitCode::from(2);
    }

    let pool = match db::connect(cfg).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("run error: failed to connect to database: {err:#}");
            return ExitCode::from(2);
        }
    };
    let text_store = TextStore::new(pool.clone());
    let vector_store = VectorStore::new(pool);

    let coordinator = Coordinator {
        config: cfg,
        registry: &registry,
        text_store: &text_store,
        vector_store: &vector_store,
    };

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_for_signal.cancel();
        }
    });

    let report = match coordinator
        .index_project(&project_id, source.as_deref(), resume, cancel)
        .await
    {
        Ok(report) => report,
        Err(err) => {
            eprintln!("run error: {err:#}");
            return ExitCode::from(2);
        }
    };

    let mut any_failed = false;
    for result in &report.sources {
        let status = match result.state {
            SourceState::Succeeded => "succeeded",
            SourceState::Partial => "partial",
            SourceState::Skipped => "skipped",
            SourceState::Failed => {
                any_failed = true;
                "failed"
            }
        };
        match &result.report {
            Some(run) => println!(
                "{}: {} (seen={}, changed={}, skipped={}, failed={}, orphaned={})",
                result.source_id,
                status,
                run.documents_seen,
                run.documents_changed,
                run.documents_skipped,
                run.documents_failed,
                run.chunks_orphaned
            ),
            None => println!(
                "{}: {}{}",
                result.source_id,
                status,
                result
                    .error
                    .as_ref()
                    .map(|e| format!(" ({e})"))
                    .unwrap_or_default()
            ),
        }
    }

    if any_failed {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
