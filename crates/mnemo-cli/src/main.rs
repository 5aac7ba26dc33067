mod app;

use app::{load_config, App, RECONCILE_JOB};
use clap::{Parser, Subcommand, ValueEnum};
use mnemo_memory::{ContextOptions, DocumentKind, MetadataFilter, SearchResult};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mnemo", about = "Mnemo: semantic retrieval and duplicate detection")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "mnemo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index from the repositories and prune stale documents
    Reindex,
    /// Semantic search
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t = KindArg::All)]
        kind: KindArg,
        /// Defaults to the configured per-kind limit
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        min_score: Option<f32>,
    },
    /// Documents similar to an indexed document (e.g. `task_<id>`)
    Similar {
        id: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        #[arg(long)]
        min_score: Option<f32>,
    },
    /// Run the duplicate check for a candidate title
    Check {
        text: String,
        #[arg(long, value_enum, default_value_t = KindArg::Task)]
        kind: KindArg,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Index statistics
    Stats,
    /// Bounded context bundle for a prompt
    Context { query: String },
    /// Run scheduled reconciliation until Ctrl-C
    Sync,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Task,
    Project,
    All,
}

impl KindArg {
    fn document_kind(self) -> Option<DocumentKind> {
        match self {
            KindArg::Task => Some(DocumentKind::Task),
            KindArg::Project => Some(DocumentKind::Project),
            KindArg::All => None,
        }
    }
}

/// Search hit without its vector.
#[derive(Serialize)]
struct Hit<'a> {
    rank: usize,
    id: &'a str,
    score: f32,
    content: &'a str,
    metadata: &'a mnemo_memory::DocumentMetadata,
}

impl<'a> From<&'a SearchResult> for Hit<'a> {
    fn from(r: &'a SearchResult) -> Self {
        Self {
            rank: r.rank,
            id: r.id(),
            score: r.score,
            content: r.content(),
            metadata: r.metadata(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_hits(results: &[SearchResult]) -> anyhow::Result<()> {
    let hits: Vec<Hit<'_>> = results.iter().map(Hit::from).collect();
    print_json(&hits)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).map_err(|e| {
        anyhow::anyhow!("Failed to load config '{}': {e}", cli.config.display())
    })?;

    if let Commands::Config = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let app = App::build(config).await?;
    let search = app.config.search.clone();

    match cli.command {
        Commands::Reindex => {
            let report = app.reconciler.reconcile().await?;
            print_json(&report)?;
        }
        Commands::Search {
            query,
            kind,
            limit,
            min_score,
        } => {
            let min_score = min_score.unwrap_or(search.min_score);
            let results = match kind.document_kind() {
                Some(DocumentKind::Project) => {
                    let limit = limit.unwrap_or(search.project_limit);
                    app.retriever.search_projects(&query, limit, min_score).await?
                }
                Some(kind) => {
                    let limit = limit.unwrap_or(search.task_limit);
                    let filter = MetadataFilter::kind(kind);
                    app.retriever
                        .search(&query, limit, min_score, Some(&filter))
                        .await?
                }
                None => {
                    let limit = limit.unwrap_or(search.task_limit + search.project_limit);
                    app.retriever.search_all(&query, limit, min_score).await?
                }
            };
            print_hits(&results)?;
        }
        Commands::Similar {
            id,
            limit,
            min_score,
        } => {
            let min_score = min_score.unwrap_or(search.min_score);
            let results = app.retriever.find_similar_to(&id, limit, min_score).await?;
            print_hits(&results)?;
        }
        Commands::Check {
            text,
            kind,
            threshold,
        } => {
            let kind = kind.document_kind().unwrap_or(DocumentKind::Task);
            let policy = *app.detector.policy();
            let threshold = threshold.unwrap_or(policy.threshold);
            let result = app.detector.check(kind, &text, threshold).await?;
            print_json(&serde_json::json!({
                "kind": kind.as_str(),
                "threshold": threshold,
                "would_block": policy.should_block(&result),
                "result": result,
            }))?;
        }
        Commands::Stats => {
            let stats = app.store.stats().await?;
            print_json(&stats)?;
        }
        Commands::Context { query } => {
            let options = ContextOptions {
                limit_per_type: search.context_limit_per_type,
                min_score: search.min_score,
                ..ContextOptions::default()
            };
            let context = app.retriever.get_context(&query, &options).await?;
            print_json(&serde_json::json!({
                "context": context,
                "prompt": context.to_prompt_context(),
            }))?;
        }
        Commands::Sync => {
            let scheduler = app.scheduler();
            let first = scheduler.run_now(RECONCILE_JOB).await?;
            print_json(&first)?;

            let history = scheduler.history();
            let handle = scheduler.start();
            info!("Scheduler running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            handle.abort();
            info!(runs = history.len(), "Scheduler stopped");
        }
        Commands::Config => {}
    }

    app.store.close().await?;
    Ok(())
}
