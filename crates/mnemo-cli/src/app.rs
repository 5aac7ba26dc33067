use mnemo_core::{
    EmbeddingProviderKind, MnemoConfig, MnemoError, MnemoResult, StoreBackend,
};
use mnemo_domain::{
    DuplicateDetector, DuplicatePolicy, InMemoryProjectRepository, InMemoryTaskRepository,
    Reconciler, RepositoryResolver,
};
use mnemo_memory::{
    DocumentStore, Embedder, EmbeddingProvider, GeminiEmbedding, InMemoryDocumentStore,
    JsonlDocumentStore, LocalEmbedding, Retriever, SqliteDocumentStore, VectorStore,
};
use mnemo_sync::{ReconcileJob, ScheduledJob, Scheduler, StatsJob};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Name of the periodic reconciliation job.
pub const RECONCILE_JOB: &str = "reconcile-index";
/// Name of the daily stats job.
pub const STATS_JOB: &str = "index-stats";
const STATS_CRON: &str = "0 0 3 * * * *";

/// Everything a command needs, wired from one [`MnemoConfig`].
pub struct App {
    pub config: MnemoConfig,
    pub store: Arc<VectorStore>,
    pub retriever: Retriever,
    pub detector: Arc<DuplicateDetector>,
    pub reconciler: Arc<Reconciler>,
}

impl App {
    pub async fn build(config: MnemoConfig) -> MnemoResult<Self> {
        let provider = build_provider(&config)?;
        let embedder = Embedder::new(provider)
            .with_timeout(Duration::from_millis(config.embedding.timeout_ms))
            .with_batch_size(config.embedding.batch_size);
        let durable = build_durable(&config).await?;
        let store = Arc::new(VectorStore::new(embedder, durable));
        store.initialize().await?;
        let retriever = Retriever::new(store.clone());

        let tasks = Arc::new(match &config.repository.tasks_path {
            Some(path) => InMemoryTaskRepository::load(path)?,
            None => InMemoryTaskRepository::new(),
        });
        let projects = Arc::new(match &config.repository.projects_path {
            Some(path) => InMemoryProjectRepository::load(path)?,
            None => InMemoryProjectRepository::new(),
        });
        info!(
            tasks = tasks.len(),
            projects = projects.len(),
            "Repositories loaded"
        );

        let detector = Arc::new(DuplicateDetector::new(
            retriever.clone(),
            Arc::new(RepositoryResolver::new(tasks.clone(), projects.clone())),
            DuplicatePolicy::from(&config.duplicates),
        ));
        let reconciler = Arc::new(
            Reconciler::new(tasks, projects, retriever.clone())
                .with_prune_stale(config.sync.prune_stale),
        );

        Ok(Self {
            config,
            store,
            retriever,
            detector,
            reconciler,
        })
    }

    /// Reconciliation on the configured cron plus a daily stats report.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(vec![
            ScheduledJob::new(
                RECONCILE_JOB,
                self.config.sync.cron.clone(),
                Arc::new(ReconcileJob::new(self.reconciler.clone())),
            )
            .with_enabled(self.config.sync.enabled),
            ScheduledJob::new(
                STATS_JOB,
                STATS_CRON,
                Arc::new(StatsJob::new(self.store.clone())),
            ),
        ])
    }
}

fn build_provider(config: &MnemoConfig) -> MnemoResult<Arc<dyn EmbeddingProvider>> {
    let embedding = &config.embedding;
    let dimension = embedding.dimension();
    match embedding.provider {
        EmbeddingProviderKind::Local => Ok(Arc::new(LocalEmbedding::new(dimension))),
        EmbeddingProviderKind::Gemini => {
            let key = embedding.resolve_api_key().ok_or_else(|| {
                MnemoError::Config(
                    "Gemini provider needs embedding.api_key or GEMINI_API_KEY".into(),
                )
            })?;
            let mut provider = GeminiEmbedding::new(key, embedding.model.clone(), dimension)
                .with_request_timeout(Duration::from_millis(embedding.timeout_ms))?;
            if let Some(base) = &embedding.api_base_url {
                provider = provider.with_base_url(base.clone());
            }
            Ok(Arc::new(provider))
        }
    }
}

async fn build_durable(config: &MnemoConfig) -> MnemoResult<Arc<dyn DocumentStore>> {
    let path = config.store.resolve_path(&config.data_dir);
    Ok(match config.store.backend {
        StoreBackend::Sqlite => Arc::new(SqliteDocumentStore::open(&path)?),
        StoreBackend::Jsonl => Arc::new(JsonlDocumentStore::open(path).await?),
        StoreBackend::Memory => Arc::new(InMemoryDocumentStore::new()),
    })
}

/// Reads `path` if it exists, otherwise falls back to defaults.
pub fn load_config(path: &Path) -> MnemoResult<MnemoConfig> {
    if path.exists() {
        MnemoConfig::load(path)
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        Ok(MnemoConfig::default())
    }
}
