use async_trait::async_trait;
use mnemo_core::MnemoResult;
use mnemo_domain::Reconciler;
use mnemo_memory::VectorStore;
use std::sync::Arc;
use tracing::info;

/// Unit of work the [`Scheduler`](crate::Scheduler) can fire.
#[async_trait]
pub trait SyncJob: Send + Sync {
    /// Runs once and returns a short human-readable summary.
    async fn run(&self) -> MnemoResult<String>;
}

/// Rebuilds the index from the repositories and prunes stale documents.
pub struct ReconcileJob {
    reconciler: Arc<Reconciler>,
}

impl ReconcileJob {
    /// Wraps a reconciler.
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl SyncJob for ReconcileJob {
    async fn run(&self) -> MnemoResult<String> {
        let report = self.reconciler.reconcile().await?;
        Ok(format!(
            "{} tasks and {} projects indexed, {} pruned in {}ms",
            report.tasks_indexed, report.projects_indexed, report.pruned, report.elapsed_ms
        ))
    }
}

/// Logs index statistics.
pub struct StatsJob {
    store: Arc<VectorStore>,
}

impl StatsJob {
    /// Reports on `store`.
    pub fn new(store: Arc<VectorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SyncJob for StatsJob {
    async fn run(&self) -> MnemoResult<String> {
        let stats = self.store.stats().await?;
        info!(
            documents = stats.documents,
            degraded = stats.degraded,
            backend = %stats.backend,
            "Index stats"
        );
        Ok(serde_json::to_string(&stats)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mnemo_core::Task;
    use mnemo_domain::{InMemoryProjectRepository, InMemoryTaskRepository};
    use mnemo_memory::{Embedder, InMemoryDocumentStore, LocalEmbedding, Retriever};

    fn store() -> Arc<VectorStore> {
        Arc::new(VectorStore::new(
            Embedder::new(Arc::new(LocalEmbedding::default())),
            Arc::new(InMemoryDocumentStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_reconcile_job_summary() {
        let store = store();
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(InMemoryTaskRepository::with_tasks(vec![Task::new("Pagar renta")])),
            Arc::new(InMemoryProjectRepository::new()),
            Retriever::new(store.clone()),
        ));
        let summary = ReconcileJob::new(reconciler).run().await.unwrap();
        assert!(summary.starts_with("1 tasks and 0 projects indexed, 0 pruned"));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stats_job_reports_json() {
        let summary = StatsJob::new(store()).run().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(value["documents"], 0);
        assert_eq!(value["provider"], "local");
    }
}
