use crate::repository::{ProjectRepository, TaskRepository};
use mnemo_core::{MnemoError, MnemoResult};
use mnemo_memory::{DocumentKind, MetadataFilter, Retriever};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Tasks re-indexed.
    pub tasks_indexed: usize,
    /// Projects re-indexed.
    pub projects_indexed: usize,
    /// Documents removed because their entity no longer exists.
    pub pruned: usize,
    /// Batches or deletes that landed in memory but not on disk.
    pub persistence_errors: usize,
    /// Wall time of the pass.
    pub elapsed_ms: u64,
}

impl ReconcileReport {
    /// Entities indexed in this pass.
    pub fn indexed(&self) -> usize {
        self.tasks_indexed + self.projects_indexed
    }
}

/// Rebuilds the index from the authoritative repositories.
///
/// Upserts land first, one id at a time, so concurrent readers only ever see
/// documents being added or refreshed. Documents whose entity has vanished
/// are pruned afterwards, when pruning is enabled. A document is only pruned
/// once the repository confirms its entity is gone, so entities created while
/// a pass is running keep their documents.
pub struct Reconciler {
    tasks: Arc<dyn TaskRepository>,
    projects: Arc<dyn ProjectRepository>,
    retriever: Retriever,
    prune_stale: bool,
}

impl Reconciler {
    /// Creates a reconciler that prunes stale documents.
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        projects: Arc<dyn ProjectRepository>,
        retriever: Retriever,
    ) -> Self {
        Self {
            tasks,
            projects,
            retriever,
            prune_stale: true,
        }
    }

    /// Enables or disables pruning.
    pub fn with_prune_stale(mut self, prune_stale: bool) -> Self {
        self.prune_stale = prune_stale;
        self
    }

    /// Full re-index. Returns the number of entities indexed.
    pub async fn reindex_all(&self) -> MnemoResult<usize> {
        Ok(self.reconcile().await?.indexed())
    }

    /// Runs [`reconcile`](Self::reconcile) as its own task.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<MnemoResult<ReconcileReport>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.reconcile().await })
    }

    /// Full re-index followed by pruning.
    pub async fn reconcile(&self) -> MnemoResult<ReconcileReport> {
        let started = Instant::now();
        let mut report = ReconcileReport::default();

        let tasks = self.tasks.list_all().await?;
        let projects = self.projects.list_all().await?;

        tolerate(
            self.retriever.index_tasks_batch(&tasks).await.map(|_| ()),
            &mut report,
        )?;
        report.tasks_indexed = tasks.len();

        tolerate(
            self.retriever
                .index_projects_batch(&projects)
                .await
                .map(|_| ()),
            &mut report,
        )?;
        report.projects_indexed = projects.len();

        if self.prune_stale {
            let live_tasks: HashSet<String> =
                tasks.iter().map(|t| Retriever::task_key(&t.id)).collect();
            let live_projects: HashSet<String> = projects
                .iter()
                .map(|p| Retriever::project_key(&p.id))
                .collect();
            report.pruned += self
                .prune(DocumentKind::Task, &live_tasks, &mut report)
                .await?;
            report.pruned += self
                .prune(DocumentKind::Project, &live_projects, &mut report)
                .await?;
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            tasks = report.tasks_indexed,
            projects = report.projects_indexed,
            pruned = report.pruned,
            persistence_errors = report.persistence_errors,
            elapsed_ms = report.elapsed_ms,
            "Index reconciled"
        );
        Ok(report)
    }

    async fn prune(
        &self,
        kind: DocumentKind,
        live: &HashSet<String>,
        report: &mut ReconcileReport,
    ) -> MnemoResult<usize> {
        let store = self.retriever.store();
        let indexed = store.ids(Some(&MetadataFilter::kind(kind))).await?;
        let mut pruned = 0;
        for id in indexed.iter().filter(|id| !live.contains(*id)) {
            // The snapshot may predate a create that indexed synchronously.
            let Some(doc) = store.get(id).await? else {
                continue;
            };
            if self.entity_exists(kind, &doc.metadata.entity_id).await? {
                continue;
            }
            match store.delete(id).await {
                Ok(true) => pruned += 1,
                Ok(false) => {}
                Err(e) if e.is_persistence() => {
                    report.persistence_errors += 1;
                    pruned += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(pruned)
    }

    async fn entity_exists(&self, kind: DocumentKind, entity_id: &str) -> MnemoResult<bool> {
        Ok(match kind {
            DocumentKind::Task => self.tasks.get_by_id(entity_id).await?.is_some(),
            DocumentKind::Project => self.projects.get_by_id(entity_id).await?.is_some(),
            DocumentKind::Note => true,
        })
    }
}

fn tolerate(result: MnemoResult<()>, report: &mut ReconcileReport) -> MnemoResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(MnemoError::Persistence(msg)) => {
            warn!(error = %msg, "Reconciliation continuing after persistence failure");
            report.persistence_errors += 1;
            Ok(())
        }
        Err(e) => Err(e),
    }
}
