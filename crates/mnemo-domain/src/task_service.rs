use crate::duplicate::{CreateOutcome, DuplicateCheckResult, DuplicateDetector};
use crate::repository::TaskRepository;
use chrono::Utc;
use mnemo_core::{MnemoResult, Task, TaskStatus};
use mnemo_memory::{DocumentKind, MetadataFilter, Retriever, DEFAULT_MIN_SCORE};
use std::sync::Arc;
use tracing::{info, warn};

/// Task operations with duplicate gating and synchronous re-indexing.
///
/// Every successful write is re-indexed before returning so the next
/// duplicate check sees it. An index failure after a successful write is
/// logged, not returned; reconciliation repairs it.
pub struct TaskService {
    repo: Arc<dyn TaskRepository>,
    retriever: Retriever,
    detector: Arc<DuplicateDetector>,
}

impl TaskService {
    /// Creates the service.
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        retriever: Retriever,
        detector: Arc<DuplicateDetector>,
    ) -> Self {
        Self {
            repo,
            retriever,
            detector,
        }
    }

    /// Checks `text` against indexed tasks with the policy threshold.
    pub async fn check_duplicate(&self, text: &str) -> MnemoResult<DuplicateCheckResult> {
        self.check_duplicate_with(text, self.detector.policy().threshold)
            .await
    }

    /// Checks `text` against indexed tasks with an explicit threshold.
    pub async fn check_duplicate_with(
        &self,
        text: &str,
        threshold: f32,
    ) -> MnemoResult<DuplicateCheckResult> {
        self.detector.check(DocumentKind::Task, text, threshold).await
    }

    /// Creates `candidate` unless it looks like an existing task.
    ///
    /// Above the auto-block threshold nothing is persisted and the candidate
    /// comes back in [`CreateOutcome::Blocked`]; use
    /// [`force_create`](Self::force_create) once a human confirms.
    pub async fn create_with_duplicate_check(
        &self,
        candidate: Task,
        check_duplicates: bool,
    ) -> MnemoResult<CreateOutcome<Task>> {
        let duplicates = if check_duplicates {
            let result = self.check_duplicate(&candidate.title).await?;
            if self.detector.policy().should_block(&result) {
                info!(
                    title = %candidate.title,
                    confidence = result.confidence,
                    "Task creation withheld pending confirmation"
                );
                return Ok(CreateOutcome::Blocked {
                    candidate,
                    duplicates: result,
                });
            }
            Some(result)
        } else {
            None
        };

        let entity = self.force_create(candidate).await?;
        Ok(CreateOutcome::Created { entity, duplicates })
    }

    /// Creates without any duplicate check.
    pub async fn force_create(&self, candidate: Task) -> MnemoResult<Task> {
        let task = self.repo.create(candidate).await?;
        self.reindex(&task).await;
        info!(task = %task.id, title = %task.title, "Task created");
        Ok(task)
    }

    /// Replaces a task.
    pub async fn update(&self, task: Task) -> MnemoResult<Task> {
        let task = self.repo.update(task).await?;
        self.reindex(&task).await;
        Ok(task)
    }

    /// Marks a task done. `None` if it does not exist.
    pub async fn complete(&self, id: &str) -> MnemoResult<Option<Task>> {
        self.update_status(id, TaskStatus::Done).await
    }

    /// Moves a task to `status`. `None` if it does not exist.
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> MnemoResult<Option<Task>> {
        let Some(mut task) = self.repo.get_by_id(id).await? else {
            return Ok(None);
        };
        task.status = status;
        task.updated_at = Utc::now();
        self.update(task).await.map(Some)
    }

    /// Deletes a task and its document. Returns whether the task existed.
    pub async fn delete(&self, id: &str) -> MnemoResult<bool> {
        let existed = self.repo.delete(id).await?;
        if let Err(e) = self.retriever.remove_task(id).await {
            warn!(task = %id, error = %e, "Task deleted but its document could not be removed");
        }
        Ok(existed)
    }

    /// Active tasks relevant to `query`, best first.
    ///
    /// Semantic hits are resolved against the repository; when none survive,
    /// falls back to a substring match over active tasks.
    pub async fn smart_search(&self, query: &str, limit: usize) -> MnemoResult<Vec<Task>> {
        let hits = self
            .retriever
            .search_tasks(query, limit.saturating_mul(2), DEFAULT_MIN_SCORE)
            .await?;

        let mut tasks = Vec::new();
        for hit in &hits {
            if tasks.len() >= limit {
                break;
            }
            if let Some(task) = self.repo.get_by_id(&hit.metadata().entity_id).await? {
                if task.status.is_active() {
                    tasks.push(task);
                }
            }
        }

        if tasks.is_empty() {
            return self.repo.search_text(query, limit).await;
        }
        Ok(tasks)
    }

    /// Tasks most similar to an existing one, with scores.
    pub async fn find_similar(
        &self,
        task_id: &str,
        limit: usize,
        min_score: f32,
    ) -> MnemoResult<Vec<(Task, f32)>> {
        let filter = MetadataFilter::kind(DocumentKind::Task);
        let hits = self
            .retriever
            .store()
            .find_similar(&Retriever::task_key(task_id), limit, min_score, Some(&filter))
            .await?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(task) = self.repo.get_by_id(&hit.metadata().entity_id).await? {
                out.push((task, hit.score));
            }
        }
        Ok(out)
    }

    async fn reindex(&self, task: &Task) {
        if let Err(e) = self.retriever.index_task(task).await {
            warn!(
                task = %task.id,
                error = %e,
                in_memory_only = e.is_persistence(),
                "Task saved but re-index failed; reconciliation will repair it"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::duplicate::{DuplicatePolicy, RepositoryResolver};
    use crate::repository::{InMemoryProjectRepository, InMemoryTaskRepository};
    use mnemo_memory::{Embedder, InMemoryDocumentStore, LocalEmbedding, VectorStore};

    struct Fixture {
        service: TaskService,
        repo: Arc<InMemoryTaskRepository>,
        retriever: Retriever,
    }

    fn fixture() -> Fixture {
        let retriever = Retriever::new(Arc::new(VectorStore::new(
            Embedder::new(Arc::new(LocalEmbedding::default())),
            Arc::new(InMemoryDocumentStore::new()),
        )));
        let repo = Arc::new(InMemoryTaskRepository::new());
        let resolver = Arc::new(RepositoryResolver::new(
            repo.clone(),
            Arc::new(InMemoryProjectRepository::new()),
        ));
        let detector = Arc::new(DuplicateDetector::new(
            retriever.clone(),
            resolver,
            DuplicatePolicy::default(),
        ));
        Fixture {
            service: TaskService::new(repo.clone(), retriever.clone(), detector),
            repo,
            retriever,
        }
    }

    #[tokio::test]
    async fn test_create_indexes_immediately() {
        let f = fixture();
        let outcome = f
            .service
            .create_with_duplicate_check(Task::new("Revisar PR 123"), true)
            .await
            .unwrap();
        assert!(!outcome.is_blocked());
        let id = outcome.entity().id.clone();
        assert!(f
            .retriever
            .store()
            .exists(&Retriever::task_key(&id))
            .await
            .unwrap());

        let check = f.service.check_duplicate("revisar pr 123").await.unwrap();
        assert!(check.is_duplicate);
        assert_eq!(check.top_match().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_high_confidence_duplicate_is_blocked_uncommitted() {
        let f = fixture();
        f.service.force_create(Task::new("Pagar renta")).await.unwrap();

        let candidate = Task::new("pagar renta");
        let candidate_id = candidate.id.clone();
        let outcome = f
            .service
            .create_with_duplicate_check(candidate, true)
            .await
            .unwrap();

        match &outcome {
            CreateOutcome::Blocked { candidate, duplicates } => {
                assert_eq!(candidate.id, candidate_id);
                assert!(duplicates.confidence > 0.85);
                assert!(duplicates.suggestion.is_some());
            }
            CreateOutcome::Created { .. } => panic!("expected block"),
        }
        assert_eq!(f.repo.len(), 1);
        assert!(f.repo.get_by_id(&candidate_id).await.unwrap().is_none());

        let forced = f.service.force_create(outcome.entity().clone()).await.unwrap();
        assert_eq!(forced.id, candidate_id);
        assert_eq!(f.repo.len(), 2);
    }

    #[tokio::test]
    async fn test_unchecked_create_skips_gate() {
        let f = fixture();
        f.service.force_create(Task::new("Pagar renta")).await.unwrap();
        let outcome = f
            .service
            .create_with_duplicate_check(Task::new("Pagar renta"), false)
            .await
            .unwrap();
        assert!(!outcome.is_blocked());
        assert!(outcome.duplicates().is_none());
        assert_eq!(f.repo.len(), 2);
    }

    #[tokio::test]
    async fn test_distinct_task_is_created_with_informational_result() {
        let f = fixture();
        f.service.force_create(Task::new("Deploy a producción")).await.unwrap();
        let outcome = f
            .service
            .create_with_duplicate_check(Task::new("Comprar leche"), true)
            .await
            .unwrap();
        assert!(!outcome.is_blocked());
        assert!(!outcome.duplicates().unwrap().is_duplicate);
    }

    #[tokio::test]
    async fn test_status_change_reindexes() {
        let f = fixture();
        let task = f.service.force_create(Task::new("Llamar al banco")).await.unwrap();
        let done = f.service.complete(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Done);

        let doc = f
            .retriever
            .store()
            .get(&Retriever::task_key(&task.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.metadata.status.as_deref(), Some("done"));

        assert!(f.service.complete("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_changes_indexed_text() {
        let f = fixture();
        let mut task = f.service.force_create(Task::new("Comprar pan")).await.unwrap();
        task.title = "Renovar pasaporte".into();
        f.service.update(task.clone()).await.unwrap();

        let check = f.service.check_duplicate("Renovar pasaporte").await.unwrap();
        assert!(check.is_duplicate);
        let stale = f.service.check_duplicate("Comprar pan").await.unwrap();
        assert!(!stale.is_duplicate);
    }

    #[tokio::test]
    async fn test_delete_removes_document() {
        let f = fixture();
        let task = f.service.force_create(Task::new("Pagar renta")).await.unwrap();
        assert!(f.service.delete(&task.id).await.unwrap());
        assert!(!f.service.delete(&task.id).await.unwrap());
        assert_eq!(f.retriever.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_smart_search_skips_finished_and_falls_back() {
        let f = fixture();
        let open = f.service.force_create(Task::new("Pagar renta")).await.unwrap();
        let finished = f
            .service
            .force_create(Task::new("Pagar tarjeta de crédito"))
            .await
            .unwrap();
        f.service.complete(&finished.id).await.unwrap();

        let found = f.service.smart_search("pagar", 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, open.id);

        // Written straight to the repository, so only the substring fallback sees it.
        f.repo
            .create(Task::new("Zx9 calibration"))
            .await
            .unwrap();
        let fallback = f.service.smart_search("zx9 calib", 5).await.unwrap();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].title, "Zx9 calibration");
    }

    #[tokio::test]
    async fn test_find_similar_tasks() {
        let f = fixture();
        let a = f.service.force_create(Task::new("Comprar leche")).await.unwrap();
        let b = f
            .service
            .force_create(Task::new("Comprar leche y pan"))
            .await
            .unwrap();
        f.service.force_create(Task::new("Deploy a producción")).await.unwrap();

        let similar = f.service.find_similar(&a.id, 5, 0.5).await.unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].0.id, b.id);
        assert!(similar[0].1 > 0.5);
    }
}
