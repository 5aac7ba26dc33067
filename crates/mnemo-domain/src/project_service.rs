use crate::duplicate::{CreateOutcome, DuplicateCheckResult, DuplicateDetector};
use crate::repository::ProjectRepository;
use chrono::Utc;
use mnemo_core::{MnemoResult, Project, ProjectStatus};
use mnemo_memory::{DocumentKind, Retriever, DEFAULT_MIN_SCORE};
use std::sync::Arc;
use tracing::{info, warn};

/// Project operations with duplicate gating and synchronous re-indexing.
pub struct ProjectService {
    repo: Arc<dyn ProjectRepository>,
    retriever: Retriever,
    detector: Arc<DuplicateDetector>,
}

impl ProjectService {
    /// Creates the service.
    pub fn new(
        repo: Arc<dyn ProjectRepository>,
        retriever: Retriever,
        detector: Arc<DuplicateDetector>,
    ) -> Self {
        Self {
            repo,
            retriever,
            detector,
        }
    }

    /// Checks `text` against indexed projects with the policy threshold.
    pub async fn check_duplicate(&self, text: &str) -> MnemoResult<DuplicateCheckResult> {
        self.detector
            .check(DocumentKind::Project, text, self.detector.policy().threshold)
            .await
    }

    /// Creates `candidate` unless it looks like an existing project.
    pub async fn create_with_duplicate_check(
        &self,
        candidate: Project,
        check_duplicates: bool,
    ) -> MnemoResult<CreateOutcome<Project>> {
        let duplicates = if check_duplicates {
            let result = self.check_duplicate(&candidate.name).await?;
            if self.detector.policy().should_block(&result) {
                info!(
                    name = %candidate.name,
                    confidence = result.confidence,
                    "Project creation withheld pending confirmation"
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
    pub async fn force_create(&self, candidate: Project) -> MnemoResult<Project> {
        let project = self.repo.create(candidate).await?;
        self.reindex(&project).await;
        info!(project = %project.id, name = %project.name, "Project created");
        Ok(project)
    }

    /// Replaces a project.
    pub async fn update(&self, project: Project) -> MnemoResult<Project> {
        let project = self.repo.update(project).await?;
        self.reindex(&project).await;
        Ok(project)
    }

    /// Marks a project completed at 100%. `None` if it does not exist.
    pub async fn complete(&self, id: &str) -> MnemoResult<Option<Project>> {
        let Some(mut project) = self.repo.get_by_id(id).await? else {
            return Ok(None);
        };
        project.status = ProjectStatus::Completed;
        project.progress = 100;
        project.updated_at = Utc::now();
        self.update(project).await.map(Some)
    }

    /// Sets progress (capped at 100). `None` if it does not exist.
    pub async fn update_progress(&self, id: &str, progress: u8) -> MnemoResult<Option<Project>> {
        let Some(mut project) = self.repo.get_by_id(id).await? else {
            return Ok(None);
        };
        project.progress = progress.min(100);
        project.updated_at = Utc::now();
        self.update(project).await.map(Some)
    }

    /// Deletes a project and its document. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> MnemoResult<bool> {
        let existed = self.repo.delete(id).await?;
        if let Err(e) = self.retriever.remove_project(id).await {
            warn!(project = %id, error = %e, "Project deleted but its document could not be removed");
        }
        Ok(existed)
    }

    /// Open projects relevant to `query`; falls back to a name match.
    pub async fn smart_search(&self, query: &str, limit: usize) -> MnemoResult<Vec<Project>> {
        let hits = self
            .retriever
            .search_projects(query, limit.saturating_mul(2), DEFAULT_MIN_SCORE)
            .await?;

        let mut projects = Vec::new();
        for hit in &hits {
            if projects.len() >= limit {
                break;
            }
            if let Some(project) = self.repo.get_by_id(&hit.metadata().entity_id).await? {
                if project.status.is_active() {
                    projects.push(project);
                }
            }
        }

        if projects.is_empty() {
            return self.repo.search_by_name(query, limit).await;
        }
        Ok(projects)
    }

    async fn reindex(&self, project: &Project) {
        if let Err(e) = self.retriever.index_project(project).await {
            warn!(
                project = %project.id,
                error = %e,
                in_memory_only = e.is_persistence(),
                "Project saved but re-index failed; reconciliation will repair it"
            );
        }
    }
}
