use crate::document::{Document, DocumentKind, DocumentMetadata, IndexItem, MetadataFilter, SearchResult};
use crate::store::VectorStore;
use mnemo_core::{MnemoResult, Project, Task};
use serde::Serialize;
use std::sync::Arc;

/// Minimum score for exploratory search.
pub const DEFAULT_MIN_SCORE: f32 = 0.3;
/// Default threshold for [`Retriever::find_duplicates`].
pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.8;
/// Default result cap for [`Retriever::find_duplicates`].
pub const DEFAULT_DUPLICATE_LIMIT: usize = 5;
/// Default threshold for [`Retriever::is_duplicate`].
pub const DEFAULT_IS_DUPLICATE_THRESHOLD: f32 = 0.85;
/// Hard cap per context section.
pub const MAX_CONTEXT_PER_TYPE: usize = 10;

/// Task/project aware facade over a [`VectorStore`].
///
/// Owns the canonical text and metadata layout for each entity type so that
/// every writer indexes the same entity the same way.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<VectorStore>,
}

impl Retriever {
    /// Wraps a shared store.
    pub fn new(store: Arc<VectorStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Document id for a task.
    pub fn task_key(task_id: &str) -> String {
        DocumentKind::Task.key(task_id)
    }

    /// Document id for a project.
    pub fn project_key(project_id: &str) -> String {
        DocumentKind::Project.key(project_id)
    }

    /// Canonical text: title, notes, context, project name; one per line,
    /// empty fields skipped.
    pub fn task_content(task: &Task) -> String {
        join_lines([
            Some(task.title.clone()),
            task.notes.clone(),
            labelled("Contexto", task.context.as_deref()),
            labelled("Proyecto", task.project_name.as_deref()),
        ])
    }

    /// Canonical text: name, description, objective.
    pub fn project_content(project: &Project) -> String {
        join_lines([
            Some(project.name.clone()),
            project.description.clone(),
            labelled("Objetivo", project.objective.as_deref()),
        ])
    }

    /// Metadata for a task document.
    pub fn task_metadata(task: &Task) -> DocumentMetadata {
        let meta = DocumentMetadata::new(DocumentKind::Task, &task.id)
            .with_status(task.status.as_str())
            .with_priority(task.priority.as_str());
        match &task.project_id {
            Some(project_id) => meta.with_project_id(project_id),
            None => meta,
        }
    }

    /// Metadata for a project document.
    pub fn project_metadata(project: &Project) -> DocumentMetadata {
        DocumentMetadata::new(DocumentKind::Project, &project.id)
            .with_status(project.status.as_str())
    }

    fn task_item(task: &Task) -> IndexItem {
        IndexItem::new(
            Self::task_key(&task.id),
            Self::task_content(task),
            Self::task_metadata(task),
        )
    }

    fn project_item(project: &Project) -> IndexItem {
        IndexItem::new(
            Self::project_key(&project.id),
            Self::project_content(project),
            Self::project_metadata(project),
        )
    }

    /// Indexes (or re-indexes) a task.
    pub async fn index_task(&self, task: &Task) -> MnemoResult<Document> {
        let item = Self::task_item(task);
        self.store.add(item.id, item.content, item.metadata).await
    }

    /// Indexes (or re-indexes) a project.
    pub async fn index_project(&self, project: &Project) -> MnemoResult<Document> {
        let item = Self::project_item(project);
        self.store.add(item.id, item.content, item.metadata).await
    }

    /// Indexes many tasks with batched embedding.
    pub async fn index_tasks_batch(&self, tasks: &[Task]) -> MnemoResult<Vec<Document>> {
        self.store
            .add_batch(tasks.iter().map(Self::task_item).collect())
            .await
    }

    /// Indexes many projects with batched embedding.
    pub async fn index_projects_batch(&self, projects: &[Project]) -> MnemoResult<Vec<Document>> {
        self.store
            .add_batch(projects.iter().map(Self::project_item).collect())
            .await
    }

    /// Removes a task's document. Returns whether it was indexed.
    pub async fn remove_task(&self, task_id: &str) -> MnemoResult<bool> {
        self.store.delete(&Self::task_key(task_id)).await
    }

    /// Removes a project's document. Returns whether it was indexed.
    pub async fn remove_project(&self, project_id: &str) -> MnemoResult<bool> {
        self.store.delete(&Self::project_key(project_id)).await
    }

    /// Unrestricted passthrough to [`VectorStore::search`].
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        min_score: f32,
        filter: Option<&MetadataFilter>,
    ) -> MnemoResult<Vec<SearchResult>> {
        self.store.search(query, limit, min_score, filter).await
    }

    /// Tasks similar to `query`.
    pub async fn search_tasks(
        &self,
        query: &str,
        limit: usize,
        min_score: f32,
    ) -> MnemoResult<Vec<SearchResult>> {
        let filter = MetadataFilter::kind(DocumentKind::Task);
        self.store.search(query, limit, min_score, Some(&filter)).await
    }

    /// Projects similar to `query`.
    pub async fn search_projects(
        &self,
        query: &str,
        limit: usize,
        min_score: f32,
    ) -> MnemoResult<Vec<SearchResult>> {
        let filter = MetadataFilter::kind(DocumentKind::Project);
        self.store.search(query, limit, min_score, Some(&filter)).await
    }

    /// Documents of any type similar to `query`.
    pub async fn search_all(
        &self,
        query: &str,
        limit: usize,
        min_score: f32,
    ) -> MnemoResult<Vec<SearchResult>> {
        self.store.search(query, limit, min_score, None).await
    }

    /// Documents similar to an already indexed document, excluding it.
    pub async fn find_similar_to(
        &self,
        id: &str,
        limit: usize,
        min_score: f32,
    ) -> MnemoResult<Vec<SearchResult>> {
        self.store.find_similar(id, limit, min_score, None).await
    }

    /// Likely duplicates of `text` across all types.
    ///
    /// Callers without an opinion use [`DEFAULT_DUPLICATE_THRESHOLD`] and
    /// [`DEFAULT_DUPLICATE_LIMIT`].
    pub async fn find_duplicates(
        &self,
        text: &str,
        threshold: f32,
        limit: usize,
    ) -> MnemoResult<Vec<SearchResult>> {
        self.store.search(text, limit, threshold, None).await
    }

    /// Likely duplicates of `text` among documents of one kind.
    pub async fn find_duplicates_of(
        &self,
        kind: DocumentKind,
        text: &str,
        threshold: f32,
        limit: usize,
    ) -> MnemoResult<Vec<SearchResult>> {
        let filter = MetadataFilter::kind(kind);
        self.store.search(text, limit, threshold, Some(&filter)).await
    }

    /// Whether anything indexed scores at least `threshold` against `text`.
    pub async fn is_duplicate(&self, text: &str, threshold: f32) -> MnemoResult<bool> {
        Ok(!self.find_duplicates(text, threshold, 1).await?.is_empty())
    }

    /// Bounded context bundle for a downstream prompt.
    ///
    /// Each section is searched and capped independently, so the bundle size
    /// does not grow with the corpus.
    pub async fn get_context(
        &self,
        query: &str,
        options: &ContextOptions,
    ) -> MnemoResult<RetrievalContext> {
        let limit = options.limit_per_type.min(MAX_CONTEXT_PER_TYPE);
        let mut context = RetrievalContext {
            query: query.to_string(),
            tasks: Vec::new(),
            projects: Vec::new(),
        };
        if options.include_tasks {
            context.tasks = self
                .search_tasks(query, limit, options.min_score)
                .await?
                .iter()
                .map(ContextItem::from_result)
                .collect();
        }
        if options.include_projects {
            context.projects = self
                .search_projects(query, limit, options.min_score)
                .await?
                .iter()
                .map(ContextItem::from_result)
                .collect();
        }
        Ok(context)
    }
}

fn labelled(label: &str, value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| format!("{label}: {v}"))
}

fn join_lines<const N: usize>(parts: [Option<String>; N]) -> String {
    parts
        .into_iter()
        .flatten()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sections to include in [`Retriever::get_context`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Search tasks.
    pub include_tasks: bool,
    /// Search projects.
    pub include_projects: bool,
    /// Cap per section (at most [`MAX_CONTEXT_PER_TYPE`]).
    pub limit_per_type: usize,
    /// Minimum score per hit.
    pub min_score: f32,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            include_tasks: true,
            include_projects: true,
            limit_per_type: 3,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

/// One entry of a context section.
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    /// Entity id (not the document id).
    pub entity_id: String,
    /// First line of the indexed text.
    pub title: String,
    /// Entity status, when indexed.
    pub status: Option<String>,
    /// Similarity score.
    pub score: f32,
}

impl ContextItem {
    fn from_result(result: &SearchResult) -> Self {
        Self {
            entity_id: result.metadata().entity_id.clone(),
            title: result.document.title().to_string(),
            status: result.metadata().status.clone(),
            score: result.score,
        }
    }
}

/// Output of [`Retriever::get_context`].
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalContext {
    /// The query the bundle was built for.
    pub query: String,
    /// Similar tasks, best first.
    pub tasks: Vec<ContextItem>,
    /// Similar projects, best first.
    pub projects: Vec<ContextItem>,
}

impl RetrievalContext {
    /// True when no section has entries.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.projects.is_empty()
    }

    /// Renders the bundle as plain text for a prompt; empty when nothing matched.
    pub fn to_prompt_context(&self) -> String {
        let mut out = String::new();
        for (heading, items) in [
            ("Related tasks", &self.tasks),
            ("Related projects", &self.projects),
        ] {
            if items.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(heading);
            out.push_str(":\n");
            for item in items {
                let pct = (item.score * 100.0).round() as u32;
                match &item.status {
                    Some(status) => {
                        out.push_str(&format!("- {} ({status}, {pct}% match)\n", item.title));
                    }
                    None => out.push_str(&format!("- {} ({pct}% match)\n", item.title)),
                }
            }
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, LocalEmbedding};
    use crate::persist::InMemoryDocumentStore;
    use mnemo_core::{TaskPriority, TaskStatus};

    fn retriever() -> Retriever {
        let store = VectorStore::new(
            Embedder::new(Arc::new(LocalEmbedding::default())),
            Arc::new(InMemoryDocumentStore::new()),
        );
        Retriever::new(Arc::new(store))
    }

    fn task(id: &str, title: &str) -> Task {
        let mut t = Task::new(title);
        t.id = id.to_string();
        t
    }

    fn project(id: &str, name: &str) -> Project {
        let mut p = Project::new(name);
        p.id = id.to_string();
        p
    }

    #[test]
    fn test_task_content_layout() {
        let t = task("1", "Pagar tarjeta")
            .with_notes("Antes del día 5")
            .with_context("home")
            .with_project("p9", "Finanzas");
        assert_eq!(
            Retriever::task_content(&t),
            "Pagar tarjeta\nAntes del día 5\nContexto: home\nProyecto: Finanzas"
        );
        assert_eq!(Retriever::task_content(&task("2", "Solo título")), "Solo título");

        let mut blank = task("3", "Título");
        blank.notes = Some("   ".into());
        blank.context = Some(String::new());
        assert_eq!(Retriever::task_content(&blank), "Título");
    }

    #[test]
    fn test_project_content_layout() {
        let p = project("p1", "Website redesign")
            .with_description("New landing page and blog")
            .with_objective("Launch by June");
        assert_eq!(
            Retriever::project_content(&p),
            "Website redesign\nNew landing page and blog\nObjetivo: Launch by June"
        );
    }

    #[test]
    fn test_task_metadata() {
        let t = task("7", "x")
            .with_status(TaskStatus::Today)
            .with_priority(TaskPriority::Urgent)
            .with_project("p1", "P");
        let meta = Retriever::task_metadata(&t);
        assert_eq!(meta.kind, DocumentKind::Task);
        assert_eq!(meta.entity_id, "7");
        assert_eq!(meta.status.as_deref(), Some("today"));
        assert_eq!(meta.priority.as_deref(), Some("urgent"));
        assert_eq!(meta.project_id.as_deref(), Some("p1"));
        assert_eq!(Retriever::task_key("7"), "task_7");
        assert_eq!(Retriever::project_key("p1"), "project_p1");
    }

    #[tokio::test]
    async fn test_search_tasks_ignores_projects() {
        let r = retriever();
        r.index_task(&task("1", "Website copy review")).await.unwrap();
        r.index_project(&project("1", "Website copy review")).await.unwrap();

        let tasks = r.search_tasks("website copy", 5, 0.1).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id(), "task_1");

        let projects = r.search_projects("website copy", 5, 0.1).await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id(), "project_1");

        assert_eq!(r.search_all("website copy", 10, 0.1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_task() {
        let r = retriever();
        r.index_task(&task("1", "Pagar renta")).await.unwrap();
        assert!(r.remove_task("1").await.unwrap());
        assert!(!r.remove_task("1").await.unwrap());
        assert_eq!(r.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reindex_replaces_document() {
        let r = retriever();
        let mut t = task("1", "Pagar renta");
        r.index_task(&t).await.unwrap();
        t.status = TaskStatus::Done;
        r.index_task(&t).await.unwrap();

        assert_eq!(r.store().count().await.unwrap(), 1);
        let doc = r.store().get("task_1").await.unwrap().unwrap();
        assert_eq!(doc.metadata.status.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_duplicates() {
        let r = retriever();
        r.index_task(&task("1", "Revisar PR 123")).await.unwrap();
        r.index_task(&task("2", "Pagar renta")).await.unwrap();

        let dups = r
            .find_duplicates("revisar pr 123", DEFAULT_DUPLICATE_THRESHOLD, DEFAULT_DUPLICATE_LIMIT)
            .await
            .unwrap();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].id(), "task_1");

        assert!(r
            .is_duplicate("Revisar PR 123", DEFAULT_IS_DUPLICATE_THRESHOLD)
            .await
            .unwrap());
        assert!(!r
            .is_duplicate("Comprar leche", DEFAULT_IS_DUPLICATE_THRESHOLD)
            .await
            .unwrap());
        assert!(r
            .find_duplicates_of(DocumentKind::Project, "Revisar PR 123", 0.5, 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_batch_indexing() {
        let r = retriever();
        let tasks = vec![task("1", "uno"), task("2", "dos"), task("3", "tres")];
        let docs = r.index_tasks_batch(&tasks).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[1].id, "task_2");
        let projects = vec![project("a", "Alpha launch")];
        r.index_projects_batch(&projects).await.unwrap();
        assert_eq!(r.store().count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_context_is_bounded() {
        let r = retriever();
        let mut tasks = Vec::new();
        for i in 0..25 {
            tasks.push(task(&i.to_string(), &format!("Landing page copy {i}")));
        }
        r.index_tasks_batch(&tasks).await.unwrap();
        r.index_project(
            &project("w", "Website redesign").with_description("New landing page and blog"),
        )
        .await
        .unwrap();

        let ctx = r.get_context("landing page", &ContextOptions::default()).await.unwrap();
        assert_eq!(ctx.tasks.len(), 3);
        assert_eq!(ctx.projects.len(), 1);
        assert_eq!(ctx.projects[0].title, "Website redesign");

        let wide = ContextOptions {
            limit_per_type: 500,
            include_projects: false,
            ..ContextOptions::default()
        };
        let ctx = r.get_context("landing page", &wide).await.unwrap();
        assert_eq!(ctx.tasks.len(), MAX_CONTEXT_PER_TYPE);
        assert!(ctx.projects.is_empty());

        let rendered = ctx.to_prompt_context();
        assert!(rendered.starts_with("Related tasks:\n- Landing page copy"));
        assert!(!rendered.contains("Related projects"));
    }

    #[tokio::test]
    async fn test_empty_context_renders_empty() {
        let r = retriever();
        let ctx = r.get_context("nada", &ContextOptions::default()).await.unwrap();
        assert!(ctx.is_empty());
        assert_eq!(ctx.to_prompt_context(), "");
    }
}
