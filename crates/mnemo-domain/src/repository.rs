use async_trait::async_trait;
use chrono::Utc;
use mnemo_core::{MnemoError, MnemoResult, Project, Task};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// Authoritative store of tasks.
///
/// The index never decides whether a task exists; this does.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Fetches a task.
    async fn get_by_id(&self, id: &str) -> MnemoResult<Option<Task>>;

    /// Persists a new task and returns it as stored.
    async fn create(&self, task: Task) -> MnemoResult<Task>;

    /// Replaces an existing task. Unknown ids are an error.
    async fn update(&self, task: Task) -> MnemoResult<Task>;

    /// Removes a task. Returns whether it existed.
    async fn delete(&self, id: &str) -> MnemoResult<bool>;

    /// Every task, oldest first.
    async fn list_all(&self) -> MnemoResult<Vec<Task>>;

    /// Active tasks, oldest first, at most `limit`.
    async fn get_pending(&self, limit: usize) -> MnemoResult<Vec<Task>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|t| t.status.is_active())
            .take(limit)
            .collect())
    }

    /// Active tasks whose title or notes contain `query` (case-insensitive).
    async fn search_text(&self, query: &str, limit: usize) -> MnemoResult<Vec<Task>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|t| t.status.is_active())
            .filter(|t| {
                t.title.to_lowercase().contains(&needle)
                    || t.notes
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
            })
            .take(limit)
            .collect())
    }
}

/// Authoritative store of projects.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Fetches a project.
    async fn get_by_id(&self, id: &str) -> MnemoResult<Option<Project>>;

    /// Persists a new project and returns it as stored.
    async fn create(&self, project: Project) -> MnemoResult<Project>;

    /// Replaces an existing project. Unknown ids are an error.
    async fn update(&self, project: Project) -> MnemoResult<Project>;

    /// Removes a project. Returns whether it existed.
    async fn delete(&self, id: &str) -> MnemoResult<bool>;

    /// Every project, oldest first.
    async fn list_all(&self) -> MnemoResult<Vec<Project>>;

    /// Open projects whose name contains `query` (case-insensitive).
    async fn search_by_name(&self, query: &str, limit: usize) -> MnemoResult<Vec<Project>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|p| p.status.is_active())
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .take(limit)
            .collect())
    }
}

/// Records that can live in a [`RecordMap`].
trait Record: Clone {
    fn id(&self) -> &str;
    fn created_at(&self) -> chrono::DateTime<Utc>;
    fn touch(&mut self);
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }
    fn created_at(&self) -> chrono::DateTime<Utc> {
        self.created_at
    }
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Record for Project {
    fn id(&self) -> &str {
        &self.id
    }
    fn created_at(&self) -> chrono::DateTime<Utc> {
        self.created_at
    }
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

struct RecordMap<T> {
    label: &'static str,
    records: RwLock<HashMap<String, T>>,
}

impl<T: Record> RecordMap<T> {
    fn new(label: &'static str, records: Vec<T>) -> Self {
        Self {
            label,
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|r| (r.id().to_string(), r))
                    .collect(),
            ),
        }
    }

    fn get(&self, id: &str) -> Option<T> {
        self.records.read().get(id).cloned()
    }

    fn create(&self, record: T) -> MnemoResult<T> {
        let mut records = self.records.write();
        if records.contains_key(record.id()) {
            return Err(MnemoError::Repository(format!(
                "{} '{}' already exists",
                self.label,
                record.id()
            )));
        }
        records.insert(record.id().to_string(), record.clone());
        Ok(record)
    }

    fn update(&self, mut record: T) -> MnemoResult<T> {
        let mut records = self.records.write();
        match records.get_mut(record.id()) {
            Some(slot) => {
                record.touch();
                *slot = record.clone();
                Ok(record)
            }
            None => Err(MnemoError::Repository(format!(
                "{} '{}' not found",
                self.label,
                record.id()
            ))),
        }
    }

    fn delete(&self, id: &str) -> bool {
        self.records.write().remove(id).is_some()
    }

    fn list(&self) -> Vec<T> {
        let mut all: Vec<T> = self.records.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        all
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}

fn read_snapshot<T: serde::de::DeserializeOwned>(path: &Path) -> MnemoResult<Vec<T>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        MnemoError::Repository(format!("Failed to read snapshot {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        MnemoError::Repository(format!("Invalid snapshot {}: {e}", path.display()))
    })
}

/// Process-local task repository, optionally seeded from a JSON array.
pub struct InMemoryTaskRepository {
    inner: RecordMap<Task>,
}

impl InMemoryTaskRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::with_tasks(Vec::new())
    }

    /// A repository holding `tasks`.
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            inner: RecordMap::new("task", tasks),
        }
    }

    /// Loads a JSON array of tasks.
    pub fn load(path: &Path) -> MnemoResult<Self> {
        Ok(Self::with_tasks(read_snapshot(path)?))
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn get_by_id(&self, id: &str) -> MnemoResult<Option<Task>> {
        Ok(self.inner.get(id))
    }

    async fn create(&self, task: Task) -> MnemoResult<Task> {
        self.inner.create(task)
    }

    async fn update(&self, task: Task) -> MnemoResult<Task> {
        self.inner.update(task)
    }

    async fn delete(&self, id: &str) -> MnemoResult<bool> {
        Ok(self.inner.delete(id))
    }

    async fn list_all(&self) -> MnemoResult<Vec<Task>> {
        Ok(self.inner.list())
    }
}

/// Process-local project repository, optionally seeded from a JSON array.
pub struct InMemoryProjectRepository {
    inner: RecordMap<Project>,
}

impl InMemoryProjectRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::with_projects(Vec::new())
    }

    /// A repository holding `projects`.
    pub fn with_projects(projects: Vec<Project>) -> Self {
        Self {
            inner: RecordMap::new("project", projects),
        }
    }

    /// Loads a JSON array of projects.
    pub fn load(path: &Path) -> MnemoResult<Self> {
        Ok(Self::with_projects(read_snapshot(path)?))
    }

    /// Number of projects.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryProjectRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn get_by_id(&self, id: &str) -> MnemoResult<Option<Project>> {
        Ok(self.inner.get(id))
    }

    async fn create(&self, project: Project) -> MnemoResult<Project> {
        self.inner.create(project)
    }

    async fn update(&self, project: Project) -> MnemoResult<Project> {
        self.inner.update(project)
    }

    async fn delete(&self, id: &str) -> MnemoResult<bool> {
        Ok(self.inner.delete(id))
    }

    async fn list_all(&self) -> MnemoResult<Vec<Project>> {
        Ok(self.inner.list())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mnemo_core::TaskStatus;

    #[tokio::test]
    async fn test_task_crud() {
        let repo = InMemoryTaskRepository::new();
        let task = repo.create(Task::new("Pagar renta")).await.unwrap();
        assert!(repo.create(task.clone()).await.is_err());

        let mut edited = task.clone();
        edited.status = TaskStatus::Doing;
        let stored = repo.update(edited).await.unwrap();
        assert!(stored.updated_at >= task.updated_at);
        assert_eq!(
            repo.get_by_id(&task.id).await.unwrap().unwrap().status,
            TaskStatus::Doing
        );

        assert!(repo.delete(&task.id).await.unwrap());
        assert!(!repo.delete(&task.id).await.unwrap());
        assert!(repo.update(task).await.is_err());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_pending_and_text_search() {
        let repo = InMemoryTaskRepository::with_tasks(vec![
            Task::new("Pagar renta"),
            Task::new("Pagar luz").with_status(TaskStatus::Done),
            Task::new("Llamar al banco").with_notes("Preguntar por la renta"),
        ]);
        assert_eq!(repo.get_pending(10).await.unwrap().len(), 2);
        assert_eq!(repo.get_pending(1).await.unwrap().len(), 1);

        let hits = repo.search_text("RENTA", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(repo.search_text("luz", 10).await.unwrap().is_empty());
        assert!(repo.search_text("  ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_project_search_by_name() {
        let repo = InMemoryProjectRepository::with_projects(vec![
            Project::new("Website redesign"),
            Project::new("Mobile app"),
        ]);
        let hits = repo.search_by_name("website", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Website redesign");
    }

    #[tokio::test]
    async fn test_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"[{"id":"t1","title":"Revisar PR 123","status":"today"},
                {"id":"t2","title":"Pagar renta"}]"#,
        )
        .unwrap();
        let repo = InMemoryTaskRepository::load(&path).unwrap();
        assert_eq!(repo.len(), 2);
        let t1 = repo.get_by_id("t1").await.unwrap().unwrap();
        assert_eq!(t1.status, TaskStatus::Today);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            InMemoryTaskRepository::load(&path),
            Err(MnemoError::Repository(_))
        ));
    }
}
