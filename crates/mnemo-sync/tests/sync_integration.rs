#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the mnemo-sync crate: a scheduled reconciliation
//! pass repairs an index that drifted from its repository.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use mnemo_core::Task;
use mnemo_domain::{InMemoryProjectRepository, InMemoryTaskRepository, Reconciler, TaskRepository};
use mnemo_memory::{Embedder, LocalEmbedding, Retriever, SqliteDocumentStore, VectorStore};
use mnemo_sync::{ReconcileJob, ScheduledJob, Scheduler};

#[tokio::test]
async fn scheduled_reconcile_heals_drift_on_disk() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vectors.db");
    let store = Arc::new(VectorStore::new(
        Embedder::new(Arc::new(LocalEmbedding::default())),
        Arc::new(SqliteDocumentStore::open(&path).unwrap()),
    ));
    let retriever = Retriever::new(store.clone());

    let tasks = Arc::new(InMemoryTaskRepository::new());
    let kept = tasks.create(Task::new("Pagar renta")).await.unwrap();
    let mut orphan = Task::new("Comprar boletos de avión");
    orphan.id = "orphan".into();
    retriever.index_task(&orphan).await.unwrap();

    let reconciler = Arc::new(Reconciler::new(
        tasks,
        Arc::new(InMemoryProjectRepository::new()),
        retriever,
    ));
    let scheduler = Scheduler::new(vec![ScheduledJob::new(
        "reconcile-index",
        "* * * * * * *",
        Arc::new(ReconcileJob::new(reconciler)),
    )]);
    let history = scheduler.history();
    let handle = scheduler.start();

    let mut waited = Duration::ZERO;
    while history.last_run("reconcile-index").is_none() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
    }
    handle.abort();

    let run = history.last_run("reconcile-index").expect("job never fired");
    assert!(run.ok, "{}", run.summary);
    assert!(store
        .exists(&Retriever::task_key(&kept.id))
        .await
        .unwrap());
    assert!(!store.exists(&Retriever::task_key("orphan")).await.unwrap());

    // The repair reached the durable mirror too.
    store.close().await.unwrap();
    let reopened = VectorStore::new(
        Embedder::new(Arc::new(LocalEmbedding::default())),
        Arc::new(SqliteDocumentStore::open(&path).unwrap()),
    );
    assert_eq!(
        reopened.ids(None).await.unwrap(),
        vec![Retriever::task_key(&kept.id)]
    );
}
