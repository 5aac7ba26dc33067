#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the mnemo-memory crate.
//!
//! Covers durable reload across SQLite and JSONL backends, the ranking
//! scenarios used by the duplicate checker, filtered search, and search
//! running concurrently with a bulk re-index.

use std::sync::Arc;

use tempfile::TempDir;

use mnemo_memory::{
    DocumentKind, DocumentMetadata, DocumentStore, Embedder, IndexItem, JsonlDocumentStore,
    LocalEmbedding, MetadataFilter, SqliteDocumentStore, VectorStore,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn store_over(durable: Arc<dyn DocumentStore>) -> VectorStore {
    VectorStore::new(Embedder::new(Arc::new(LocalEmbedding::default())), durable)
}

fn task(id: &str) -> DocumentMetadata {
    DocumentMetadata::new(DocumentKind::Task, id)
}

fn key(id: &str) -> String {
    DocumentKind::Task.key(id)
}

// ---------------------------------------------------------------------------
// 1. Persistence across restart
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sqlite_reload_matches_written_state() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vectors.db");
    let meta = task("1")
        .with_status("today")
        .with_extra("source", serde_json::json!("chat"));

    let written = {
        let store = store_over(Arc::new(SqliteDocumentStore::open(&path).unwrap()));
        let doc = store
            .add(key("1"), "Pagar tarjeta de crédito", meta.clone())
            .await
            .unwrap();
        store.add(key("2"), "Pagar renta", task("2")).await.unwrap();
        store.add(key("2"), "Pagar renta de abril", task("2")).await.unwrap();
        store.add(key("3"), "Comprar boletos", task("3")).await.unwrap();
        assert!(store.delete(&key("3")).await.unwrap());
        store.close().await.unwrap();
        doc
    };

    let store = store_over(Arc::new(SqliteDocumentStore::open(&path).unwrap()));
    assert_eq!(store.count().await.unwrap(), 2);
    let reloaded = store.get(&key("1")).await.unwrap().unwrap();
    assert_eq!(reloaded.content, written.content);
    assert_eq!(reloaded.metadata, meta);
    assert_eq!(reloaded.embedding, written.embedding);
    assert_eq!(
        store.get(&key("2")).await.unwrap().unwrap().content,
        "Pagar renta de abril"
    );
    assert!(store.get(&key("3")).await.unwrap().is_none());

    // Write order survives the restart.
    assert_eq!(store.ids(None).await.unwrap(), vec![key("1"), key("2")]);
}

#[tokio::test]
async fn jsonl_reload_matches_written_state() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("index").join("vectors.jsonl");

    {
        let durable = JsonlDocumentStore::open(path.clone()).await.unwrap();
        let store = store_over(Arc::new(durable));
        store.add(key("1"), "Revisar PR 123", task("1")).await.unwrap();
        store.add(key("2"), "Deploy a producción", task("2")).await.unwrap();
        store.delete(&key("2")).await.unwrap();
        store.delete(&key("2")).await.unwrap();
    }

    let durable = JsonlDocumentStore::open(path).await.unwrap();
    let store = store_over(Arc::new(durable));
    assert_eq!(store.count().await.unwrap(), 1);
    let results = store.search("revisar pr 123", 5, 0.5, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id(), key("1"));
}

// ---------------------------------------------------------------------------
// 2. Ranking scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pagar_ranks_payment_tasks_above_travel() {
    let store = store_over(Arc::new(SqliteDocumentStore::open_in_memory().unwrap()));
    store.add(key("t1"), "Pagar tarjeta de crédito", task("t1")).await.unwrap();
    store.add(key("t2"), "Pagar renta", task("t2")).await.unwrap();
    store.add(key("t3"), "Comprar boletos de avión", task("t3")).await.unwrap();

    let top = store.search("pagar", 2, 0.0, None).await.unwrap();
    let mut ids: Vec<&str> = top.iter().map(|r| r.id()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["task_t1", "task_t2"]);

    let all = store.search("pagar", 3, 0.0, None).await.unwrap();
    let travel = all.iter().find(|r| r.id() == "task_t3").unwrap();
    for hit in &top {
        assert!(hit.score > travel.score);
    }
}

#[tokio::test]
async fn own_content_ranks_first_against_dissimilar() {
    let store = store_over(Arc::new(SqliteDocumentStore::open_in_memory().unwrap()));
    let a = "Preparar presentación trimestral para el equipo";
    let b = "Llamar al dentista";
    store.add(key("a"), a, task("a")).await.unwrap();
    store.add(key("b"), b, task("b")).await.unwrap();

    let results = store.search(a, 2, 0.0, None).await.unwrap();
    assert_eq!(results[0].id(), key("a"));
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn search_respects_limit_order_and_filter() {
    let store = store_over(Arc::new(SqliteDocumentStore::open_in_memory().unwrap()));
    let items: Vec<IndexItem> = (0..30)
        .map(|i| {
            let kind = if i % 3 == 0 {
                DocumentKind::Project
            } else {
                DocumentKind::Task
            };
            IndexItem::new(
                kind.key(&i.to_string()),
                format!("Planificar sprint número {i} del equipo de plataforma"),
                DocumentMetadata::new(kind, i.to_string()),
            )
        })
        .collect();
    store.add_batch(items).await.unwrap();

    for limit in [1, 5, 12] {
        let results = store.search("sprint plataforma", limit, 0.0, None).await.unwrap();
        assert!(results.len() <= limit);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            assert_eq!(pair[0].rank + 1, pair[1].rank);
        }
    }

    let filter = MetadataFilter::kind(DocumentKind::Task);
    let tasks = store
        .search("sprint plataforma", 50, 0.0, Some(&filter))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 20);
    assert!(tasks.iter().all(|r| r.metadata().kind == DocumentKind::Task));
}

// ---------------------------------------------------------------------------
// 3. Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_during_bulk_reindex_never_loses_documents() {
    let store = Arc::new(store_over(Arc::new(
        SqliteDocumentStore::open_in_memory().unwrap(),
    )));
    let seed: Vec<IndexItem> = (0..50)
        .map(|i| IndexItem::new(key(&i.to_string()), format!("Tarea recurrente {i}"), task(&i.to_string())))
        .collect();
    store.add_batch(seed.clone()).await.unwrap();

    let reindex = store.spawn_add_batch(seed);
    let mut observed = Vec::new();
    for _ in 0..20 {
        observed.push(store.count().await.unwrap());
        let hits = store.search("tarea recurrente", 100, 0.0, None).await.unwrap();
        assert_eq!(hits.len(), 50);
        tokio::task::yield_now().await;
    }
    reindex.await.unwrap().unwrap();

    assert!(observed.iter().all(|c| *c == 50));
    assert_eq!(store.count().await.unwrap(), 50);
}
