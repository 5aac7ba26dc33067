use crate::document::Document;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemo_core::{MnemoError, MnemoResult};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Durable mirror of the vector store.
///
/// Must support point upsert, point delete and a full scan for cold loads.
/// `load_all` returns documents in the order they were last written.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads every stored document.
    async fn load_all(&self) -> MnemoResult<Vec<Document>>;

    /// Inserts or replaces a document by id.
    async fn upsert(&self, doc: &Document) -> MnemoResult<()>;

    /// Removes a document by id. Absent ids are not an error.
    async fn delete(&self, id: &str) -> MnemoResult<()>;

    /// Flushes and releases resources.
    async fn close(&self) -> MnemoResult<()> {
        Ok(())
    }

    /// Backend name used in logs and stats.
    fn backend(&self) -> &'static str;
}

fn persistence<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> MnemoError + '_ {
    move |e| MnemoError::Persistence(format!("{context}: {e}"))
}

// --- SQLite ---

/// SQLite-backed store with one row per document.
///
/// Schema: `documents(id TEXT PRIMARY KEY, content TEXT, embedding TEXT,
/// metadata TEXT, created_at TEXT)`; vectors and metadata are JSON text.
/// All calls run on the blocking pool.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> MnemoResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(persistence("Failed to create index directory"))?;
            }
        }
        let conn = Connection::open(path).map_err(persistence("Failed to open index database"))?;
        Self::from_connection(conn)
    }

    /// An in-memory database, for tests and throwaway indexes.
    pub fn open_in_memory() -> MnemoResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(persistence("Failed to open index database"))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> MnemoResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .map_err(persistence("Failed to create documents table"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> MnemoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> MnemoResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| MnemoError::Persistence(format!("Index task failed: {e}")))?
    }
}

type RawRow = (String, String, String, String, String);

fn decode_row((id, content, embedding, metadata, created_at): RawRow) -> MnemoResult<Document> {
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(persistence("Invalid created_at"))?
        .with_timezone(&Utc);
    Ok(Document {
        id,
        content,
        embedding: serde_json::from_str(&embedding)?,
        metadata: serde_json::from_str(&metadata)?,
        created_at,
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn load_all(&self) -> MnemoResult<Vec<Document>> {
        let rows: Vec<RawRow> = self
            .blocking(|conn| {
                // REPLACE deletes and re-inserts, so rowid order is last-write order.
                let mut stmt = conn
                    .prepare(
                        "SELECT id, content, embedding, metadata, created_at
                         FROM documents ORDER BY rowid",
                    )
                    .map_err(persistence("Failed to read documents"))?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })
                    .map_err(persistence("Failed to read documents"))?
                    .collect::<Result<Vec<RawRow>, _>>()
                    .map_err(persistence("Failed to read documents"))?;
                Ok(rows)
            })
            .await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.0.clone();
            match decode_row(row) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable index row"),
            }
        }
        Ok(docs)
    }

    async fn upsert(&self, doc: &Document) -> MnemoResult<()> {
        let id = doc.id.clone();
        let content = doc.content.clone();
        let embedding = serde_json::to_string(&doc.embedding)?;
        let metadata = serde_json::to_string(&doc.metadata)?;
        let created_at = doc.created_at.to_rfc3339();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO documents (id, content, embedding, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, content, embedding, metadata, created_at],
            )
            .map_err(persistence("Failed to write document"))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> MnemoResult<()> {
        let id = id.to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM documents WHERE id = ?1", params![id])
                .map_err(persistence("Failed to delete document"))?;
            Ok(())
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

// --- JSONL journal ---

#[derive(Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum JournalRecord {
    Upsert { document: Document },
    Delete { id: String },
}

/// Append-only JSONL journal.
///
/// Every write appends one record. Loading replays the journal (last write
/// wins), then compacts it to one upsert per live document. A torn trailing
/// line is skipped with a warning.
pub struct JsonlDocumentStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlDocumentStore {
    /// Uses `path`, creating its parent directory.
    pub async fn open(path: PathBuf) -> MnemoResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(persistence("Failed to create index directory"))?;
            }
        }
        Ok(Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Journal location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &JournalRecord) -> MnemoResult<()> {
        use tokio::io::AsyncWriteExt;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(persistence("Failed to open journal"))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(persistence("Failed to append to journal"))?;
        file.flush()
            .await
            .map_err(persistence("Failed to flush journal"))?;
        Ok(())
    }

    async fn compact(&self, docs: &[Document]) -> MnemoResult<()> {
        let mut data = String::new();
        for document in docs {
            let record = JournalRecord::Upsert {
                document: document.clone(),
            };
            data.push_str(&serde_json::to_string(&record)?);
            data.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, data.as_bytes())
            .await
            .map_err(persistence("Failed to write compacted journal"))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(persistence("Failed to replace journal"))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonlDocumentStore {
    async fn load_all(&self) -> MnemoResult<Vec<Document>> {
        let _guard = self.write_lock.lock().await;
        if !tokio::fs::try_exists(&self.path)
            .await
            .map_err(persistence("Failed to stat journal"))?
        {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(persistence("Failed to read journal"))?;

        let mut order: BTreeMap<u64, Document> = BTreeMap::new();
        let mut position: HashMap<String, u64> = HashMap::new();
        let mut seq = 0u64;
        let mut records = 0usize;
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            records += 1;
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(JournalRecord::Upsert { document }) => {
                    if let Some(old) = position.insert(document.id.clone(), seq) {
                        order.remove(&old);
                    }
                    order.insert(seq, document);
                    seq += 1;
                }
                Ok(JournalRecord::Delete { id }) => {
                    if let Some(old) = position.remove(&id) {
                        order.remove(&old);
                    }
                }
                Err(e) => {
                    warn!(line = lineno + 1, error = %e, "Skipping malformed journal record");
                }
            }
        }

        let docs: Vec<Document> = order.into_values().collect();
        if records > docs.len() {
            self.compact(&docs).await?;
            info!(
                path = %self.path.display(),
                records,
                live = docs.len(),
                "Compacted index journal"
            );
        }
        Ok(docs)
    }

    async fn upsert(&self, doc: &Document) -> MnemoResult<()> {
        self.append(&JournalRecord::Upsert {
            document: doc.clone(),
        })
        .await
    }

    async fn delete(&self, id: &str) -> MnemoResult<()> {
        self.append(&JournalRecord::Delete { id: id.to_string() })
            .await
    }

    fn backend(&self) -> &'static str {
        "jsonl"
    }
}

// --- In-memory ---

/// Process-local mirror. Clones share the same contents, so a fresh
/// [`VectorStore`](crate::VectorStore) over a clone behaves like a restart.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    docs: Arc<Mutex<Vec<Document>>>,
}

impl InMemoryDocumentStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.docs.lock().is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load_all(&self) -> MnemoResult<Vec<Document>> {
        Ok(self.docs.lock().clone())
    }

    async fn upsert(&self, doc: &Document) -> MnemoResult<()> {
        let mut docs = self.docs.lock();
        docs.retain(|d| d.id != doc.id);
        docs.push(doc.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> MnemoResult<()> {
        self.docs.lock().retain(|d| d.id != id);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::document::{DocumentKind, DocumentMetadata};

    fn doc(id: &str, content: &str) -> Document {
        Document::new(
            id,
            content,
            vec![0.5, 0.25, 0.0],
            DocumentMetadata::new(DocumentKind::Task, id).with_status("today"),
        )
    }

    #[tokio::test]
    async fn test_sqlite_roundtrip_and_replace() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.upsert(&doc("a", "first")).await.unwrap();
        store.upsert(&doc("b", "second")).await.unwrap();
        store.upsert(&doc("a", "first, edited")).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "b");
        assert_eq!(all[1].id, "a");
        assert_eq!(all[1].content, "first, edited");
        assert_eq!(all[1].embedding, vec![0.5, 0.25, 0.0]);
        assert_eq!(all[1].metadata.status.as_deref(), Some("today"));
    }

    #[tokio::test]
    async fn test_sqlite_delete_absent_is_ok() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.upsert(&doc("a", "x")).await.unwrap();
        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vectors.db");
        {
            let store = SqliteDocumentStore::open(&path).unwrap();
            store.upsert(&doc("a", "persisted")).await.unwrap();
        }
        let store = SqliteDocumentStore::open(&path).unwrap();
        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "persisted");
    }

    #[tokio::test]
    async fn test_jsonl_replay_and_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.jsonl");
        let store = JsonlDocumentStore::open(path.clone()).await.unwrap();
        store.upsert(&doc("a", "one")).await.unwrap();
        store.upsert(&doc("b", "two")).await.unwrap();
        store.upsert(&doc("a", "one again")).await.unwrap();
        store.delete("b").await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "one again");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_skips_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.jsonl");
        let store = JsonlDocumentStore::open(path.clone()).await.unwrap();
        store.upsert(&doc("a", "ok")).await.unwrap();
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"op\":\"upsert\",\"docum").unwrap();
        }
        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "a");
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlDocumentStore::open(dir.path().join("none.jsonl"))
            .await
            .unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_clones_share_state() {
        let store = InMemoryDocumentStore::new();
        let other = store.clone();
        store.upsert(&doc("a", "x")).await.unwrap();
        assert_eq!(other.len(), 1);
        other.delete("a").await.unwrap();
        assert!(store.is_empty());
    }
}
