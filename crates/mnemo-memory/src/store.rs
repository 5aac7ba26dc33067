use crate::document::{Document, DocumentMetadata, IndexItem, MetadataFilter, SearchResult};
use crate::embedding::{similarity_score, EmbedMode, Embedder};
use crate::persist::DocumentStore;
use mnemo_core::{MnemoError, MnemoResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OnceCell, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Keyed collection of [`Document`]s with a durable mirror.
///
/// Documents are loaded from the [`DocumentStore`] on first use (exactly
/// once, whichever call gets there first). Writes to the same id are
/// serialized so memory and disk never diverge; reads and writes to other
/// ids proceed concurrently. Search is a brute-force cosine scan.
pub struct VectorStore {
    embedder: Embedder,
    durable: Arc<dyn DocumentStore>,
    state: RwLock<IndexState>,
    ready: OnceCell<()>,
    closed: AtomicBool,
    key_locks: KeyLocks,
}

#[derive(Default)]
struct IndexState {
    docs: HashMap<String, Slot>,
    next_seq: u64,
}

struct Slot {
    doc: Document,
    /// Order of last write; breaks score ties.
    seq: u64,
}

impl IndexState {
    fn upsert(&mut self, doc: Document) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.docs.insert(doc.id.clone(), Slot { doc, seq }).is_some()
    }
}

/// Summary of the index contents.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Live documents.
    pub documents: usize,
    /// Documents carrying the zero vector.
    pub degraded: usize,
    /// Documents per `type`.
    pub by_kind: BTreeMap<String, usize>,
    /// Vector dimension.
    pub dimension: usize,
    /// Embedding provider name.
    pub provider: String,
    /// Durable backend name.
    pub backend: String,
}

impl VectorStore {
    /// Creates a store; nothing is loaded until first use.
    pub fn new(embedder: Embedder, durable: Arc<dyn DocumentStore>) -> Self {
        Self {
            embedder,
            durable,
            state: RwLock::new(IndexState::default()),
            ready: OnceCell::new(),
            closed: AtomicBool::new(false),
            key_locks: KeyLocks::default(),
        }
    }

    /// The embedder used for documents and queries.
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Loads the durable mirror into memory. Safe to call from many places;
    /// the load runs once. A failed load is retried on the next call.
    pub async fn initialize(&self) -> MnemoResult<()> {
        self.ensure_open()?;
        self.ready
            .get_or_try_init(|| async {
                let docs = self.durable.load_all().await?;
                let loaded = self.load_into_memory(docs);
                info!(
                    documents = loaded,
                    backend = self.durable.backend(),
                    "Vector store initialized"
                );
                Ok::<(), MnemoError>(())
            })
            .await?;
        Ok(())
    }

    /// Marks the store closed and closes the durable mirror.
    ///
    /// Every later call fails with [`MnemoError::Index`].
    pub async fn close(&self) -> MnemoResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.durable.close().await?;
        info!(backend = self.durable.backend(), "Vector store closed");
        Ok(())
    }

    fn ensure_open(&self) -> MnemoResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MnemoError::Index("vector store is closed".into()));
        }
        Ok(())
    }

    fn load_into_memory(&self, docs: Vec<Document>) -> usize {
        let dimension = self.embedder.dimension();
        let mut state = self.state.write();
        for mut doc in docs {
            if doc.embedding.len() != dimension {
                warn!(
                    id = %doc.id,
                    expected = dimension,
                    got = doc.embedding.len(),
                    "Stored vector has wrong dimension, treating as degraded"
                );
                doc.embedding = vec![0.0; dimension];
            }
            state.upsert(doc);
        }
        state.docs.len()
    }

    /// Embeds `content` and upserts it under `id`, replacing any previous
    /// document with that id.
    ///
    /// A [`MnemoError::Persistence`] means the document is live in memory
    /// but was not durably committed.
    pub async fn add(
        &self,
        id: impl Into<String>,
        content: impl Into<String>,
        metadata: DocumentMetadata,
    ) -> MnemoResult<Document> {
        self.initialize().await?;
        let content = content.into();
        let embedding = self.embedder.embed(&content, EmbedMode::Document).await;
        let doc = Document::new(id, content, embedding, metadata);
        self.commit(&doc).await?;
        Ok(doc)
    }

    /// Upserts many documents with batched embedding calls.
    ///
    /// Output order matches input order. Every item is committed to memory
    /// even when some durable writes fail; those failures are reported
    /// together as one [`MnemoError::Persistence`] at the end.
    pub async fn add_batch(&self, items: Vec<IndexItem>) -> MnemoResult<Vec<Document>> {
        self.initialize().await?;
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<&str> = items.iter().map(|i| i.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts, EmbedMode::Document).await;

        let total = items.len();
        let mut out = Vec::with_capacity(total);
        let mut failed: Vec<String> = Vec::new();
        for (item, embedding) in items.into_iter().zip(embeddings) {
            let doc = Document::new(item.id, item.content, embedding, item.metadata);
            match self.commit(&doc).await {
                Ok(()) => {}
                Err(e) if e.is_persistence() => failed.push(doc.id.clone()),
                Err(e) => return Err(e),
            }
            out.push(doc);
        }

        if !failed.is_empty() {
            return Err(MnemoError::Persistence(format!(
                "{} of {total} documents not durably committed: {}",
                failed.len(),
                failed.join(", ")
            )));
        }
        debug!(count = total, "Batch indexed");
        Ok(out)
    }

    /// Runs [`add_batch`](Self::add_batch) as its own task, off the caller's path.
    pub fn spawn_add_batch(
        self: &Arc<Self>,
        items: Vec<IndexItem>,
    ) -> tokio::task::JoinHandle<MnemoResult<Vec<Document>>> {
        let store = Arc::clone(self);
        tokio::spawn(async move { store.add_batch(items).await })
    }

    async fn commit(&self, doc: &Document) -> MnemoResult<()> {
        let _guard = self.key_locks.lock(&doc.id).await;
        self.ensure_open()?;
        let replaced = self.state.write().upsert(doc.clone());

        if let Err(e) = self.durable.upsert(doc).await {
            warn!(id = %doc.id, error = %e, "Document indexed in memory but not persisted");
            return Err(into_persistence(e));
        }
        debug!(id = %doc.id, replaced, degraded = doc.is_degraded(), "Document indexed");
        Ok(())
    }

    /// Removes `id`. Returns whether it was present; absent ids are not an error.
    pub async fn delete(&self, id: &str) -> MnemoResult<bool> {
        self.initialize().await?;
        let _guard = self.key_locks.lock(id).await;
        self.ensure_open()?;
        let removed = self.state.write().docs.remove(id).is_some();

        // Always forwarded, so a row left behind by an earlier failure is cleared.
        if let Err(e) = self.durable.delete(id).await {
            warn!(id = %id, error = %e, "Document removed from memory but not from disk");
            return Err(into_persistence(e));
        }
        if removed {
            debug!(id = %id, "Document removed");
        }
        Ok(removed)
    }

    /// Fetches a document by id.
    pub async fn get(&self, id: &str) -> MnemoResult<Option<Document>> {
        self.initialize().await?;
        Ok(self.state.read().docs.get(id).map(|s| s.doc.clone()))
    }

    /// Whether `id` is indexed.
    pub async fn exists(&self, id: &str) -> MnemoResult<bool> {
        self.initialize().await?;
        Ok(self.state.read().docs.contains_key(id))
    }

    /// Number of live documents.
    pub async fn count(&self) -> MnemoResult<usize> {
        self.initialize().await?;
        Ok(self.state.read().docs.len())
    }

    /// Ids of documents matching `filter`, in write order.
    pub async fn ids(&self, filter: Option<&MetadataFilter>) -> MnemoResult<Vec<String>> {
        self.initialize().await?;
        let state = self.state.read();
        let mut slots: Vec<&Slot> = state
            .docs
            .values()
            .filter(|s| filter.map_or(true, |f| f.matches(&s.doc.metadata)))
            .collect();
        slots.sort_by_key(|s| s.seq);
        Ok(slots.into_iter().map(|s| s.doc.id.clone()).collect())
    }

    /// Counts by kind and degradation.
    pub async fn stats(&self) -> MnemoResult<IndexStats> {
        self.initialize().await?;
        let state = self.state.read();
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut degraded = 0;
        for slot in state.docs.values() {
            *by_kind
                .entry(slot.doc.metadata.kind.as_str().to_string())
                .or_default() += 1;
            if slot.doc.is_degraded() {
                degraded += 1;
            }
        }
        Ok(IndexStats {
            documents: state.docs.len(),
            degraded,
            by_kind,
            dimension: self.embedder.dimension(),
            provider: self.embedder.provider_name().to_string(),
            backend: self.durable.backend().to_string(),
        })
    }

    /// Ranked documents most similar to `query`.
    ///
    /// The query is embedded in query mode. `filter` is applied before
    /// scoring; hits below `min_score` are dropped; at most `limit` are
    /// returned, ranked from 1.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        min_score: f32,
        filter: Option<&MetadataFilter>,
    ) -> MnemoResult<Vec<SearchResult>> {
        self.initialize().await?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(query, EmbedMode::Query).await;
        Ok(self.rank(&query_vec, limit, min_score, filter, None))
    }

    /// Like [`search`](Self::search), seeded from a stored document's vector.
    /// The seed itself is excluded; an unknown id yields no results.
    pub async fn find_similar(
        &self,
        id: &str,
        limit: usize,
        min_score: f32,
        filter: Option<&MetadataFilter>,
    ) -> MnemoResult<Vec<SearchResult>> {
        self.initialize().await?;
        let seed = match self.state.read().docs.get(id) {
            Some(slot) => slot.doc.embedding.clone(),
            None => return Ok(Vec::new()),
        };
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.rank(&seed, limit, min_score, filter, Some(id)))
    }

    fn rank(
        &self,
        query_vec: &[f32],
        limit: usize,
        min_score: f32,
        filter: Option<&MetadataFilter>,
        exclude: Option<&str>,
    ) -> Vec<SearchResult> {
        let state = self.state.read();
        let mut scored: Vec<(f32, bool, u64, &Document)> = state
            .docs
            .values()
            .filter(|s| exclude != Some(s.doc.id.as_str()))
            .filter(|s| filter.map_or(true, |f| f.matches(&s.doc.metadata)))
            .map(|s| {
                let score = similarity_score(query_vec, &s.doc.embedding);
                (score, s.doc.is_degraded(), s.seq, &s.doc)
            })
            .filter(|(score, ..)| *score >= min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(CmpOrdering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });
        scored.truncate(limit);

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (score, _, _, doc))| SearchResult {
                document: doc.clone(),
                score,
                rank: i + 1,
            })
            .collect()
    }
}

fn into_persistence(e: MnemoError) -> MnemoError {
    match e {
        MnemoError::Persistence(_) => e,
        other => MnemoError::Persistence(other.to_string()),
    }
}

/// Per-id async mutexes. Entries are dropped once nobody holds or awaits them.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let cell = {
            let mut map = self.inner.lock();
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        let guard = Arc::clone(&cell).lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            cell,
            guard: Some(guard),
        }
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    cell: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.inner.lock();
        // One reference in the map, one here: no other holder or waiter.
        if Arc::strong_count(&self.cell) == 2 {
            map.remove(&self.key);
        }
    }
}
