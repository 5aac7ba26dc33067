//! Semantic index for tasks and projects.
//!
//! Turns free-text records into vectors, keeps them in a keyed in-memory
//! collection mirrored to durable storage, and answers ranked nearest-neighbour
//! queries with exact-match metadata filtering.
//!
//! # Main types
//!
//! - [`EmbeddingProvider`] — Trait for turning text into vectors.
//! - [`Embedder`] — Guarded facade: timeouts, batching, zero-vector degrade.
//! - [`LocalEmbedding`] — Offline hashing embedder.
//! - [`VectorStore`] — Keyed document collection with brute-force search.
//! - [`DocumentStore`] — Trait for the durable mirror (SQLite, JSONL, memory).
//! - [`Retriever`] — Task/project aware facade over the store.

/// Documents, metadata and search results.
pub mod document;
/// Embedding provider trait, local implementation and guarded embedder.
pub mod embedding;
/// Google Gemini embedding provider.
#[cfg(feature = "http-embeddings")]
pub mod gemini;
/// Durable mirrors for the vector store.
pub mod persist;
/// Domain-aware retrieval facade.
pub mod retriever;
/// In-memory vector store with durable persistence.
pub mod store;

pub use document::{
    Document, DocumentKind, DocumentMetadata, IndexItem, MetadataFilter, SearchResult,
};
pub use embedding::{
    cosine_similarity, similarity_score, EmbedMode, Embedder, EmbeddingProvider, LocalEmbedding,
};
#[cfg(feature = "http-embeddings")]
pub use gemini::GeminiEmbedding;
pub use persist::{DocumentStore, InMemoryDocumentStore, JsonlDocumentStore, SqliteDocumentStore};
pub use retriever::{
    ContextItem, ContextOptions, RetrievalContext, Retriever, DEFAULT_DUPLICATE_LIMIT,
    DEFAULT_DUPLICATE_THRESHOLD, DEFAULT_IS_DUPLICATE_THRESHOLD, DEFAULT_MIN_SCORE,
    MAX_CONTEXT_PER_TYPE,
};
pub use store::{IndexStats, VectorStore};
