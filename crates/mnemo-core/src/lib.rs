//! Core types and error definitions for Mnemo.
//!
//! This crate provides the foundational types shared across all Mnemo crates:
//! the unified error enum, the task/project entities the index is built from,
//! and the TOML configuration model.
//!
//! # Main types
//!
//! - [`MnemoError`] — Unified error enum for all Mnemo subsystems.
//! - [`MnemoResult`] — Convenience alias for `Result<T, MnemoError>`.
//! - [`Task`] / [`Project`] — Authoritative domain records.
//! - [`MnemoConfig`] — Deployment configuration loaded from `mnemo.toml`.

/// Deployment configuration.
pub mod config;
/// Task and project entities.
pub mod entity;

pub use config::{
    DuplicateConfig, EmbeddingConfig, EmbeddingProviderKind, MnemoConfig, RepositoryConfig,
    SearchConfig, StoreBackend, StoreConfig, SyncConfig,
};
pub use entity::{Project, ProjectStatus, Task, TaskPriority, TaskStatus};

// --- Error types ---

/// Top-level error type for Mnemo.
///
/// Each variant corresponds to a subsystem that can produce errors. A missing
/// record is never an error; lookups return `Option` or `bool` instead.
#[derive(Debug, thiserror::Error)]
pub enum MnemoError {
    /// The embedding provider failed or timed out.
    ///
    /// Providers return this; the guarded embedder absorbs it into a zero
    /// vector so it never reaches indexing or search callers.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A durable index read or write failed. In-memory state is still usable.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The authoritative domain repository failed.
    #[error("Repository error: {0}")]
    Repository(String),

    /// The index was used outside its lifecycle (e.g. after `close`).
    #[error("Index error: {0}")]
    Index(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MnemoError {
    /// True when the operation took effect in memory but was not durably committed.
    pub fn is_persistence(&self) -> bool {
        matches!(self, MnemoError::Persistence(_))
    }
}

/// A convenience `Result` alias using [`MnemoError`].
pub type MnemoResult<T> = Result<T, MnemoError>;
