//! Domain services on top of the semantic index.
//!
//! Gates task and project creation on a similarity-based duplicate policy,
//! keeps the index in step with every mutation, and rebuilds it from the
//! authoritative repository when the two drift apart.
//!
//! # Main types
//!
//! - [`TaskRepository`] / [`ProjectRepository`] — Authoritative record stores.
//! - [`DuplicateDetector`] — Turns search hits into a [`DuplicateCheckResult`].
//! - [`TaskService`] / [`ProjectService`] — Duplicate-gated CRUD with synchronous re-indexing.
//! - [`Reconciler`] — Full re-index plus pruning of documents whose entity is gone.

/// Duplicate-detection policy.
pub mod duplicate;
/// Project CRUD with duplicate gating.
pub mod project_service;
/// Index reconciliation.
pub mod reconcile;
/// Repository traits and in-memory implementations.
pub mod repository;
/// Task CRUD with duplicate gating.
pub mod task_service;

pub use duplicate::{
    CreateOutcome, DuplicateCheckResult, DuplicateDetector, DuplicatePolicy, EntityResolver,
    RepositoryResolver, ResolvedEntity, SimilarMatch,
};
pub use project_service::ProjectService;
pub use reconcile::{ReconcileReport, Reconciler};
pub use repository::{
    InMemoryProjectRepository, InMemoryTaskRepository, ProjectRepository, TaskRepository,
};
pub use task_service::TaskService;
