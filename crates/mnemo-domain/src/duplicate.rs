use crate::repository::{ProjectRepository, TaskRepository};
use async_trait::async_trait;
use mnemo_core::{DuplicateConfig, MnemoResult};
use mnemo_memory::{DocumentKind, Retriever};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// One resolved near-duplicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarMatch {
    /// Entity id.
    pub id: String,
    /// Entity title or name, as currently stored.
    pub title: String,
    /// Entity status label, as currently stored.
    pub status: String,
    /// Similarity score in [0, 1].
    pub score: f32,
}

/// Outcome of a duplicate check. Ambiguity is data, never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCheckResult {
    /// `confidence` exceeded the threshold.
    pub is_duplicate: bool,
    /// Best score among resolved matches, 0 when none resolved.
    pub confidence: f32,
    /// Resolved matches, best first.
    pub similar_matches: Vec<SimilarMatch>,
    /// Human-facing hint naming the top match, set when `is_duplicate`.
    pub suggestion: Option<String>,
}

impl DuplicateCheckResult {
    /// A result with no matches.
    pub fn empty() -> Self {
        Self {
            is_duplicate: false,
            confidence: 0.0,
            similar_matches: Vec::new(),
            suggestion: None,
        }
    }

    /// The best match, if any.
    pub fn top_match(&self) -> Option<&SimilarMatch> {
        self.similar_matches.first()
    }
}

/// Thresholds for the duplicate gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicatePolicy {
    /// Score above which a match is reported as a duplicate.
    pub threshold: f32,
    /// Score above which creation is withheld pending confirmation.
    pub auto_block_threshold: f32,
    /// Maximum matches examined per check.
    pub max_matches: usize,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            auto_block_threshold: 0.85,
            max_matches: 3,
        }
    }
}

impl From<&DuplicateConfig> for DuplicatePolicy {
    fn from(config: &DuplicateConfig) -> Self {
        Self {
            threshold: config.threshold,
            auto_block_threshold: config.auto_block_threshold,
            max_matches: config.max_matches,
        }
    }
}

impl DuplicatePolicy {
    /// Whether `result` is confident enough to withhold creation.
    pub fn should_block(&self, result: &DuplicateCheckResult) -> bool {
        result.confidence > self.auto_block_threshold
    }
}

/// An entity as currently held by the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    /// Entity id.
    pub id: String,
    /// Title or name.
    pub title: String,
    /// Status label.
    pub status: String,
}

/// Maps an index hit back to its authoritative record.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// `None` when the entity no longer exists.
    async fn resolve(&self, kind: DocumentKind, entity_id: &str)
        -> MnemoResult<Option<ResolvedEntity>>;
}

/// Resolves tasks and projects through their repositories.
pub struct RepositoryResolver {
    tasks: Arc<dyn TaskRepository>,
    projects: Arc<dyn ProjectRepository>,
}

impl RepositoryResolver {
    /// Creates a resolver over both repositories.
    pub fn new(tasks: Arc<dyn TaskRepository>, projects: Arc<dyn ProjectRepository>) -> Self {
        Self { tasks, projects }
    }
}

#[async_trait]
impl EntityResolver for RepositoryResolver {
    async fn resolve(
        &self,
        kind: DocumentKind,
        entity_id: &str,
    ) -> MnemoResult<Option<ResolvedEntity>> {
        Ok(match kind {
            DocumentKind::Task => self.tasks.get_by_id(entity_id).await?.map(|t| ResolvedEntity {
                id: t.id,
                title: t.title,
                status: t.status.as_str().to_string(),
            }),
            DocumentKind::Project => {
                self.projects
                    .get_by_id(entity_id)
                    .await?
                    .map(|p| ResolvedEntity {
                        id: p.id,
                        title: p.name,
                        status: p.status.as_str().to_string(),
                    })
            }
            DocumentKind::Note => None,
        })
    }
}

/// Turns index hits into a [`DuplicateCheckResult`].
///
/// Hits whose entity no longer resolves are dropped and counted; a growing
/// count means the index needs reconciling.
pub struct DuplicateDetector {
    retriever: Retriever,
    resolver: Arc<dyn EntityResolver>,
    policy: DuplicatePolicy,
    stale_hits: AtomicU64,
}

impl DuplicateDetector {
    /// Creates a detector.
    pub fn new(
        retriever: Retriever,
        resolver: Arc<dyn EntityResolver>,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            retriever,
            resolver,
            policy,
            stale_hits: AtomicU64::new(0),
        }
    }

    /// The active thresholds.
    pub fn policy(&self) -> &DuplicatePolicy {
        &self.policy
    }

    /// Stale hits dropped since start-up.
    pub fn stale_hits(&self) -> u64 {
        self.stale_hits.load(Ordering::Relaxed)
    }

    /// Checks `text` against indexed entities of `kind`.
    ///
    /// Only hits scoring at least `threshold` are examined, and only those
    /// that still resolve are reported. `is_duplicate` requires the best
    /// resolved score to be strictly above `threshold`.
    pub async fn check(
        &self,
        kind: DocumentKind,
        text: &str,
        threshold: f32,
    ) -> MnemoResult<DuplicateCheckResult> {
        let hits = self
            .retriever
            .find_duplicates_of(kind, text, threshold, self.policy.max_matches)
            .await?;

        let mut matches = Vec::with_capacity(hits.len());
        for hit in &hits {
            let entity_id = &hit.metadata().entity_id;
            match self.resolver.resolve(kind, entity_id).await? {
                Some(entity) => matches.push(SimilarMatch {
                    id: entity.id,
                    title: entity.title,
                    status: entity.status,
                    score: hit.score,
                }),
                None => {
                    let total = self.stale_hits.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        document = %hit.id(),
                        kind = kind.as_str(),
                        stale_total = total,
                        "Dropping stale index hit; entity no longer exists"
                    );
                }
            }
        }

        let confidence = matches.iter().map(|m| m.score).fold(0.0f32, f32::max);
        let is_duplicate = confidence > threshold;
        let suggestion = if is_duplicate {
            matches.first().map(|top| {
                format!(
                    "A similar {} already exists: \"{}\" ({}% match)",
                    kind.as_str(),
                    top.title,
                    (top.score * 100.0).round() as u32
                )
            })
        } else {
            None
        };

        debug!(
            kind = kind.as_str(),
            hits = hits.len(),
            resolved = matches.len(),
            confidence,
            is_duplicate,
            "Duplicate check"
        );

        Ok(DuplicateCheckResult {
            is_duplicate,
            confidence,
            similar_matches: matches,
            suggestion,
        })
    }
}

/// Result of a duplicate-gated create.
#[derive(Debug, Clone)]
pub enum CreateOutcome<T> {
    /// The entity was persisted and indexed.
    Created {
        /// The stored entity.
        entity: T,
        /// The check that let it through, when one ran.
        duplicates: Option<DuplicateCheckResult>,
    },
    /// Nothing was persisted; a human must confirm via the force-create path.
    Blocked {
        /// The uncommitted candidate, returned unchanged.
        candidate: T,
        /// The check that blocked it.
        duplicates: DuplicateCheckResult,
    },
}

impl<T> CreateOutcome<T> {
    /// Whether creation was withheld.
    pub fn is_blocked(&self) -> bool {
        matches!(self, CreateOutcome::Blocked { .. })
    }

    /// The stored entity or the withheld candidate.
    pub fn entity(&self) -> &T {
        match self {
            CreateOutcome::Created { entity, .. } => entity,
            CreateOutcome::Blocked { candidate, .. } => candidate,
        }
    }

    /// The duplicate check, if one ran.
    pub fn duplicates(&self) -> Option<&DuplicateCheckResult> {
        match self {
            CreateOutcome::Created { duplicates, .. } => duplicates.as_ref(),
            CreateOutcome::Blocked { duplicates, .. } => Some(duplicates),
        }
    }
}
