use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of record a [`Document`] was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// A task.
    Task,
    /// A project.
    Project,
    /// Free-form text indexed directly.
    Note,
}

impl DocumentKind {
    /// Lowercase label; also the document id prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Task => "task",
            DocumentKind::Project => "project",
            DocumentKind::Note => "note",
        }
    }

    /// Document id for an entity of this kind.
    pub fn key(&self, entity_id: &str) -> String {
        format!("{}_{entity_id}", self.as_str())
    }
}

/// Filterable attributes attached to a [`Document`].
///
/// `type` and `entityId` are always present; the remaining keys are optional,
/// and anything else goes into `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// Primary filter discriminator.
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    /// Id of the backing entity in the domain repository.
    pub entity_id: String,
    /// Entity status label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Entity priority label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Owning project id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Ad hoc fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    /// Metadata with only the required keys set.
    pub fn new(kind: DocumentKind, entity_id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            status: None,
            priority: None,
            project_id: None,
            extra: BTreeMap::new(),
        }
    }

    /// Sets `status`.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets `priority`.
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Sets `projectId`.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Adds an extension field.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Exact-match predicate over [`DocumentMetadata`].
///
/// Unset fields match anything. The default filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    /// Required `type`.
    pub kind: Option<DocumentKind>,
    /// Required `entityId`.
    pub entity_id: Option<String>,
    /// Required `status`.
    pub status: Option<String>,
    /// Required `priority`.
    pub priority: Option<String>,
    /// Required `projectId`.
    pub project_id: Option<String>,
    /// Required extension values.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl MetadataFilter {
    /// Filter on `type` only.
    pub fn kind(kind: DocumentKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Also require `status`.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Also require `priority`.
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Also require `projectId`.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Also require an extension field value.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Whether `meta` satisfies every set field.
    pub fn matches(&self, meta: &DocumentMetadata) -> bool {
        fn eq(want: &Option<String>, have: &Option<String>) -> bool {
            match want {
                Some(w) => have.as_deref() == Some(w.as_str()),
                None => true,
            }
        }

        if self.kind.is_some_and(|k| k != meta.kind) {
            return false;
        }
        if self
            .entity_id
            .as_ref()
            .is_some_and(|id| *id != meta.entity_id)
        {
            return false;
        }
        eq(&self.status, &meta.status)
            && eq(&self.priority, &meta.priority)
            && eq(&self.project_id, &meta.project_id)
            && self
                .extra
                .iter()
                .all(|(k, v)| meta.extra.get(k) == Some(v))
    }
}

/// The indexed unit: text, its vector, and filterable metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique key, conventionally `<type>_<entityId>`.
    pub id: String,
    /// Canonical text the vector was computed from.
    pub content: String,
    /// Document-mode embedding.
    pub embedding: Vec<f32>,
    /// Filterable attributes.
    pub metadata: DocumentMetadata,
    /// Time of the last write.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Builds a document stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        metadata: DocumentMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            embedding,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// True when the content could not be embedded and carries the zero vector.
    pub fn is_degraded(&self) -> bool {
        self.embedding.iter().all(|x| *x == 0.0)
    }

    /// First line of the content, used as a display title.
    pub fn title(&self) -> &str {
        self.content.lines().next().unwrap_or_default().trim()
    }
}

/// Input to a batched index call.
#[derive(Debug, Clone)]
pub struct IndexItem {
    /// Document id.
    pub id: String,
    /// Text to embed.
    pub content: String,
    /// Metadata to attach.
    pub metadata: DocumentMetadata,
}

impl IndexItem {
    /// Creates an item.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        metadata: DocumentMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }
}

/// A ranked hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matching document.
    pub document: Document,
    /// Clamped cosine similarity in [0, 1].
    pub score: f32,
    /// 1-based position in the returned list.
    pub rank: usize,
}

impl SearchResult {
    /// Document id.
    pub fn id(&self) -> &str {
        &self.document.id
    }

    /// Document content.
    pub fn content(&self) -> &str {
        &self.document.content
    }

    /// Document metadata.
    pub fn metadata(&self) -> &DocumentMetadata {
        &self.document.metadata
    }
}
