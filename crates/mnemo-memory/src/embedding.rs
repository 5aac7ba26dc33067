use async_trait::async_trait;
use mnemo_core::{MnemoError, MnemoResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Which side of a retrieval pair a text is embedded for.
///
/// Some model families place documents and queries in different sub-spaces.
/// A query vector is only ever compared against document vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedMode {
    /// Text being stored in the index.
    Document,
    /// Text being searched for.
    Query,
}

/// Trait for computing text embeddings (vector representations).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding vector for a single text.
    async fn embed(&self, text: &str, mode: EmbedMode) -> MnemoResult<Vec<f32>>;

    /// Compute embeddings for a batch of texts, in input order.
    async fn embed_batch(&self, texts: &[&str], mode: EmbedMode) -> MnemoResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text, mode).await?);
        }
        Ok(results)
    }

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;

    /// Short name used in logs and stats.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Local hashing embedder (no external API needed).
///
/// Each word contributes its term frequency at three hashed positions, and
/// words of four or more characters also spread a smaller weight over their
/// character trigrams so inflections ("pagar"/"pagos") land near each other.
/// Single-character words only count when nothing longer is present. The
/// result is L2-normalised. Both modes produce the same vector.
pub struct LocalEmbedding {
    dimension: usize,
}

const TRIGRAM_WEIGHT: f32 = 0.6;

impl LocalEmbedding {
    /// Creates an embedder producing vectors of `dimension` floats.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let mut words: Vec<&str> = tokens.iter().copied().filter(|w| w.len() > 1).collect();
        // Short texts ("X", "5 y 7", "?!") still need a non-zero vector.
        if words.is_empty() {
            words = tokens;
        }
        if words.is_empty() {
            words = lowered.split_whitespace().collect();
        }

        let total = words.len() as f32;
        if total == 0.0 {
            return vector;
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for &word in &words {
            *freq.entry(word).or_insert(0.0) += 1.0;
        }

        for (word, count) in &freq {
            let tf = count / total;
            let bytes = word.as_bytes();
            vector[self.slot(&[bytes])] += tf;
            vector[self.slot(&[bytes, &[1u8]])] += tf * 0.7;
            vector[self.slot(&[bytes, &[2u8]])] += tf * 0.5;

            let chars: Vec<char> = word.chars().collect();
            if chars.len() >= 4 {
                let grams = chars.len() - 2;
                let weight = tf * TRIGRAM_WEIGHT / grams as f32;
                for window in chars.windows(3) {
                    let gram: String = window.iter().collect();
                    vector[self.slot(&[&[3u8], gram.as_bytes()])] += weight;
                }
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn slot(&self, parts: &[&[u8]]) -> usize {
        fnv1a(parts) as usize % self.dimension
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str, _mode: EmbedMode) -> MnemoResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MnemoError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// FNV-1a over the concatenation of `parts`.
fn fnv1a(parts: &[&[u8]]) -> u32 {
    let mut hash: u32 = 2166136261;
    for part in parts {
        for &byte in *part {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(16777619);
        }
    }
    hash
}

/// Raw cosine similarity in [-1, 1].
///
/// Zero vectors and mismatched lengths score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Cosine similarity clamped to [0, 1]; the score used for ranking.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    let raw = cosine_similarity(a, b);
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Guarded facade over an [`EmbeddingProvider`].
///
/// Never fails: empty input, provider errors, timeouts and wrong-sized
/// vectors all yield the zero vector (logged), which scores 0 against
/// everything.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
    batch_size: usize,
    degraded: Arc<AtomicU64>,
}

impl Embedder {
    /// Wraps `provider` with a 10s timeout and batches of 100.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(10),
            batch_size: 100,
            degraded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of texts per provider call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Vector dimension of the wrapped provider.
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Name of the wrapped provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Number of texts that degraded to the zero vector because of a failure.
    pub fn degraded_count(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    /// The sentinel vector for empty or unembeddable text.
    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimension()]
    }

    /// Embeds one text.
    pub async fn embed(&self, text: &str, mode: EmbedMode) -> Vec<f32> {
        let text = text.trim();
        if text.is_empty() {
            return self.zero_vector();
        }
        let outcome = tokio::time::timeout(self.timeout, self.provider.embed(text, mode)).await;
        match outcome {
            Ok(Ok(vector)) if vector.len() == self.dimension() => vector,
            Ok(Ok(vector)) => {
                self.degrade(1);
                warn!(
                    provider = self.provider_name(),
                    expected = self.dimension(),
                    got = vector.len(),
                    "Embedding has wrong dimension, using zero vector"
                );
                self.zero_vector()
            }
            Ok(Err(e)) => {
                self.degrade(1);
                warn!(provider = self.provider_name(), error = %e, "Embedding failed, using zero vector");
                self.zero_vector()
            }
            Err(_) => {
                self.degrade(1);
                warn!(
                    provider = self.provider_name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Embedding timed out, using zero vector"
                );
                self.zero_vector()
            }
        }
    }

    /// Embeds many texts with as few provider calls as possible.
    ///
    /// Output order matches input order. A failed chunk degrades only the
    /// texts in that chunk.
    pub async fn embed_batch(&self, texts: &[&str], mode: EmbedMode) -> Vec<Vec<f32>> {
        let mut out: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        let pending: Vec<(usize, &str)> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t.trim()))
            .filter(|(_, t)| !t.is_empty())
            .collect();

        for chunk in pending.chunks(self.batch_size) {
            let inputs: Vec<&str> = chunk.iter().map(|(_, t)| *t).collect();
            let outcome =
                tokio::time::timeout(self.timeout, self.provider.embed_batch(&inputs, mode)).await;
            let vectors = match outcome {
                Ok(Ok(vectors)) if vectors.len() == inputs.len() => vectors,
                Ok(Ok(vectors)) => {
                    warn!(
                        provider = self.provider_name(),
                        expected = inputs.len(),
                        got = vectors.len(),
                        "Batch embedding returned wrong count, using zero vectors"
                    );
                    Vec::new()
                }
                Ok(Err(e)) => {
                    warn!(provider = self.provider_name(), batch = inputs.len(), error = %e, "Batch embedding failed, using zero vectors");
                    Vec::new()
                }
                Err(_) => {
                    warn!(
                        provider = self.provider_name(),
                        batch = inputs.len(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Batch embedding timed out, using zero vectors"
                    );
                    Vec::new()
                }
            };

            let mut degraded = 0u64;
            let mut vectors = vectors.into_iter();
            for (index, _) in chunk {
                out[*index] = match vectors.next() {
                    Some(v) if v.len() == self.dimension() => v,
                    _ => {
                        degraded += 1;
                        self.zero_vector()
                    }
                };
            }
            self.degrade(degraded);
        }

        for slot in &mut out {
            if slot.is_empty() {
                *slot = self.zero_vector();
            }
        }
        out
    }

    /// Score between two vectors in [0, 1].
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        similarity_score(a, b)
    }

    /// Score between two texts, both embedded as documents.
    pub async fn text_similarity(&self, a: &str, b: &str) -> f32 {
        let va = self.embed(a, EmbedMode::Document).await;
        let vb = self.embed(b, EmbedMode::Document).await;
        similarity_score(&va, &vb)
    }

    fn degrade(&self, n: u64) {
        if n > 0 {
            self.degraded.fetch_add(n, Ordering::Relaxed);
        }
    }
}
