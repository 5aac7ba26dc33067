use crate::embedding::{EmbedMode, EmbeddingProvider};
use async_trait::async_trait;
use mnemo_core::{MnemoError, MnemoResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Embedding provider backed by the Gemini `embedContent` API.
///
/// Documents are embedded with `RETRIEVAL_DOCUMENT` and queries with
/// `RETRIEVAL_QUERY`. Failures surface as [`MnemoError::Embedding`];
/// the [`Embedder`](crate::Embedder) turns them into zero vectors.
pub struct GeminiEmbedding {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

impl GeminiEmbedding {
    /// Creates a provider for `model` (with or without the `models/` prefix).
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let model = model.into();
        let model = if model.starts_with("models/") {
            model
        } else {
            format!("models/{model}")
        };
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            dimension,
        }
    }

    /// Points the provider at a different host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets a client-level request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> MnemoResult<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MnemoError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(self)
    }

    fn task_type(mode: EmbedMode) -> &'static str {
        match mode {
            EmbedMode::Document => "RETRIEVAL_DOCUMENT",
            EmbedMode::Query => "RETRIEVAL_QUERY",
        }
    }

    fn request<'a>(&'a self, text: &'a str, mode: EmbedMode) -> EmbedRequest<'a> {
        EmbedRequest {
            model: &self.model,
            content: Content {
                parts: [Part { text }],
            },
            task_type: Self::task_type(mode),
            output_dimensionality: self.dimension,
        }
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        body: &B,
    ) -> MnemoResult<R> {
        let url = format!("{}/v1beta/{}:{action}", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| MnemoError::Embedding(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MnemoError::Embedding(format!(
                "Gemini returned {status}: {text}"
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| MnemoError::Embedding(format!("Invalid Gemini response: {e}")))
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str, mode: EmbedMode) -> MnemoResult<Vec<f32>> {
        let response: EmbedResponse = self
            .post("embedContent", &self.request(text, mode))
            .await?;
        Ok(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[&str], mode: EmbedMode) -> MnemoResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = BatchRequest {
            requests: texts.iter().map(|t| self.request(t, mode)).collect(),
        };
        let response: BatchResponse = self.post("batchEmbedContents", &body).await?;
        if response.embeddings.len() != texts.len() {
            return Err(MnemoError::Embedding(format!(
                "Gemini returned {} embeddings for {} texts",
                response.embeddings.len(),
                texts.len()
            )));
        }
        debug!(count = texts.len(), "Gemini batch embedded");
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
