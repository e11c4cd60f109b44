use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::http::Http;

pub type Embedding = Vec<f32>;

/// Maps text to fixed-length vectors. One provider (and model) per service, so
/// every index and every query live in the same embedding space.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns exactly one vector per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Embeds `texts` in batches of `batch_size`, keeping at most `concurrency` batches in
/// flight. Results come back in input order; any failed batch fails the whole call.
pub async fn embed_all(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    concurrency: usize,
) -> Result<Vec<Embedding>> {
    if texts.is_empty() {
        return Ok(vec![]);
    }
    let requests: Vec<_> = texts
        .chunks(batch_size.max(1))
        .map(|batch| async move {
            let vectors = provider.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(Error::provider(
                    provider.name(),
                    format!("returned {} embeddings for {} texts", vectors.len(), batch.len()),
                ));
            }
            Ok(vectors)
        })
        .collect();
    let batches: Vec<Vec<Embedding>> = stream::iter(requests)
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;
    Ok(batches.into_iter().flatten().collect())
}

pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Embedding> {
    let vecs = provider.embed_batch(&[text.to_string()]).await?;
    vecs.into_iter()
        .next()
        .ok_or_else(|| Error::provider(provider.name(), "no embedding returned for query"))
}

pub struct OllamaEmbedder {
    http: Http,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Serialize)]
struct EmbedLegacyRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

impl OllamaEmbedder {
    pub fn new(http: Http, base_url: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// The legacy endpoint takes a single prompt per request.
    async fn embed_legacy(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let req = EmbedLegacyRequest {
                model: &self.model,
                prompt: text,
            };
            let res = self
                .http
                .post_json::<Value, _>(&url, None, &req)
                .await
                .map_err(|e| Error::provider(self.name(), e))?;
            out.extend(parse_embeddings(res).map_err(|e| Error::provider(self.name(), e))?);
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let url = format!("{}/api/embed", self.base_url);
        let req = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        match self.http.post_json::<Value, _>(&url, None, &req).await {
            Ok(res) => parse_embeddings(res).map_err(|e| Error::provider(self.name(), e)),
            Err(err) => {
                tracing::debug!(error = %err, "ollama /api/embed failed, trying /api/embeddings");
                self.embed_legacy(texts).await
            }
        }
    }
}

pub struct OpenAiEmbedder {
    http: Http,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(http: Http, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let url = format!("{}/embeddings", self.base_url);
        let req = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let mut res: OpenAiEmbeddingResponse = self
            .http
            .post_json(&url, Some(&self.api_key), &req)
            .await
            .map_err(|e| Error::provider(self.name(), e))?;
        res.data.sort_by_key(|item| item.index);
        Ok(res.data.into_iter().map(|item| item.embedding).collect())
    }
}

fn parse_embeddings(value: Value) -> std::result::Result<Vec<Embedding>, String> {
    if let Some(embeddings) = value.get("embeddings") {
        return parse_embeddings_value(embeddings);
    }
    if let Some(embedding) = value.get("embedding") {
        return parse_embeddings_value(embedding);
    }
    if let Some(err) = value.get("error").and_then(Value::as_str) {
        return Err(err.to_string());
    }
    Err("No embeddings in response".to_string())
}

fn parse_embeddings_value(value: &Value) -> std::result::Result<Vec<Embedding>, String> {
    let Some(arr) = value.as_array() else {
        return Err("Invalid embeddings format".to_string());
    };
    if arr.is_empty() {
        return Ok(vec![]);
    }
    if arr[0].is_array() {
        return arr.iter().map(parse_vec).collect();
    }
    Ok(vec![parse_vec(value)?])
}

fn parse_vec(value: &Value) -> std::result::Result<Embedding, String> {
    let arr = value.as_array().ok_or("Embedding is not an array")?;
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let n = v.as_f64().ok_or("Embedding value is not a number")?;
        out.push(n as f32);
    }
    Ok(out)
}
