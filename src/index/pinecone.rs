use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use url::Url;

use super::VectorIndex;
use crate::value::{DocMetadata, Embedding, RetrievedDocument};

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2025-01";

/// Control-plane client: index lookup and creation against the global
/// Pinecone API. Data-plane traffic goes through [`PineconeIndex`], bound
/// to the host the control plane hands out per index.
#[derive(Clone, Debug)]
pub struct PineconeClient {
    http: reqwest::Client,
    api_key: String,
    base: Url,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IndexDescription {
    pub name: String,
    pub dimension: usize,
    pub metric: String,
    pub host: String,
    #[serde(default)]
    pub status: IndexStatus,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IndexStatus {
    #[serde(default)]
    pub ready: bool,
}

impl PineconeClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base: Url::parse(CONTROL_PLANE_URL).unwrap(),
        }
    }

    /// Describe an index by name. `Ok(None)` when the index does not exist.
    pub async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>> {
        let url = self
            .base
            .join(&format!("indexes/{name}"))
            .context("malformed index name")?;
        let resp = self
            .http
            .get(url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-Api-Version", API_VERSION)
            .send()
            .await
            .context("describe_index request failed")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let desc = resp
            .error_for_status()
            .context("describe_index returned an error status")?
            .json::<IndexDescription>()
            .await
            .context("describe_index returned a malformed body")?;
        Ok(Some(desc))
    }

    /// Create a serverless index. Callers probe the embedding dimension
    /// beforehand; the metric is part of the index contract.
    pub async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: &str,
    ) -> Result<IndexDescription> {
        let body = serde_json::json!({
            "name": name,
            "dimension": dimension,
            "metric": metric,
            "spec": { "serverless": { "cloud": "aws", "region": "us-east-1" } },
        });
        let url = self.base.join("indexes").unwrap();
        let desc = self
            .http
            .post(url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-Api-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("create_index request failed")?
            .error_for_status()
            .context("create_index returned an error status")?
            .json::<IndexDescription>()
            .await
            .context("create_index returned a malformed body")?;
        Ok(desc)
    }

    /// Bind a data-plane handle to a described index.
    pub fn index(&self, desc: &IndexDescription) -> Result<PineconeIndex> {
        let host = Url::parse(&format!("https://{}", desc.host))
            .with_context(|| format!("index {} has a malformed host {}", desc.name, desc.host))?;
        Ok(PineconeIndex {
            http: self.http.clone(),
            api_key: self.api_key.clone(),
            host,
        })
    }
}

/// Data-plane handle for one index: query, upsert, stats.
#[derive(Clone, Debug)]
pub struct PineconeIndex {
    http: reqwest::Client,
    api_key: String,
    host: Url,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f64,
    metadata: Option<DocMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    total_vector_count: usize,
}

impl PineconeIndex {
    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.host.clone();
        url.set_path(path);
        url
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(self.endpoint(path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-Api-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?
            .error_for_status()
            .with_context(|| format!("{path} returned an error status"))?
            .json::<serde_json::Value>()
            .await
            .with_context(|| format!("{path} returned a malformed body"))?;
        Ok(resp)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(&self, vector: Embedding, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        if top_k == 0 {
            bail!("top_k must be at least 1");
        }
        let body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        let raw = self.post("/query", body).await?;
        let parsed: QueryResponse =
            serde_json::from_value(raw).context("query response did not match expected shape")?;
        let mut docs = Vec::with_capacity(parsed.matches.len());
        for m in parsed.matches {
            match m.metadata {
                Some(metadata) => docs.push(RetrievedDocument {
                    id: m.id,
                    score: m.score,
                    metadata,
                }),
                // A match without metadata cannot be used as context.
                None => debug!("dropping match {} without metadata", m.id),
            }
        }
        Ok(docs)
    }

    async fn upsert(&self, id: &str, vector: Embedding, metadata: DocMetadata) -> Result<()> {
        let body = serde_json::json!({
            "vectors": [{
                "id": id,
                "values": vector,
                "metadata": metadata,
            }],
        });
        self.post("/vectors/upsert", body).await?;
        Ok(())
    }

    async fn vector_count(&self) -> Result<usize> {
        let raw = self.post("/describe_index_stats", serde_json::json!({})).await?;
        let stats: IndexStats =
            serde_json::from_value(raw).context("index stats did not match expected shape")?;
        Ok(stats.total_vector_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_response_parses_matches_and_scores() {
        let raw = serde_json::json!({
            "matches": [{
                "id": "KB001",
                "score": 0.87,
                "metadata": {
                    "question": "What are best practices for caching?",
                    "answer_snippet": "Use TTLs.",
                    "source": "caching_guide.md",
                    "confidence_indicator": "high",
                    "last_updated": "2024-01-10"
                }
            }],
            "namespace": ""
        });
        let parsed: QueryResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.matches.len(), 1);
        assert_eq!(parsed.matches[0].id, "KB001");
        assert!((parsed.matches[0].score - 0.87).abs() < 1e-9);
    }

    #[test]
    fn index_description_parses_without_status() {
        let raw = serde_json::json!({
            "name": "agentic-rag-kb",
            "dimension": 1536,
            "metric": "cosine",
            "host": "agentic-rag-kb-abc123.svc.aped-4627-b74a.pinecone.io"
        });
        let desc: IndexDescription = serde_json::from_value(raw).unwrap();
        assert_eq!(desc.dimension, 1536);
        assert!(!desc.status.ready);
    }

    #[test]
    fn stats_default_to_zero_vectors() {
        let stats: IndexStats = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(stats.total_vector_count, 0);
    }
}
