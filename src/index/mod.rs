mod pinecone;

pub use pinecone::{IndexDescription, IndexStatus, PineconeClient, PineconeIndex};

use anyhow::Result;
use async_trait::async_trait;

use crate::value::{DocMetadata, Embedding, RetrievedDocument};

/// The vector index capability the pipeline depends on.
///
/// Kept deliberately narrow so the pipeline core can run against an
/// in-memory substitute in tests. Index creation and host resolution are
/// provider concerns and stay on the concrete client.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest-neighbor lookup, at most `top_k` matches ordered by
    /// descending similarity score.
    async fn query(&self, vector: Embedding, top_k: usize) -> Result<Vec<RetrievedDocument>>;

    /// Insert or overwrite one vector under `id`.
    async fn upsert(&self, id: &str, vector: Embedding, metadata: DocMetadata) -> Result<()>;

    /// Total number of vectors currently stored.
    async fn vector_count(&self) -> Result<usize>;
}
