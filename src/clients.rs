use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    config::Config,
    index::{PineconeClient, VectorIndex},
    kb::embedding_text,
    model::{ApiTextModel, TextModel},
    value::{KnowledgeEntry, Message, RetrievedDocument, Role},
};

const INDEX_METRIC: &str = "cosine";
const INDEX_READY_WAIT: Duration = Duration::from_secs(10);

/// The single owner of the external service handles.
///
/// Construction happens once at startup; afterwards the pipeline only sees
/// the three narrow operations below. Both handles sit behind capability
/// traits so the whole pipeline runs against in-memory fakes in tests.
pub struct ServiceClients {
    index: Box<dyn VectorIndex>,
    model: Box<dyn TextModel>,
}

impl ServiceClients {
    pub fn new(index: Box<dyn VectorIndex>, model: Box<dyn TextModel>) -> Self {
        Self { index, model }
    }

    /// Embed the query and run a nearest-neighbor lookup.
    ///
    /// Fail-safe by contract: any provider failure degrades to an empty
    /// result instead of surfacing an error, and the pipeline treats an
    /// empty result as "no knowledge found".
    pub async fn search(&self, query: &str, k: usize) -> Vec<RetrievedDocument> {
        debug_assert!(k >= 1);
        let vector = match self.model.embed(query).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("query embedding failed: {e:#}");
                return Vec::new();
            }
        };
        match self.index.query(vector, k).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("vector search failed: {e:#}");
                Vec::new()
            }
        }
    }

    /// Embed and upsert every entry, in ascending `doc_id` order so
    /// repeated population produces the same index state. One bad entry is
    /// logged and skipped, the rest of the batch still lands. Returns the
    /// number of entries actually stored.
    pub async fn embed_and_upsert(&self, entries: &[KnowledgeEntry]) -> usize {
        let mut sorted: Vec<&KnowledgeEntry> = entries.iter().collect();
        sorted.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));

        let mut stored = 0;
        for entry in sorted {
            let vector = match self.model.embed(&embedding_text(entry)).await {
                Ok(vector) => vector,
                Err(e) => {
                    warn!("failed to embed {}: {e:#}", entry.doc_id);
                    continue;
                }
            };
            match self.index.upsert(&entry.doc_id, vector, entry.into()).await {
                Ok(()) => stored += 1,
                Err(e) => warn!("failed to upsert {}: {e:#}", entry.doc_id),
            }
        }
        info!("upserted {stored}/{} knowledge base entries", entries.len());
        stored
    }

    /// One chat completion over a system and a user prompt. Errors surface
    /// to the calling stage, which substitutes its own sentinel.
    pub async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
    ) -> Result<String> {
        let messages = [
            Message::new(Role::System, system_prompt),
            Message::new(Role::User, user_prompt),
        ];
        self.model.chat(&messages, temperature).await
    }

    /// Populate the index from the knowledge base unless it already holds
    /// vectors. The emptiness check is what makes repeated startups not
    /// duplicate the population work.
    pub async fn ensure_populated(&self, entries: &[KnowledgeEntry]) -> Result<()> {
        let count = self
            .index
            .vector_count()
            .await
            .context("failed to inspect index stats")?;
        if count == 0 {
            info!("index is empty, populating from the knowledge base");
            self.embed_and_upsert(entries).await;
        } else {
            info!("index already holds {count} vectors, skipping population");
        }
        Ok(())
    }
}

/// Connect to the live providers: build the model client, then resolve the
/// configured index, creating it (dimension probed from the embedding
/// endpoint, cosine metric) when it does not exist yet.
pub async fn connect(config: &Config) -> Result<ServiceClients> {
    let model = ApiTextModel::new(
        &config.openai_api_key,
        &config.chat_model,
        &config.embedding_model,
    )
    .with_base_url(&config.openai_base_url);

    let pinecone = PineconeClient::new(&config.pinecone_api_key);
    let description = match pinecone.describe_index(&config.index_name).await? {
        Some(description) => {
            info!("index {} already exists", config.index_name);
            description
        }
        None => {
            let probe = model
                .embed("dimension probe")
                .await
                .context("failed to probe the embedding dimension")?;
            info!(
                "creating index {} with dimension {}",
                config.index_name,
                probe.len()
            );
            let description = pinecone
                .create_index(&config.index_name, probe.len(), INDEX_METRIC)
                .await?;
            if !description.status.ready {
                tokio::time::sleep(INDEX_READY_WAIT).await;
            }
            description
        }
    };
    let index = pinecone.index(&description)?;
    Ok(ServiceClients::new(Box::new(index), Box::new(model)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingModel, FakeIndex, FakeModel, entry};

    fn clients(index: FakeIndex, model: FakeModel) -> ServiceClients {
        ServiceClients::new(Box::new(index), Box::new(model))
    }

    #[tokio::test]
    async fn population_upserts_in_ascending_doc_id_order() {
        let index = FakeIndex::new();
        let model = FakeModel::new();
        let entries = vec![entry("KB010"), entry("KB002"), entry("KB005")];

        let stored = clients(index.clone(), model).embed_and_upsert(&entries).await;

        assert_eq!(stored, 3);
        assert_eq!(index.upsert_order(), vec!["KB002", "KB005", "KB010"]);
    }

    #[tokio::test]
    async fn one_bad_entry_does_not_abort_the_batch() {
        let index = FakeIndex::new();
        let model = FakeModel::new().failing_embed_for("question for KB005 snippet for KB005");
        let entries = vec![entry("KB010"), entry("KB002"), entry("KB005")];

        let stored = clients(index.clone(), model).embed_and_upsert(&entries).await;

        assert_eq!(stored, 2);
        assert_eq!(index.upsert_order(), vec!["KB002", "KB010"]);
    }

    #[tokio::test]
    async fn search_degrades_to_empty_on_embed_failure() {
        let index = FakeIndex::new();
        let svc = ServiceClients::new(Box::new(index), Box::new(FailingModel));
        assert!(svc.search("anything", 5).await.is_empty());
    }

    #[tokio::test]
    async fn search_degrades_to_empty_on_index_failure() {
        let index = FakeIndex::new().failing_queries();
        let svc = clients(index, FakeModel::new());
        assert!(svc.search("anything", 5).await.is_empty());
    }

    #[tokio::test]
    async fn population_is_skipped_when_the_index_has_vectors() {
        let index = FakeIndex::new();
        let model = FakeModel::new();
        let svc = clients(index.clone(), model);

        svc.ensure_populated(&[entry("KB001")]).await.unwrap();
        assert_eq!(index.upsert_order(), vec!["KB001"]);

        // Second startup: the emptiness check must prevent re-population.
        svc.ensure_populated(&[entry("KB001"), entry("KB002")])
            .await
            .unwrap();
        assert_eq!(index.upsert_order(), vec!["KB001"]);
    }
}
