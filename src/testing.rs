//! In-memory substitutes for the three service capabilities, so the
//! pipeline and facade tests run without live providers.

use std::{
    collections::{HashSet, VecDeque},
    hash::{DefaultHasher, Hash, Hasher},
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::{
    index::VectorIndex,
    model::TextModel,
    tracking::{RunDraft, RunSink},
    value::{Confidence, DocMetadata, Embedding, KnowledgeEntry, Message, RetrievedDocument},
};

const EMBEDDING_DIM: usize = 16;

pub(crate) fn entry(id: &str) -> KnowledgeEntry {
    entry_with_question(id, &format!("question for {id}"))
}

pub(crate) fn entry_with_question(id: &str, question: &str) -> KnowledgeEntry {
    KnowledgeEntry {
        doc_id: id.to_owned(),
        question: question.to_owned(),
        answer_snippet: format!("snippet for {id}"),
        source: "guide.md".to_owned(),
        confidence_indicator: Confidence::Medium,
        last_updated: "2024-01-10".to_owned(),
    }
}

pub(crate) fn doc(id: &str, score: f64) -> RetrievedDocument {
    RetrievedDocument {
        id: id.to_owned(),
        score,
        metadata: DocMetadata::from(&entry(id)),
    }
}

/// Deterministic stand-in embedding: hashed bag of words, L2-normalized.
/// Equal texts embed identically, so an exact question match scores 1.0
/// under the cosine ranking of [`FakeIndex`].
fn bag_of_words(text: &str) -> Embedding {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for word in text.to_lowercase().split_whitespace() {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        vector[(hasher.finish() as usize) % EMBEDDING_DIM] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[derive(Default)]
struct FakeModelInner {
    chat_responses: VecDeque<Result<String, String>>,
    prompts: Vec<(String, String)>,
    chat_calls: usize,
    failing_embeds: HashSet<String>,
}

/// Scripted chat plus deterministic embeddings. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct FakeModel {
    inner: Arc<Mutex<FakeModelInner>>,
}

impl FakeModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue the next chat outcome; responses are consumed in order.
    pub(crate) fn scripted_chat(self, response: Result<&str, &str>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .chat_responses
            .push_back(response.map(str::to_owned).map_err(str::to_owned));
        self
    }

    /// Make `embed` fail for exactly this text.
    pub(crate) fn failing_embed_for(self, text: &str) -> Self {
        self.inner.lock().unwrap().failing_embeds.insert(text.to_owned());
        self
    }

    pub(crate) fn chat_calls(&self) -> usize {
        self.inner.lock().unwrap().chat_calls
    }

    /// `(system, user)` prompt pairs, in call order.
    pub(crate) fn prompts(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().prompts.clone()
    }
}

#[async_trait]
impl TextModel for FakeModel {
    async fn chat(&self, messages: &[Message], _temperature: f64) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.chat_calls += 1;
        let system = messages.first().map(|m| m.content.clone()).unwrap_or_default();
        let user = messages.get(1).map(|m| m.content.clone()).unwrap_or_default();
        inner.prompts.push((system, user));
        match inner.chat_responses.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("no scripted chat response left")),
        }
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        if self.inner.lock().unwrap().failing_embeds.contains(text) {
            return Err(anyhow!("scripted embedding failure for {text:?}"));
        }
        Ok(bag_of_words(text))
    }
}

/// A model whose every call fails, for degraded-mode tests.
pub(crate) struct FailingModel;

#[async_trait]
impl TextModel for FailingModel {
    async fn chat(&self, _messages: &[Message], _temperature: f64) -> Result<String> {
        Err(anyhow!("model unavailable"))
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Err(anyhow!("model unavailable"))
    }
}

#[derive(Default)]
struct FakeIndexInner {
    vectors: Vec<(String, Embedding, DocMetadata)>,
    fail_queries: bool,
}

/// Records upserts in call order and answers queries by real cosine
/// ranking over the stored vectors.
#[derive(Clone, Default)]
pub(crate) struct FakeIndex {
    inner: Arc<Mutex<FakeIndexInner>>,
}

impl FakeIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_queries(self) -> Self {
        self.inner.lock().unwrap().fail_queries = true;
        self
    }

    pub(crate) fn upsert_order(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .vectors
            .iter()
            .map(|(id, _, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn query(&self, vector: Embedding, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_queries {
            return Err(anyhow!("index unavailable"));
        }
        let mut scored: Vec<RetrievedDocument> = inner
            .vectors
            .iter()
            .map(|(id, stored, metadata)| RetrievedDocument {
                id: id.clone(),
                score: cosine(&vector, stored),
                metadata: metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn upsert(&self, id: &str, vector: Embedding, metadata: DocMetadata) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.vectors.retain(|(stored, _, _)| stored != id);
        inner.vectors.push((id.to_owned(), vector, metadata));
        Ok(())
    }

    async fn vector_count(&self) -> Result<usize> {
        Ok(self.inner.lock().unwrap().vectors.len())
    }
}

#[derive(Default)]
struct ScriptedIndexInner {
    results: VecDeque<Vec<RetrievedDocument>>,
    topk_calls: Vec<usize>,
}

/// Returns a fixed result list per query call, for tests that pin down the
/// exact retrieval shape seen by each stage.
#[derive(Clone, Default)]
pub(crate) struct ScriptedIndex {
    inner: Arc<Mutex<ScriptedIndexInner>>,
}

impl ScriptedIndex {
    pub(crate) fn new(results: Vec<Vec<RetrievedDocument>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptedIndexInner {
                results: results.into(),
                topk_calls: Vec::new(),
            })),
        }
    }

    /// The `top_k` of every query call, in order.
    pub(crate) fn topk_calls(&self) -> Vec<usize> {
        self.inner.lock().unwrap().topk_calls.clone()
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    async fn query(&self, _vector: Embedding, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        let mut inner = self.inner.lock().unwrap();
        inner.topk_calls.push(top_k);
        Ok(inner.results.pop_front().unwrap_or_default())
    }

    async fn upsert(&self, _id: &str, _vector: Embedding, _metadata: DocMetadata) -> Result<()> {
        Ok(())
    }

    async fn vector_count(&self) -> Result<usize> {
        Ok(self.inner.lock().unwrap().results.len())
    }
}

#[derive(Default)]
struct FakeSinkInner {
    recorded: Vec<RunDraft>,
    fail: bool,
}

/// Captures drafts, or fails on demand to exercise the best-effort paths.
#[derive(Clone, Default)]
pub(crate) struct FakeSink {
    inner: Arc<Mutex<FakeSinkInner>>,
}

impl FakeSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let sink = Self::default();
        sink.inner.lock().unwrap().fail = true;
        sink
    }

    pub(crate) fn recorded(&self) -> Vec<RunDraft> {
        self.inner.lock().unwrap().recorded.clone()
    }
}

#[async_trait]
impl RunSink for FakeSink {
    async fn record(&self, draft: &RunDraft) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail {
            return Err(anyhow!("tracking server unreachable"));
        }
        inner.recorded.push(draft.clone());
        Ok(format!("fake-run-{}", inner.recorded.len()))
    }
}
