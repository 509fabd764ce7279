use serde::{Deserialize, Serialize};

use crate::value::{Confidence, KnowledgeEntry};

/// Metadata stored alongside a vector in the index. This is the
/// `KnowledgeEntry` minus `doc_id`, which becomes the vector id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub question: String,
    pub answer_snippet: String,
    pub source: String,
    pub confidence_indicator: Confidence,
    pub last_updated: String,
}

impl From<&KnowledgeEntry> for DocMetadata {
    fn from(entry: &KnowledgeEntry) -> Self {
        Self {
            question: entry.question.clone(),
            answer_snippet: entry.answer_snippet.clone(),
            source: entry.source.clone(),
            confidence_indicator: entry.confidence_indicator,
            last_updated: entry.last_updated.clone(),
        }
    }
}

/// One ranked match from a vector search. `score` is a similarity in 0..1,
/// higher is closer. Lives only for the pipeline run that retrieved it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub score: f64,
    pub metadata: DocMetadata,
}
