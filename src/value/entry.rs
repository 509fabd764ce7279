use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// How much the curators trust a knowledge base snippet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// One record of the knowledge base source file.
///
/// Entries are deserialized once at startup and stay immutable afterwards;
/// the indexer consumes them to populate the vector index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub doc_id: String,
    pub question: String,
    pub answer_snippet: String,
    pub source: String,
    pub confidence_indicator: Confidence,
    pub last_updated: String,
}
