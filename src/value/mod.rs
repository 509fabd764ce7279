pub(crate) mod document;
pub(crate) mod entry;
pub(crate) mod message;

pub use document::{DocMetadata, RetrievedDocument};
pub use entry::{Confidence, KnowledgeEntry};
pub use message::{Message, Role};

/// A fixed-length embedding vector as returned by the embedding endpoint.
pub type Embedding = Vec<f32>;
